//! # elko-client
//!
//! Worker runtime for the Elko coordinator protocol.
//!
//! A worker opens one TCP connection to the coordinator, announces itself
//! with a version byte and a `ClientHello`, and then exchanges framed
//! messages in both directions: requests it issues to other services,
//! requests the coordinator routes to it, heartbeats and shutdown.
//!
//! ## Wire format
//!
//! ```text
//! +--------+------------+-------------+--------+
//! | opcode | length     | payload     | tag    |
//! | 1 byte | 4 bytes BE | length bytes| 8 bytes|
//! +--------+------------+-------------+--------+
//! ```
//!
//! The tag is a keyed HighwayHash-64 over opcode, length and payload. The
//! key is derived from the service id, so both ends of a session must agree
//! on it before any frame is trusted.
//!
//! ## Example
//!
//! ```no_run
//! use elko_client::ClientBuilder;
//!
//! #[tokio::main]
//! async fn main() -> elko_client::Result<()> {
//!     let client = ClientBuilder::from_env("billing")?
//!         .handle("echo", |data: String, ctx| async move {
//!             ctx.respond(&data).await
//!         })
//!         .connect()
//!         .await?;
//!
//!     let handle = client.handle();
//!     let ctx = handle
//!         .context()
//!         .with_timeout(std::time::Duration::from_secs(2));
//!     let total: u64 = handle.request(&ctx, "ledger", &("acct-7", 40u64)).await?;
//!     println!("ledger total {total}");
//!
//!     std::process::exit(client.wait().await.exit_code());
//! }
//! ```

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod queue;
pub mod state;
pub mod transport;

mod client;
mod connection;
mod pending;
mod reader;
mod writer;

pub use client::{run, Client, ClientBuilder, ClientHandle, Termination};
pub use config::ClientConfig;
pub use context::Context;
pub use error::{ElkoError, Result};
pub use handler::{HandlerRegistry, RequestContext};
pub use state::ConnectionState;
