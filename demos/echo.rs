//! Echo Worker - simple request/response example.
//!
//! This example demonstrates:
//! - Building a client from the environment (`ELKO_HOST`, `ELKO_PORT`,
//!   `SERVICE_ID`, `INSTANCE_ID`)
//! - Registering a method handler with typed input/output
//! - Calling another service through the coordinator
//! - Sending a log entry to the coordinator's log service
//! - Turning the session outcome into a process exit code
//!
//! ```text
//! RUST_LOG=elko_client=debug ELKO_PORT=9000 cargo run --example echo
//! ```

use std::time::Duration;

use elko_client::{ClientBuilder, RequestContext};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Input structure for the echo method.
#[derive(Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo method.
#[derive(Serialize, Debug)]
struct EchoOutput {
    echo: String,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let builder = match ClientBuilder::from_env("echo") {
        Ok(builder) => builder,
        Err(e) => {
            warn!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let client = match builder
        .handle("echo", |data: EchoInput, ctx: RequestContext| async move {
            ctx.respond(&EchoOutput { echo: data.message }).await
        })
        .connect()
        .await
    {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Could not start session");
            std::process::exit(1);
        }
    };

    // Announce ourselves to an audit service, if the coordinator routes one.
    let handle = client.handle();
    let ctx = handle.context().with_timeout(Duration::from_secs(2));
    match handle.request::<_, String>(&ctx, "audit", &"echo worker up").await {
        Ok(ack) => info!(%ack, "Audit acknowledged"),
        Err(e) => {
            warn!(error = %e, "Audit request failed");
            if let Err(e) = handle.log_error(&ctx, &format!("audit failed: {}", e)).await {
                warn!(error = %e, "Could not send log entry");
            }
        }
    }

    let termination = client.wait().await;
    info!(?termination, "Session ended");
    std::process::exit(termination.exit_code());
}
