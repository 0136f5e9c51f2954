//! Handler module - coordinator request handling and dispatch.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps method names to handlers
//! - [`RequestContext`] - lets a handler answer its request
//!
//! # Example
//!
//! ```
//! use elko_client::handler::{HandlerRegistry, RequestContext};
//!
//! let mut registry = HandlerRegistry::new();
//!
//! registry.register("charge", |amount: u64, ctx: RequestContext| async move {
//!     if amount == 0 {
//!         return ctx.error("InvalidAmount", "amount must be positive").await;
//!     }
//!     ctx.respond(&amount).await
//! });
//!
//! assert!(registry.contains("charge"));
//! ```

mod context;
mod dispatcher;
mod registry;

pub use context::RequestContext;
pub(crate) use dispatcher::Dispatcher;
pub use registry::{BoxFuture, Handler, HandlerRegistry, HandlerResult, RawHandler, TypedHandler};
