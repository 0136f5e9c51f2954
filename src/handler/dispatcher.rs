//! Runs coordinator requests against the registry.
//!
//! One task pops the incoming queue in arrival order and spawns one task
//! per request, so a slow handler never stalls frame reading. The number
//! of running handlers is capped by a semaphore; requests over the cap are
//! answered with an `Overloaded` error instead of being dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{HandlerRegistry, RequestContext};
use crate::context::Context;
use crate::error::ElkoError;
use crate::protocol::{RemoteError, ServerRequest};
use crate::queue::Queue;
use crate::writer::WriterHandle;

/// Shared state for the dispatcher task.
pub(crate) struct Dispatcher {
    pub registry: Arc<HandlerRegistry>,
    pub writer: WriterHandle,
    pub semaphore: Arc<Semaphore>,
    /// Parent of every handler's cancellation.
    pub shutdown: CancellationToken,
    /// Reports handler panics to the connection supervisor.
    pub failures: mpsc::UnboundedSender<ElkoError>,
}

impl Dispatcher {
    /// Pop and dispatch requests until the incoming queue closes.
    pub async fn run(self, incoming: Arc<Queue<ServerRequest>>) {
        while let Some(request) = incoming.pop().await {
            self.dispatch(request).await;
        }
        debug!("Incoming queue closed, dispatcher stopping");
    }

    async fn dispatch(&self, request: ServerRequest) {
        let ServerRequest { id, method, args } = request;

        if !self.registry.contains(&method) {
            warn!(request_id = id, %method, "No handler registered");
            self.reject(id, RemoteError::UNKNOWN_METHOD, format!("no handler for {}", method))
                .await;
            return;
        }

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(request_id = id, %method, "Handler capacity reached");
                self.reject(id, RemoteError::OVERLOADED, "handler capacity reached".to_string())
                    .await;
                return;
            }
        };

        let ctx = RequestContext::new(
            id,
            &method,
            self.writer.clone(),
            Context::with_token(id, self.shutdown.child_token()),
        );
        let registry = self.registry.clone();
        let failures = self.failures.clone();

        let handler_ctx = ctx.clone();
        let handler_method = method.clone();
        let task = tokio::spawn(async move {
            registry.dispatch(&handler_method, args, handler_ctx).await
        });

        tokio::spawn(async move {
            // Permit is held until the handler finishes.
            let _permit = permit;

            match task.await {
                Ok(Ok(())) => {
                    if !ctx.has_responded() && id != 0 {
                        debug!(request_id = id, %method, "Handler finished without responding");
                    }
                }
                Ok(Err(e)) => {
                    warn!(request_id = id, %method, error = %e, "Handler failed");
                    if !ctx.has_responded() {
                        let _ = ctx.error(RemoteError::HANDLER_ERROR, &e.to_string()).await;
                    }
                }
                Err(join) if join.is_panic() => {
                    error!(request_id = id, %method, "Handler panicked");
                    let _ = failures.send(ElkoError::TaskFailed(format!(
                        "handler {} panicked",
                        method
                    )));
                }
                Err(_) => {
                    debug!(request_id = id, %method, "Handler task cancelled");
                }
            }
        });
    }

    async fn reject(&self, id: u64, kind: &str, message: String) {
        if id == 0 {
            return;
        }
        let ctx = RequestContext::new(id, "", self.writer.clone(), Context::new(id));
        if let Err(e) = ctx.error(kind, &message).await {
            debug!(request_id = id, error = %e, "Could not send rejection");
        }
    }
}
