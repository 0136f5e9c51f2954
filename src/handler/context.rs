//! Request context for handlers.
//!
//! Provides methods for answering a coordinator request:
//! - `respond` - send a MsgPack-encoded result
//! - `respond_raw` - send pre-encoded result bytes
//! - `error` - send a failure with a kind and a message
//!
//! A request is answered at most once. Requests with id `0` expect no
//! answer; responding to them is a no-op.
//!
//! # Example
//!
//! ```ignore
//! async fn charge(amount: u64, ctx: RequestContext) -> Result<()> {
//!     if amount == 0 {
//!         return ctx.error("InvalidAmount", "amount must be positive").await;
//!     }
//!     ctx.respond(&amount).await
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use crate::codec::MsgPackCodec;
use crate::context::Context;
use crate::error::{ElkoError, Result};
use crate::protocol::{ClientMessage, RemoteError, Response};
use crate::writer::WriterHandle;

/// Context passed to request handlers.
///
/// `RequestContext` is `Clone`; all clones share the "already answered"
/// flag.
#[derive(Clone)]
pub struct RequestContext {
    request_id: u64,
    method: Arc<str>,
    writer: Option<WriterHandle>,
    context: Context,
    responded: Arc<AtomicBool>,
}

impl RequestContext {
    pub(crate) fn new(
        request_id: u64,
        method: &str,
        writer: WriterHandle,
        context: Context,
    ) -> Self {
        Self {
            request_id,
            method: Arc::from(method),
            writer: Some(writer),
            context,
            responded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Context without a connection; responses are discarded.
    pub fn detached(request_id: u64, method: &str) -> Self {
        Self {
            request_id,
            method: Arc::from(method),
            writer: None,
            context: Context::new(request_id),
            responded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Correlation id of the request.
    #[inline]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Cancelled when the connection shuts down.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Whether a response has already been sent.
    pub fn has_responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    /// Send a MsgPack-encoded result.
    pub async fn respond<T: Serialize + ?Sized>(&self, result: &T) -> Result<()> {
        let data = MsgPackCodec::encode_bytes(result)?;
        self.send(Response::ok(self.request_id, data)).await
    }

    /// Send result bytes as they are.
    pub async fn respond_raw(&self, result: Bytes) -> Result<()> {
        self.send(Response::ok(self.request_id, result)).await
    }

    /// Send an error response.
    pub async fn error(&self, kind: &str, message: &str) -> Result<()> {
        self.send(Response::err(self.request_id, RemoteError::new(kind, message)))
            .await
    }

    async fn send(&self, response: Response) -> Result<()> {
        if self.responded.swap(true, Ordering::AcqRel) {
            return Err(ElkoError::Protocol(format!(
                "request {} already answered",
                self.request_id
            )));
        }

        if self.request_id == 0 {
            debug!(method = %self.method, "Dropping response to fire-and-forget request");
            return Ok(());
        }

        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let sent = writer.send(&ClientMessage::Response(response)).await;
        if sent.is_err() {
            // Nothing was queued, so the request can still be answered.
            self.responded.store(false, Ordering::Release);
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::IntegrityKey;
    use crate::queue::Queue;
    use crate::writer::OutboundFrame;
    use std::time::Duration;

    fn connected(request_id: u64) -> (RequestContext, Arc<Queue<OutboundFrame>>) {
        let queue = Arc::new(Queue::unbounded());
        let writer = WriterHandle::new(queue.clone(), Arc::new(IntegrityKey::derive("billing")));
        let ctx = RequestContext::new(request_id, "charge", writer, Context::new(request_id));
        (ctx, queue)
    }

    #[test]
    fn test_context_accessors() {
        let ctx = RequestContext::detached(42, "charge");
        assert_eq!(ctx.request_id(), 42);
        assert_eq!(ctx.method(), "charge");
        assert!(!ctx.has_responded());
    }

    #[tokio::test]
    async fn test_respond_queues_response_frame() {
        let (ctx, queue) = connected(42);

        ctx.respond(&"paid").await.unwrap();

        assert!(ctx.has_responded());
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.try_pop().unwrap().opcode(),
            crate::protocol::ClientOpcode::Response
        );
    }

    #[tokio::test]
    async fn test_second_response_rejected() {
        let (ctx, queue) = connected(42);
        let clone = ctx.clone();

        ctx.respond_raw(Bytes::from_static(b"ok")).await.unwrap();
        let second = clone.error("Late", "too late").await;

        assert!(matches!(second, Err(ElkoError::Protocol(_))));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_leaves_request_unanswered() {
        let queue = Arc::new(Queue::bounded(1, Duration::from_millis(10)));
        let key = Arc::new(IntegrityKey::derive("billing"));
        queue
            .push(OutboundFrame::seal(&ClientMessage::Heartbeat, &key).unwrap())
            .unwrap();
        let writer = WriterHandle::new(queue.clone(), key);
        let ctx = RequestContext::new(42, "charge", writer, Context::new(42));

        let result = ctx.respond(&"paid").await;
        assert!(matches!(result, Err(ElkoError::BackpressureTimeout)));
        assert!(!ctx.has_responded());

        queue.try_pop().unwrap();
        ctx.error("HandlerError", "response could not be queued").await.unwrap();
        assert!(ctx.has_responded());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_fire_and_forget_request_sends_nothing() {
        let (ctx, queue) = connected(0);

        ctx.respond(&1u8).await.unwrap();

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_detached_context_discards_responses() {
        let ctx = RequestContext::detached(5, "charge");
        assert!(ctx.respond(&"x").await.is_ok());
    }
}
