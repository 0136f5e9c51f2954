//! Outstanding worker-issued requests, keyed by correlation id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use crate::context::Context;
use crate::error::{ElkoError, Result};
use crate::protocol::RemoteError;

/// What a waiting caller receives when its response arrives.
pub type Outcome = std::result::Result<Bytes, RemoteError>;

/// Map from correlation id to the caller awaiting its response.
#[derive(Debug, Default)]
pub struct PendingRequests {
    waiters: Mutex<HashMap<u64, oneshot::Sender<Outcome>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `id`.
    ///
    /// Fails if `id` is already awaiting a response.
    pub fn register(&self, id: u64) -> Result<oneshot::Receiver<Outcome>> {
        let mut waiters = self.lock();
        if waiters.contains_key(&id) {
            return Err(ElkoError::Protocol(format!(
                "request id {} is already in flight",
                id
            )));
        }
        let (tx, rx) = oneshot::channel();
        waiters.insert(id, tx);
        Ok(rx)
    }

    /// Deliver a response. Returns `false` if nobody is waiting for `id`.
    pub fn complete(&self, id: u64, outcome: Outcome) -> bool {
        let Some(tx) = self.lock().remove(&id) else {
            debug!(request_id = id, "Discarding response with no waiter");
            return false;
        };
        if tx.send(outcome).is_err() {
            debug!(request_id = id, "Waiter went away before its response");
            return false;
        }
        true
    }

    /// Stop tracking `id` without delivering anything.
    pub fn remove(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Release every waiter with [`ElkoError::ConnectionClosed`].
    pub fn fail_all(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Releasing pending requests");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Await the response for `id`, bounded by `ctx`.
    ///
    /// On deadline or cancellation the entry is dropped, so a response that
    /// arrives later is discarded.
    pub async fn wait(&self, ctx: &Context, id: u64, rx: oneshot::Receiver<Outcome>) -> Result<Bytes> {
        tokio::select! {
            outcome = rx => match outcome {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(remote)) => Err(ElkoError::Remote(remote)),
                Err(_) => Err(ElkoError::ConnectionClosed),
            },
            err = ctx.done() => {
                self.remove(id);
                debug!(request_id = id, error = %err, "Request abandoned");
                Err(err)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Outcome>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
