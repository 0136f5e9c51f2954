//! FIFO queues between producers and the connection tasks.
//!
//! The outgoing queue feeds the single writer task from any number of call
//! sites; the incoming queue hands coordinator requests from the reader to
//! the handler dispatcher. `push` never waits on socket I/O. Each push wakes
//! at most one waiting `pop`.
//!
//! A queue may carry a depth limit. Once it is reached, [`Queue::push`]
//! fails fast with [`ElkoError::BackpressureTimeout`] and
//! [`Queue::push_wait`] suspends until space frees up or the backpressure
//! timeout elapses.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{ElkoError, Result};

/// Default backpressure timeout for [`Queue::push_wait`].
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Multi-producer FIFO queue with async `pop`.
#[derive(Debug)]
pub struct Queue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Notify,
    not_full: Notify,
    closed: AtomicBool,
    max_depth: Option<usize>,
    backpressure_timeout: Duration,
}

impl<T> Queue<T> {
    /// Create a queue without a depth limit.
    pub fn unbounded() -> Self {
        Self::new(None, DEFAULT_BACKPRESSURE_TIMEOUT)
    }

    /// Create a queue holding at most `max_depth` items.
    pub fn bounded(max_depth: usize, backpressure_timeout: Duration) -> Self {
        Self::new(Some(max_depth), backpressure_timeout)
    }

    pub fn new(max_depth: Option<usize>, backpressure_timeout: Duration) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            closed: AtomicBool::new(false),
            max_depth,
            backpressure_timeout,
        }
    }

    /// Append an item without waiting.
    ///
    /// Fails with [`ElkoError::ConnectionClosed`] after [`close`](Self::close)
    /// and with [`ElkoError::BackpressureTimeout`] when the queue is full.
    pub fn push(&self, item: T) -> Result<()> {
        self.try_push(item).map_err(|(err, _)| err)
    }

    /// Append an item, waiting up to the backpressure timeout for space.
    pub async fn push_wait(&self, mut item: T) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.backpressure_timeout;

        loop {
            let not_full = self.not_full.notified();
            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err((ElkoError::BackpressureTimeout, Some(rejected))) => item = rejected,
                Err((err, _)) => return Err(err),
            }

            if tokio::time::timeout_at(deadline, not_full).await.is_err() {
                return Err(ElkoError::BackpressureTimeout);
            }
        }
    }

    /// Append an item ignoring the depth limit.
    ///
    /// Reserved for control messages that must not be dropped, such as the
    /// final shutdown frame.
    pub fn push_unbounded(&self, item: T) -> Result<()> {
        if self.is_closed() {
            return Err(ElkoError::ConnectionClosed);
        }
        self.lock().push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    fn try_push(&self, item: T) -> std::result::Result<(), (ElkoError, Option<T>)> {
        if self.is_closed() {
            return Err((ElkoError::ConnectionClosed, None));
        }

        let mut items = self.lock();
        if let Some(max) = self.max_depth {
            if items.len() >= max {
                return Err((ElkoError::BackpressureTimeout, Some(item)));
            }
        }
        items.push_back(item);
        drop(items);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the head item, suspending until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let not_empty = self.not_empty.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            not_empty.await;
        }
    }

    /// Remove the head item if one is queued.
    pub fn try_pop(&self) -> Option<T> {
        let mut items = self.lock();
        let item = items.pop_front()?;
        let more = !items.is_empty();
        drop(items);

        if more {
            // A push may have woken a waiter that lost the race for its item.
            self.not_empty.notify_one();
        }
        self.not_full.notify_one();
        Some(item)
    }

    /// Stop accepting items and wake every waiter.
    ///
    /// Items already queued can still be popped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Configured depth limit, if any.
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
