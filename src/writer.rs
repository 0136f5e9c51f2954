//! Dedicated writer task for outgoing frames.
//!
//! The socket's write half is owned by exactly one task, so frames never
//! interleave. Producers enqueue already-sealed frames on the outgoing
//! [`Queue`] through a cloneable [`WriterHandle`]; the writer drains them in
//! FIFO order.
//!
//! # Architecture
//!
//! ```text
//! Request call sites ─┐
//! Handler responses  ─┼─► Queue<OutboundFrame> ─► Writer Task ─► TCP
//! Heartbeat ticker   ─┘
//! ```
//!
//! Every wakeup drains up to 64 queued frames and writes them with a single
//! vectored write, continuing after partial writes.

use std::io::IoSlice;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{ElkoError, Result};
use crate::protocol::{ClientMessage, ClientOpcode, IntegrityKey, SealedFrame};
use crate::queue::Queue;

/// Maximum frames to batch in a single write operation.
pub const MAX_BATCH_SIZE: usize = 64;

/// A sealed frame waiting in the outgoing queue.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    opcode: ClientOpcode,
    sealed: SealedFrame,
}

impl OutboundFrame {
    /// Encode and tag a message.
    ///
    /// Sealing happens on the producer side so encoding errors reach the
    /// caller instead of the writer task.
    pub fn seal(message: &ClientMessage, key: &IntegrityKey) -> Result<Self> {
        Ok(Self {
            opcode: message.opcode(),
            sealed: message.seal(key)?,
        })
    }

    pub fn opcode(&self) -> ClientOpcode {
        self.opcode
    }

    /// Total size on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        self.sealed.size()
    }

    fn parts(&self) -> [&[u8]; 3] {
        [
            &self.sealed.header[..],
            &self.sealed.payload[..],
            &self.sealed.tag[..],
        ]
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across handlers and callers.
#[derive(Clone)]
pub struct WriterHandle {
    queue: Arc<Queue<OutboundFrame>>,
    key: Arc<IntegrityKey>,
}

impl WriterHandle {
    pub fn new(queue: Arc<Queue<OutboundFrame>>, key: Arc<IntegrityKey>) -> Self {
        Self { queue, key }
    }

    /// Queue a message, waiting for space if backpressure is active.
    pub async fn send(&self, message: &ClientMessage) -> Result<()> {
        let frame = OutboundFrame::seal(message, &self.key)?;
        self.queue.push_wait(frame).await
    }

    /// Queue a message without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, message: &ClientMessage) -> Result<()> {
        let frame = OutboundFrame::seal(message, &self.key)?;
        self.queue.push(frame)
    }

    /// Queue a control message past the depth limit.
    pub fn send_control(&self, message: &ClientMessage) -> Result<()> {
        let frame = OutboundFrame::seal(message, &self.key)?;
        self.queue.push_unbounded(frame)
    }

    /// Check if backpressure is currently active.
    pub fn is_backpressure_active(&self) -> bool {
        self.queue
            .max_depth()
            .map_or(false, |max| self.queue.len() >= max)
    }

    /// Get current pending frame count.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }
}

/// Why the writer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A `ClientShutdown` frame was written; nothing follows it.
    ShutdownSent,
    /// The queue was closed and fully drained.
    Drained,
}

/// Spawn the writer task.
pub fn spawn_writer_task<W>(
    queue: Arc<Queue<OutboundFrame>>,
    writer: W,
) -> JoinHandle<Result<WriteOutcome>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(write_loop(queue, writer))
}

/// Main writer loop - pops frames and writes them to the socket.
///
/// Returns after writing a `ClientShutdown` frame or once the queue is
/// closed and empty. Either way the write half is shut down.
pub async fn write_loop<W>(queue: Arc<Queue<OutboundFrame>>, mut writer: W) -> Result<WriteOutcome>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let Some(first) = queue.pop().await else {
            let _ = writer.shutdown().await;
            debug!("Outgoing queue closed, writer stopping");
            return Ok(WriteOutcome::Drained);
        };

        let mut shutdown = first.opcode() == ClientOpcode::Shutdown;
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while !shutdown && batch.len() < MAX_BATCH_SIZE {
            match queue.try_pop() {
                Some(frame) => {
                    shutdown = frame.opcode() == ClientOpcode::Shutdown;
                    batch.push(frame);
                }
                None => break,
            }
        }

        trace!(frames = batch.len(), "Writing batch");
        write_batch(&mut writer, &batch).await?;

        if shutdown {
            let _ = writer.shutdown().await;
            debug!("ClientShutdown written, writer stopping");
            return Ok(WriteOutcome::ShutdownSent);
        }
    }
}

/// Write a batch of frames using vectored I/O.
///
/// Each frame contributes its header, payload and tag as separate slices.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(ElkoError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlices for the bytes of `batch` past `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for part in batch.iter().flat_map(OutboundFrame::parts) {
        let end = offset + part.len();
        if !part.is_empty() && skip_bytes < end {
            slices.push(IoSlice::new(&part[skip_bytes.saturating_sub(offset)..]));
        }
        offset = end;
    }

    slices
}
