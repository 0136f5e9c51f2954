//! One live coordinator connection and its handshake.
//!
//! The handshake is the only phase where the socket is used from a single
//! task. Afterwards [`Connection::into_parts`] splits it so the reader and
//! the writer own one half each.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, warn};

use crate::error::{ElkoError, Result};
use crate::protocol::{
    ClientHello, ClientMessage, FrameBuffer, IntegrityKey, ServerHello, ServerMessage,
    ServerOpcode, Shutdown, PROTOCOL_VERSION,
};

/// Size of each socket read.
pub(crate) const READ_CHUNK_SIZE: usize = 64 * 1024;

/// How the handshake ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Session established. Carries the `ServerHello` when one was awaited.
    Accepted(Option<ServerHello>),
    /// The coordinator sent `Shutdown` instead of `Hello`.
    Shutdown(Shutdown),
}

/// Socket plus the inbound frame buffer that outlives the handshake.
pub struct Connection<S> {
    stream: S,
    buffer: FrameBuffer<ServerOpcode>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, key: Arc<IntegrityKey>, max_payload_size: u32) -> Self {
        Self {
            stream,
            buffer: FrameBuffer::with_max_payload(key, max_payload_size),
        }
    }

    /// Send the version byte and `ClientHello`, then optionally wait for
    /// `ServerHello`.
    ///
    /// With `await_hello = None` the session is considered established as
    /// soon as the hello is written.
    pub async fn handshake(
        &mut self,
        key: &IntegrityKey,
        hello: &ClientHello,
        await_hello: Option<Duration>,
    ) -> Result<HandshakeOutcome> {
        let sealed = ClientMessage::Hello(hello.clone()).seal(key)?;

        let mut opening = Vec::with_capacity(1 + sealed.size());
        opening.push(PROTOCOL_VERSION);
        opening.extend_from_slice(&sealed.to_vec());
        self.stream.write_all(&opening).await?;
        self.stream.flush().await?;
        debug!(
            service_id = %hello.service_id,
            instance_id = ?hello.instance_id,
            "Sent version byte and ClientHello"
        );

        let Some(timeout) = await_hello else {
            return Ok(HandshakeOutcome::Accepted(None));
        };

        match tokio::time::timeout(timeout, self.read_server_hello()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ElkoError::HandshakeTimeout(timeout)),
        }
    }

    async fn read_server_hello(&mut self) -> Result<HandshakeOutcome> {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return match ServerMessage::from_frame(&frame)? {
                    ServerMessage::Hello(hello) => {
                        debug!(node_id = %hello.node_id, "Received ServerHello");
                        Ok(HandshakeOutcome::Accepted(Some(hello)))
                    }
                    ServerMessage::Shutdown(shutdown) => {
                        warn!(reason = %shutdown.reason, "Coordinator shut down during handshake");
                        Ok(HandshakeOutcome::Shutdown(shutdown))
                    }
                    other => Err(ElkoError::Protocol(format!(
                        "expected ServerHello, received {:?}",
                        other.opcode()
                    ))),
                };
            }

            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                self.buffer.finish()?;
                return Err(ElkoError::ConnectionClosed);
            }
            self.buffer.extend(&chunk[..n]);
        }
    }

    /// Split into independently owned halves.
    ///
    /// The returned buffer still holds any bytes that arrived after
    /// `ServerHello` in the same read.
    pub fn into_parts(self) -> (ReadHalf<S>, WriteHalf<S>, FrameBuffer<ServerOpcode>) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (read_half, write_half, self.buffer)
    }
}
