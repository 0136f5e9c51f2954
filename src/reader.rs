//! Reader task: the only consumer of the socket's read half.
//!
//! Frames are verified and dispatched strictly in arrival order. A frame
//! that fails verification stops the loop before anything after it is
//! looked at, so a forged request never reaches a handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, trace};

use crate::connection::READ_CHUNK_SIZE;
use crate::error::{ElkoError, Result};
use crate::pending::PendingRequests;
use crate::protocol::{FrameBuffer, ServerMessage, ServerOpcode, ServerRequest, Shutdown};
use crate::queue::Queue;

/// How the coordinator ended the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `ServerShutdown` received.
    RemoteShutdown(Shutdown),
    /// Socket closed on a frame boundary.
    RemoteClosed,
}

/// Where decoded frames go.
pub struct ReaderRoutes {
    /// Responses to worker-issued requests.
    pub pending: Arc<PendingRequests>,
    /// Coordinator requests awaiting a handler.
    pub incoming: Arc<Queue<ServerRequest>>,
}

/// Read and dispatch frames until the coordinator shuts down or closes.
///
/// `buffer` may already hold bytes received during the handshake; they
/// are dispatched before the first read. With a `liveness` timeout, a
/// silence longer than it fails with [`ElkoError::LivenessTimeout`].
pub async fn read_loop<R>(
    mut reader: R,
    mut buffer: FrameBuffer<ServerOpcode>,
    routes: ReaderRoutes,
    liveness: Option<Duration>,
) -> Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        while let Some(frame) = buffer.next_frame()? {
            trace!(opcode = ?frame.opcode, len = frame.payload_len(), "Frame received");
            if let Some(outcome) = dispatch(ServerMessage::from_frame(&frame)?, &routes)? {
                return Ok(outcome);
            }
        }

        let n = match liveness {
            Some(limit) => tokio::time::timeout(limit, reader.read(&mut chunk))
                .await
                .map_err(|_| ElkoError::LivenessTimeout(limit))??,
            None => reader.read(&mut chunk).await?,
        };

        if n == 0 {
            buffer.finish()?;
            debug!("Coordinator closed the connection");
            return Ok(ReadOutcome::RemoteClosed);
        }
        buffer.extend(&chunk[..n]);
    }
}

fn dispatch(message: ServerMessage, routes: &ReaderRoutes) -> Result<Option<ReadOutcome>> {
    match message {
        ServerMessage::Hello(hello) => {
            debug!(node_id = %hello.node_id, "ServerHello");
        }
        ServerMessage::Request(request) => {
            trace!(request_id = request.id, method = %request.method, "Coordinator request");
            routes.incoming.push(request)?;
        }
        ServerMessage::Response(response) => {
            let id = response.id;
            routes.pending.complete(id, response.into_outcome());
        }
        ServerMessage::Shutdown(shutdown) => {
            info!(reason = %shutdown.reason, "Coordinator requested shutdown");
            return Ok(Some(ReadOutcome::RemoteShutdown(shutdown)));
        }
    }
    Ok(None)
}
