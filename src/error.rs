//! Error types for elko-client.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{Direction, RemoteError};
use crate::state::ConnectionState;

/// Main error type for all elko operations.
#[derive(Debug, Error)]
pub enum ElkoError {
    /// Transport failure while connecting, reading or writing.
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// The recomputed frame tag did not match the received one.
    #[error("Frame integrity check failed")]
    Integrity,

    /// Fewer bytes were available than the frame declares.
    #[error("Truncated frame: need {expected} bytes, have {available}")]
    TruncatedFrame {
        /// Bytes required for the complete frame.
        expected: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// Opcode outside the opcode space of the frame's direction.
    #[error("Unknown {direction} opcode: {opcode}")]
    UnknownOpcode {
        /// Direction whose opcode space was consulted.
        direction: Direction,
        /// Raw opcode byte.
        opcode: u8,
    },

    /// Outgoing payload cannot be described by the 32-bit length field.
    #[error("Payload of {0} bytes exceeds the frame length field")]
    PayloadTooLarge(usize),

    /// Incoming frame declares a payload above the configured maximum.
    #[error("Frame payload {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared payload length.
        size: u32,
        /// Configured maximum.
        max: u32,
    },

    /// Protocol violation (unexpected frame, duplicate id, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Lifecycle transition that the state machine does not allow.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// State before the attempted transition.
        from: ConnectionState,
        /// Requested state.
        to: ConnectionState,
    },

    /// No `ServerHello` arrived within the handshake timeout.
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The coordinator stayed silent longer than the liveness timeout.
    #[error("No traffic from coordinator for {0:?}")]
    LivenessTimeout(Duration),

    /// Request context deadline elapsed before the response arrived.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Request context was cancelled.
    #[error("Request cancelled")]
    Cancelled,

    /// Connection closed while the operation was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - outgoing queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// The coordinator answered a request with an error.
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    /// No handler registered for the requested method.
    #[error("Handler not found for method: {0}")]
    HandlerNotFound(String),

    /// Invalid or missing configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task panicked or was aborted.
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl ElkoError {
    /// Whether this error terminates the connection.
    ///
    /// Request-local failures only concern the caller awaiting that request.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ElkoError::DeadlineExceeded
                | ElkoError::Cancelled
                | ElkoError::Remote(_)
                | ElkoError::BackpressureTimeout
                | ElkoError::HandlerNotFound(_)
        )
    }
}

/// Result type alias using ElkoError.
pub type Result<T> = std::result::Result<T, ElkoError>;
