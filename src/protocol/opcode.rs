//! Direction-scoped opcode spaces.
//!
//! Client-sent and server-sent frames use separate numeric opcode spaces.
//! The same byte means different things depending on who sent it, so the
//! decoder is always parameterised by the opcode type it expects:
//!
//! ```text
//! client → server            server → client
//! 1 Heartbeat                1 Hello
//! 2 Hello                    2 Request
//! 3 Request                  3 Shutdown
//! 4 Response                 4 Response
//! 5 Shutdown
//! ```

use std::fmt;

use crate::error::ElkoError;

/// Which side produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Frames written by the worker.
    ClientToServer,
    /// Frames written by the coordinator.
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("client-to-server"),
            Direction::ServerToClient => f.write_str("server-to-client"),
        }
    }
}

/// An opcode space bound to one direction.
pub trait Opcode: Copy + fmt::Debug + Send + Sync + 'static {
    /// Direction this opcode space belongs to.
    const DIRECTION: Direction;

    /// Raw wire value.
    fn as_u8(self) -> u8;

    /// Parse a raw wire value, rejecting bytes outside this space.
    fn from_u8(value: u8) -> Result<Self, ElkoError>;
}

/// Opcodes of frames sent by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientOpcode {
    /// Liveness signal, empty payload.
    Heartbeat = 1,
    /// Session registration.
    Hello = 2,
    /// Request to another service via the coordinator.
    Request = 3,
    /// Response to a coordinator request.
    Response = 4,
    /// Worker-initiated close.
    Shutdown = 5,
}

impl Opcode for ClientOpcode {
    const DIRECTION: Direction = Direction::ClientToServer;

    #[inline]
    fn as_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Result<Self, ElkoError> {
        match value {
            1 => Ok(ClientOpcode::Heartbeat),
            2 => Ok(ClientOpcode::Hello),
            3 => Ok(ClientOpcode::Request),
            4 => Ok(ClientOpcode::Response),
            5 => Ok(ClientOpcode::Shutdown),
            opcode => Err(ElkoError::UnknownOpcode {
                direction: Self::DIRECTION,
                opcode,
            }),
        }
    }
}

/// Opcodes of frames sent by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerOpcode {
    /// Handshake acknowledgement.
    Hello = 1,
    /// Request for a handler registered on this worker.
    Request = 2,
    /// Coordinator-initiated close.
    Shutdown = 3,
    /// Response to a worker-issued request.
    Response = 4,
}

impl Opcode for ServerOpcode {
    const DIRECTION: Direction = Direction::ServerToClient;

    #[inline]
    fn as_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Result<Self, ElkoError> {
        match value {
            1 => Ok(ServerOpcode::Hello),
            2 => Ok(ServerOpcode::Request),
            3 => Ok(ServerOpcode::Shutdown),
            4 => Ok(ServerOpcode::Response),
            opcode => Err(ElkoError::UnknownOpcode {
                direction: Self::DIRECTION,
                opcode,
            }),
        }
    }
}
