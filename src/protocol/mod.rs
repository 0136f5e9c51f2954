//! Protocol module - wire format, framing, and message types.
//!
//! This module implements the binary protocol spoken with the coordinator:
//! - 5-byte header encoding/decoding and the trailing 8-byte tag
//! - Integrity key derivation and constant-time tag checks
//! - Direction-scoped opcodes
//! - Frame buffer for accumulating partial reads
//! - Message payloads bound to their opcodes

mod frame;
mod frame_buffer;
mod integrity;
mod messages;
mod opcode;
mod wire_format;

pub use frame::{decode_frame, encode_frame, Frame, SealedFrame};
pub use frame_buffer::FrameBuffer;
pub use integrity::{IntegrityKey, KEY_SIZE, TAG_SIZE};
pub use messages::{
    ClientHello, ClientMessage, ClientRequest, Heartbeat, LogEntry, RemoteError, Response,
    ServerHello, ServerMessage, ServerRequest, Shutdown, LOG_SERVICE,
};
pub use opcode::{ClientOpcode, Direction, Opcode, ServerOpcode};
pub use wire_format::{
    Header, DEFAULT_MAX_PAYLOAD_SIZE, FRAME_OVERHEAD, HEADER_SIZE, PROTOCOL_VERSION,
};
