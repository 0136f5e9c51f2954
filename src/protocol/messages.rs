//! Message payloads and their opcode bindings.
//!
//! Each opcode carries exactly one payload type. [`ClientMessage`] and
//! [`ServerMessage`] tie the two together so the decoder picks the payload
//! type from the opcode instead of guessing from the bytes.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::Location;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::frame::{Frame, SealedFrame};
use super::integrity::IntegrityKey;
use super::opcode::{ClientOpcode, ServerOpcode};
use crate::codec::{MsgPackCodec, Payload};
use crate::error::Result;

/// Session registration sent right after the version byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    /// Service this worker implements.
    pub service_id: String,
    /// Optional instance number when several workers share a service.
    pub instance_id: Option<u64>,
}

impl ClientHello {
    pub fn new(service_id: impl Into<String>, instance_id: Option<u64>) -> Self {
        Self {
            service_id: service_id.into(),
            instance_id,
        }
    }
}

impl Payload for ClientHello {}

/// Handshake acknowledgement from the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    #[serde(default)]
    pub node_id: String,
}

impl Payload for ServerHello {
    fn from_payload(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        MsgPackCodec::decode(bytes)
    }
}

/// Liveness signal. Always travels with an empty payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat;

impl Payload for Heartbeat {
    fn to_payload(&self) -> Result<Bytes> {
        Ok(Bytes::new())
    }

    fn from_payload(_bytes: &[u8]) -> Result<Self> {
        Ok(Heartbeat)
    }
}

/// Worker-issued request routed by the coordinator to another service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Correlation id; `0` means no response is expected.
    pub id: u64,
    /// Target service.
    pub service: String,
    /// MsgPack-encoded arguments.
    pub args: Bytes,
}

impl Payload for ClientRequest {}

/// Coordinator-issued request for a handler on this worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRequest {
    /// Correlation id; `0` means the coordinator does not want a response.
    pub id: u64,
    /// Registered handler name.
    pub method: String,
    /// MsgPack-encoded arguments.
    pub args: Bytes,
}

impl Payload for ServerRequest {}

/// Failure reported in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    /// Machine-readable category, e.g. [`RemoteError::UNKNOWN_METHOD`].
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

impl RemoteError {
    /// No handler is registered under the requested method.
    pub const UNKNOWN_METHOD: &'static str = "UnknownMethod";
    /// Too many handlers are already running.
    pub const OVERLOADED: &'static str = "Overloaded";
    /// The handler returned an error.
    pub const HANDLER_ERROR: &'static str = "HandlerError";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a request, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id of the request being answered.
    pub id: u64,
    /// MsgPack-encoded result; empty when `error` is set.
    #[serde(default)]
    pub result: Bytes,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

impl Response {
    /// Successful response.
    pub fn ok(id: u64, result: Bytes) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    /// Failed response.
    pub fn err(id: u64, error: RemoteError) -> Self {
        Self {
            id,
            result: Bytes::new(),
            error: Some(error),
        }
    }

    /// Split into the value a waiting caller receives.
    pub fn into_outcome(self) -> std::result::Result<Bytes, RemoteError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

impl Payload for Response {}

/// Orderly close, from either side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shutdown {
    #[serde(default)]
    pub reason: String,
}

impl Shutdown {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Payload for Shutdown {
    fn from_payload(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        MsgPackCodec::decode(bytes)
    }
}

/// Service that stores worker log entries.
pub const LOG_SERVICE: &str = "log.persist";

/// Log record fired at [`LOG_SERVICE`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Label of the context the entry was written under.
    #[serde(rename = "ctx")]
    pub context: String,
    #[serde(rename = "msg")]
    pub message: String,
    pub error: bool,
    /// MsgPack-encoded attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl LogEntry {
    /// Entry stamped with the current time.
    pub fn new(message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        Self {
            message: message.into(),
            timestamp,
            ..Self::default()
        }
    }

    /// Mark the entry as an error raised at `location`.
    ///
    /// A backtrace is attached when `RUST_BACKTRACE` enables capture.
    pub fn error_at(mut self, location: &Location<'_>) -> Self {
        self.error = true;
        self.file = Some(location.file().to_string());
        self.line = Some(location.line());
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            self.stacktrace = Some(backtrace.to_string());
        }
        self
    }
}

impl Payload for LogEntry {}

/// A message written by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Heartbeat,
    Hello(ClientHello),
    Request(ClientRequest),
    Response(Response),
    Shutdown(Shutdown),
}

impl ClientMessage {
    pub fn opcode(&self) -> ClientOpcode {
        match self {
            ClientMessage::Heartbeat => ClientOpcode::Heartbeat,
            ClientMessage::Hello(_) => ClientOpcode::Hello,
            ClientMessage::Request(_) => ClientOpcode::Request,
            ClientMessage::Response(_) => ClientOpcode::Response,
            ClientMessage::Shutdown(_) => ClientOpcode::Shutdown,
        }
    }

    pub fn to_payload(&self) -> Result<Bytes> {
        match self {
            ClientMessage::Heartbeat => Heartbeat.to_payload(),
            ClientMessage::Hello(hello) => hello.to_payload(),
            ClientMessage::Request(request) => request.to_payload(),
            ClientMessage::Response(response) => response.to_payload(),
            ClientMessage::Shutdown(shutdown) => shutdown.to_payload(),
        }
    }

    /// Decode the payload type bound to `opcode`.
    pub fn decode(opcode: ClientOpcode, payload: &[u8]) -> Result<Self> {
        Ok(match opcode {
            ClientOpcode::Heartbeat => {
                Heartbeat::from_payload(payload)?;
                ClientMessage::Heartbeat
            }
            ClientOpcode::Hello => ClientMessage::Hello(ClientHello::from_payload(payload)?),
            ClientOpcode::Request => ClientMessage::Request(ClientRequest::from_payload(payload)?),
            ClientOpcode::Response => ClientMessage::Response(Response::from_payload(payload)?),
            ClientOpcode::Shutdown => ClientMessage::Shutdown(Shutdown::from_payload(payload)?),
        })
    }

    pub fn from_frame(frame: &Frame<ClientOpcode>) -> Result<Self> {
        Self::decode(frame.opcode, frame.payload())
    }

    /// Encode and tag for the wire.
    pub fn seal(&self, key: &IntegrityKey) -> Result<SealedFrame> {
        SealedFrame::seal(self.opcode(), self.to_payload()?, key)
    }
}

/// A message written by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Hello(ServerHello),
    Request(ServerRequest),
    Response(Response),
    Shutdown(Shutdown),
}

impl ServerMessage {
    pub fn opcode(&self) -> ServerOpcode {
        match self {
            ServerMessage::Hello(_) => ServerOpcode::Hello,
            ServerMessage::Request(_) => ServerOpcode::Request,
            ServerMessage::Response(_) => ServerOpcode::Response,
            ServerMessage::Shutdown(_) => ServerOpcode::Shutdown,
        }
    }

    pub fn to_payload(&self) -> Result<Bytes> {
        match self {
            ServerMessage::Hello(hello) => hello.to_payload(),
            ServerMessage::Request(request) => request.to_payload(),
            ServerMessage::Response(response) => response.to_payload(),
            ServerMessage::Shutdown(shutdown) => shutdown.to_payload(),
        }
    }

    /// Decode the payload type bound to `opcode`.
    pub fn decode(opcode: ServerOpcode, payload: &[u8]) -> Result<Self> {
        Ok(match opcode {
            ServerOpcode::Hello => ServerMessage::Hello(ServerHello::from_payload(payload)?),
            ServerOpcode::Request => ServerMessage::Request(ServerRequest::from_payload(payload)?),
            ServerOpcode::Response => ServerMessage::Response(Response::from_payload(payload)?),
            ServerOpcode::Shutdown => ServerMessage::Shutdown(Shutdown::from_payload(payload)?),
        })
    }

    pub fn from_frame(frame: &Frame<ServerOpcode>) -> Result<Self> {
        Self::decode(frame.opcode, frame.payload())
    }

    /// Encode and tag for the wire.
    pub fn seal(&self, key: &IntegrityKey) -> Result<SealedFrame> {
        SealedFrame::seal(self.opcode(), self.to_payload()?, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_frame;

    #[test]
    fn test_log_entry_uses_short_field_names() {
        #[derive(Deserialize)]
        struct Stored {
            ctx: String,
            msg: String,
            error: bool,
            line: Option<u32>,
        }

        let mut entry = LogEntry::new("card declined").error_at(Location::caller());
        entry.context = "12".to_string();
        let bytes = entry.to_payload().unwrap();

        let stored: Stored = MsgPackCodec::decode(&bytes).unwrap();
        assert_eq!(stored.ctx, "12");
        assert_eq!(stored.msg, "card declined");
        assert!(stored.error);
        assert!(stored.line.is_some());
        assert!(entry.timestamp > 0);
        assert_eq!(entry.file.as_deref(), Some(file!()));
    }

    #[test]
    fn test_client_hello_without_instance() {
        let hello = ClientHello::new("billing", None);
        let bytes = hello.to_payload().unwrap();

        let decoded = ClientHello::from_payload(&bytes).unwrap();
        assert_eq!(decoded.service_id, "billing");
        assert_eq!(decoded.instance_id, None);
    }

    #[test]
    fn test_heartbeat_payload_is_empty() {
        assert!(ClientMessage::Heartbeat.to_payload().unwrap().is_empty());
    }

    #[test]
    fn test_empty_server_hello_and_shutdown_decode_to_default() {
        assert_eq!(
            ServerMessage::decode(ServerOpcode::Hello, b"").unwrap(),
            ServerMessage::Hello(ServerHello::default())
        );
        assert_eq!(
            ServerMessage::decode(ServerOpcode::Shutdown, b"").unwrap(),
            ServerMessage::Shutdown(Shutdown::default())
        );
    }

    #[test]
    fn test_empty_request_payload_is_rejected() {
        assert!(ServerMessage::decode(ServerOpcode::Request, b"").is_err());
    }

    #[test]
    fn test_opcode_selects_payload_type() {
        let request = ServerRequest {
            id: 9,
            method: "charge".to_string(),
            args: Bytes::from_static(b"\x01"),
        };
        let payload = request.to_payload().unwrap();

        match ServerMessage::decode(ServerOpcode::Request, &payload).unwrap() {
            ServerMessage::Request(decoded) => assert_eq!(decoded, request),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_response_outcome() {
        let ok = Response::ok(3, Bytes::from_static(b"x"));
        assert_eq!(ok.into_outcome().unwrap(), Bytes::from_static(b"x"));

        let err = Response::err(3, RemoteError::new(RemoteError::OVERLOADED, "busy"));
        let remote = err.into_outcome().unwrap_err();
        assert_eq!(remote.kind, "Overloaded");
        assert_eq!(remote.to_string(), "Overloaded: busy");
    }

    #[test]
    fn test_sealed_message_decodes_through_frame_codec() {
        let key = IntegrityKey::derive("billing");
        let message = ClientMessage::Shutdown(Shutdown::new("done"));
        let bytes = message.seal(&key).unwrap().to_vec();

        let frame = decode_frame::<ClientOpcode>(&bytes, &key).unwrap();
        assert_eq!(ClientMessage::from_frame(&frame).unwrap(), message);
    }
}
