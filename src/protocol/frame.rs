//! Authenticated frames.
//!
//! [`SealedFrame`] is the outbound form: header, payload and tag kept in
//! separate buffers so the writer can hand them to `write_vectored`
//! without copying the payload. [`Frame`] is the inbound form after the
//! tag has been verified and the opcode resolved against its direction.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use elko_client::protocol::{decode_frame, encode_frame, ClientOpcode, Frame, IntegrityKey};
//!
//! let key = IntegrityKey::derive("billing");
//! let bytes = encode_frame(ClientOpcode::Request, b"hello", &key).unwrap();
//! let frame: Frame<ClientOpcode> = decode_frame(&bytes, &key).unwrap();
//!
//! assert_eq!(frame.opcode, ClientOpcode::Request);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::integrity::{IntegrityKey, TAG_SIZE};
use super::opcode::Opcode;
use super::wire_format::{Header, FRAME_OVERHEAD, HEADER_SIZE};
use crate::error::{ElkoError, Result};

/// A verified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<O> {
    /// Opcode resolved in the sender's opcode space.
    pub opcode: O,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl<O: Opcode> Frame<O> {
    /// Create a new frame.
    pub fn new(opcode: O, payload: Bytes) -> Self {
        Self { opcode, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// An outbound frame with its tag already computed.
#[derive(Debug, Clone)]
pub struct SealedFrame {
    /// Encoded header (opcode + length).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (can be empty for heartbeats).
    pub payload: Bytes,
    /// Integrity tag over header and payload.
    pub tag: [u8; TAG_SIZE],
}

impl SealedFrame {
    /// Build and tag a frame.
    ///
    /// Fails with [`ElkoError::PayloadTooLarge`] if the payload does not fit
    /// the 32-bit length field.
    pub fn seal<O: Opcode>(opcode: O, payload: Bytes, key: &IntegrityKey) -> Result<Self> {
        let length =
            u32::try_from(payload.len()).map_err(|_| ElkoError::PayloadTooLarge(payload.len()))?;
        let header = Header::new(opcode.as_u8(), length).encode();
        let tag = key.tag(&[&header[..], &payload[..]]);
        Ok(Self {
            header,
            payload,
            tag,
        })
    }

    /// Total size of this frame on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Copy the frame into one contiguous buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        buf.extend_from_slice(&self.header);
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.tag);
        buf
    }
}

/// Encode a complete frame as a single byte vector.
///
/// Produces `opcode ‖ length ‖ payload ‖ tag`.
pub fn encode_frame<O: Opcode>(opcode: O, payload: &[u8], key: &IntegrityKey) -> Result<Vec<u8>> {
    Ok(SealedFrame::seal(opcode, Bytes::copy_from_slice(payload), key)?.to_vec())
}

/// Decode and authenticate exactly one frame.
///
/// The tag is checked before the opcode is interpreted, so a frame whose
/// type byte was altered fails with [`ElkoError::Integrity`] rather than
/// being read as another message.
pub fn decode_frame<O: Opcode>(buf: &[u8], key: &IntegrityKey) -> Result<Frame<O>> {
    let header = Header::decode(buf).ok_or(ElkoError::TruncatedFrame {
        expected: FRAME_OVERHEAD,
        available: buf.len(),
    })?;

    let total = header.frame_len();
    if buf.len() < total {
        return Err(ElkoError::TruncatedFrame {
            expected: total,
            available: buf.len(),
        });
    }

    let body_end = total - TAG_SIZE;
    if !key.verify(&[&buf[..body_end]], &buf[body_end..total]) {
        return Err(ElkoError::Integrity);
    }

    let opcode = O::from_u8(header.opcode)?;

    if buf.len() > total {
        return Err(ElkoError::Protocol(format!(
            "{} trailing bytes after frame",
            buf.len() - total
        )));
    }

    Ok(Frame::new(
        opcode,
        Bytes::copy_from_slice(&buf[HEADER_SIZE..body_end]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientOpcode, Direction, ServerOpcode};

    fn key() -> IntegrityKey {
        IntegrityKey::derive("billing")
    }

    #[test]
    fn test_encode_layout() {
        let key = key();
        let bytes = encode_frame(ServerOpcode::Request, b"abc", &key).unwrap();

        assert_eq!(bytes.len(), HEADER_SIZE + 3 + TAG_SIZE);
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..5], &[0, 0, 0, 3]);
        assert_eq!(&bytes[5..8], b"abc");
        assert_eq!(&bytes[8..], &key.tag(&[&bytes[..8]]));
    }

    #[test]
    fn test_roundtrip_all_client_opcodes() {
        let key = key();
        for opcode in [
            ClientOpcode::Heartbeat,
            ClientOpcode::Hello,
            ClientOpcode::Request,
            ClientOpcode::Response,
            ClientOpcode::Shutdown,
        ] {
            let bytes = encode_frame(opcode, b"payload", &key).unwrap();
            let frame: Frame<ClientOpcode> = decode_frame(&bytes, &key).unwrap();
            assert_eq!(frame.opcode, opcode);
            assert_eq!(frame.payload(), b"payload");
        }
    }

    #[test]
    fn test_roundtrip_empty_payload() {
        let key = key();
        let bytes = encode_frame(ClientOpcode::Heartbeat, b"", &key).unwrap();
        assert_eq!(bytes.len(), FRAME_OVERHEAD);

        let frame: Frame<ClientOpcode> = decode_frame(&bytes, &key).unwrap();
        assert_eq!(frame.payload_len(), 0);
    }

    #[test]
    fn test_tampered_opcode_or_payload_fails_integrity() {
        let key = key();
        let bytes = encode_frame(ServerOpcode::Request, b"transfer 100", &key).unwrap();

        let body_end = bytes.len() - TAG_SIZE;
        for index in (0..body_end).filter(|i| !(1..HEADER_SIZE).contains(i)) {
            for bit in 0..8 {
                let mut tampered = bytes.clone();
                tampered[index] ^= 1 << bit;
                let result = decode_frame::<ServerOpcode>(&tampered, &key);
                assert!(
                    matches!(result, Err(ElkoError::Integrity)),
                    "byte {} bit {} not detected",
                    index,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_tampered_length_is_rejected() {
        let key = key();
        let bytes = encode_frame(ServerOpcode::Request, b"transfer 100", &key).unwrap();

        for index in 1..HEADER_SIZE {
            for bit in 0..8 {
                let mut tampered = bytes.clone();
                tampered[index] ^= 1 << bit;
                let result = decode_frame::<ServerOpcode>(&tampered, &key);
                assert!(
                    matches!(
                        result,
                        Err(ElkoError::Integrity) | Err(ElkoError::TruncatedFrame { .. })
                    ),
                    "byte {} bit {} accepted",
                    index,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_tampered_tag_fails_integrity() {
        let key = key();
        let mut bytes = encode_frame(ServerOpcode::Hello, b"", &key).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;

        assert!(matches!(
            decode_frame::<ServerOpcode>(&bytes, &key),
            Err(ElkoError::Integrity)
        ));
    }

    #[test]
    fn test_wrong_key_fails_integrity() {
        let bytes = encode_frame(ServerOpcode::Hello, b"", &key()).unwrap();
        let other = IntegrityKey::derive("search");

        assert!(matches!(
            decode_frame::<ServerOpcode>(&bytes, &other),
            Err(ElkoError::Integrity)
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let key = key();
        let bytes = encode_frame(ServerOpcode::Request, b"0123456789", &key).unwrap();

        let result = decode_frame::<ServerOpcode>(&bytes[..bytes.len() - 1], &key);
        assert!(matches!(
            result,
            Err(ElkoError::TruncatedFrame {
                expected: 23,
                available: 22
            })
        ));

        let result = decode_frame::<ServerOpcode>(&bytes[..3], &key);
        assert!(matches!(result, Err(ElkoError::TruncatedFrame { .. })));
    }

    #[test]
    fn test_opcode_from_wrong_direction_rejected() {
        let key = key();
        // Client Shutdown (5) has no meaning in the server opcode space.
        let bytes = encode_frame(ClientOpcode::Shutdown, b"", &key).unwrap();

        let result = decode_frame::<ServerOpcode>(&bytes, &key);
        assert!(matches!(
            result,
            Err(ElkoError::UnknownOpcode {
                direction: Direction::ServerToClient,
                opcode: 5
            })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let key = key();
        let mut bytes = encode_frame(ServerOpcode::Hello, b"", &key).unwrap();
        bytes.push(0);

        assert!(matches!(
            decode_frame::<ServerOpcode>(&bytes, &key),
            Err(ElkoError::Protocol(_))
        ));
    }

    #[test]
    fn test_sealed_frame_parts_match_encoded_bytes() {
        let key = key();
        let sealed =
            SealedFrame::seal(ClientOpcode::Response, Bytes::from_static(b"ok"), &key).unwrap();

        assert_eq!(sealed.size(), FRAME_OVERHEAD + 2);
        assert_eq!(
            sealed.to_vec(),
            encode_frame(ClientOpcode::Response, b"ok", &key).unwrap()
        );
    }
}
