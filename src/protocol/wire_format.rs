//! Wire format encoding and decoding.
//!
//! After the one-byte protocol version, every frame is:
//! ```text
//! ┌────────┬──────────┬─────────────────┬──────────┐
//! │ Opcode │ Length   │ Payload         │ Tag      │
//! │ 1 byte │ 4 bytes  │ Length bytes    │ 8 bytes  │
//! │        │ uint32 BE│                 │          │
//! └────────┴──────────┴─────────────────┴──────────┘
//! ```
//!
//! `Length` counts payload bytes only. The tag covers the header and the
//! payload, so neither the opcode nor the length can be altered undetected.

use super::integrity::TAG_SIZE;

/// Protocol version byte written once, unframed, after connecting.
pub const PROTOCOL_VERSION: u8 = 1;

/// Header size in bytes (opcode + length).
pub const HEADER_SIZE: usize = 5;

/// Fixed per-frame overhead (header + tag).
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + TAG_SIZE;

/// Default maximum accepted payload size (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw opcode byte; its meaning depends on the frame direction.
    pub opcode: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(opcode: u8, payload_length: u32) -> Self {
        Self {
            opcode,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian length).
    ///
    /// # Example
    ///
    /// ```
    /// use elko_client::protocol::Header;
    ///
    /// let bytes = Header::new(2, 300).encode();
    /// assert_eq!(bytes, [2, 0, 0, 1, 44]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.opcode;
        buf[1..5].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            opcode: buf[0],
            payload_length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
        })
    }

    /// Total encoded size of the frame this header describes.
    #[inline]
    pub fn frame_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload_length as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(3, 100);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let bytes = Header::new(0x04, 0x0102_0304).encode();
        assert_eq!(bytes, [0x04, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(Header::decode(&[1, 0, 0, 0]).is_none());
    }

    #[test]
    fn test_frame_len_includes_tag() {
        assert_eq!(Header::new(1, 0).frame_len(), 13);
        assert_eq!(Header::new(1, 7).frame_len(), 20);
    }

    #[test]
    fn test_max_length_header() {
        let header = Header::new(1, u32::MAX);
        assert_eq!(Header::decode(&header.encode()).unwrap().payload_length, u32::MAX);
    }
}
