//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 5 bytes
//! - `WaitingForBody`: Header parsed, need payload + tag
//!
//! Every extracted frame has already passed the integrity check, so callers
//! never see a payload that was not produced by a holder of the key.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use elko_client::protocol::{encode_frame, FrameBuffer, IntegrityKey, ServerOpcode};
//!
//! let key = Arc::new(IntegrityKey::derive("billing"));
//! let bytes = encode_frame(ServerOpcode::Hello, b"", &key).unwrap();
//!
//! let mut buffer = FrameBuffer::<ServerOpcode>::new(key);
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[3..]).unwrap();
//! assert_eq!(frames[0].opcode, ServerOpcode::Hello);
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::BytesMut;

use super::frame::Frame;
use super::integrity::{IntegrityKey, TAG_SIZE};
use super::opcode::Opcode;
use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use crate::error::{ElkoError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for complete header (need 5 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload and tag.
    WaitingForBody { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting verified frames.
///
/// Parameterised by the opcode space of the peer that writes the bytes.
pub struct FrameBuffer<O> {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Key used to verify frame tags.
    key: Arc<IntegrityKey>,
    /// Maximum allowed payload size.
    max_payload_size: u32,
    _opcode: PhantomData<fn() -> O>,
}

impl<O: Opcode> FrameBuffer<O> {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 16MB.
    pub fn new(key: Arc<IntegrityKey>) -> Self {
        Self::with_max_payload(key, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with custom max payload size.
    pub fn with_max_payload(key: Arc<IntegrityKey>, max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            key,
            max_payload_size,
            _opcode: PhantomData,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Stops at the first invalid frame and returns its error; frames
    /// decoded earlier in the same call are discarded with it. Use
    /// [`extend`](Self::extend) with [`next_frame`](Self::next_frame) to
    /// act on each frame before the next one is examined.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame<O>>> {
        self.extend(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Append data to the buffer without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete, authentic frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on an oversized, forged or mislabelled frame
    pub fn next_frame(&mut self) -> Result<Option<Frame<O>>> {
        let header = match self.state {
            State::WaitingForHeader => {
                let Some(header) = Header::decode(&self.buffer) else {
                    return Ok(None);
                };

                if header.payload_length > self.max_payload_size {
                    return Err(ElkoError::FrameTooLarge {
                        size: header.payload_length,
                        max: self.max_payload_size,
                    });
                }

                self.buffer.reserve(header.frame_len().saturating_sub(self.buffer.len()));
                self.state = State::WaitingForBody { header };
                header
            }
            State::WaitingForBody { header } => header,
        };

        let total = header.frame_len();
        if self.buffer.len() < total {
            return Ok(None);
        }

        let raw = self.buffer.split_to(total).freeze();
        self.state = State::WaitingForHeader;

        let body_end = total - TAG_SIZE;
        if !self.key.verify(&[&raw[..body_end]], &raw[body_end..]) {
            return Err(ElkoError::Integrity);
        }

        let opcode = O::from_u8(header.opcode)?;
        Ok(Some(Frame::new(opcode, raw.slice(HEADER_SIZE..body_end))))
    }

    /// Check that the stream ended on a frame boundary.
    ///
    /// Called when the peer closes the connection; leftover bytes mean the
    /// last frame was cut short.
    pub fn finish(&self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let expected = match self.state {
            State::WaitingForBody { header } => header.frame_len(),
            State::WaitingForHeader => HEADER_SIZE,
        };
        Err(ElkoError::TruncatedFrame {
            expected,
            available: self.buffer.len(),
        })
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}
