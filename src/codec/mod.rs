//! Codec module - serialization/deserialization for payloads.
//!
//! The frame codec treats payloads as opaque bytes. This module supplies the
//! layer above it:
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`, structs as maps)
//! - [`Payload`] - the encode/decode capability every message body implements
//!
//! # Example
//!
//! ```
//! use elko_client::codec::{MsgPackCodec, Payload};
//! use elko_client::protocol::ClientHello;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let hello = ClientHello::new("billing", None);
//! let bytes = hello.to_payload().unwrap();
//! assert_eq!(ClientHello::from_payload(&bytes).unwrap(), hello);
//! ```

mod msgpack;

pub use msgpack::{MsgPackCodec, Payload};
