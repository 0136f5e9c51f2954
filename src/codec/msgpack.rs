//! MsgPack codec using `rmp-serde`.
//!
//! Always use `to_vec_named`, never `to_vec`: the coordinator expects
//! struct-as-map format.
//!
//! - `to_vec` serializes structs as arrays (positional)
//! - `to_vec_named` serializes structs as maps (with field names)
//!
//! # Example
//!
//! ```
//! use elko_client::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Message = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// MessagePack codec for structured data.
///
/// Uses `rmp_serde::to_vec_named` so structs are serialized as maps
/// (with field names) rather than arrays (positional).
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode a value straight into `Bytes`.
    #[inline]
    pub fn encode_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
        Self::encode(value).map(Bytes::from)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Encode/decode capability of a frame payload.
///
/// The defaults use [`MsgPackCodec`]. Message types whose payload may be
/// empty on the wire override one or both methods.
pub trait Payload: Serialize + DeserializeOwned {
    /// Serialize into frame payload bytes.
    fn to_payload(&self) -> Result<Bytes> {
        MsgPackCodec::encode_bytes(self)
    }

    /// Deserialize from frame payload bytes.
    fn from_payload(bytes: &[u8]) -> Result<Self> {
        MsgPackCodec::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Invoice {
        id: u64,
        customer: String,
        lines: Vec<String>,
        discount: Option<u32>,
    }

    #[test]
    fn test_struct_roundtrip() {
        let original = Invoice {
            id: 42,
            customer: "acme".to_string(),
            lines: vec!["a".to_string(), "b".to_string()],
            discount: None,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: Invoice = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_structs_encode_as_maps() {
        let encoded = MsgPackCodec::encode(&Invoice {
            id: 1,
            customer: "c".to_string(),
            lines: vec![],
            discount: Some(5),
        })
        .unwrap();

        // 0x84 = fixmap with 4 elements, 0xa2 = fixstr "id"
        assert_eq!(encoded[0], 0x84, "Expected fixmap with 4 elements");
        assert_eq!(&encoded[1..4], &[0xa2, b'i', b'd']);
    }

    #[test]
    fn test_none_encodes_as_nil() {
        let encoded = MsgPackCodec::encode(&Option::<i32>::None).unwrap();
        assert_eq!(encoded, vec![0xc0]);
    }

    #[test]
    fn test_primitives_roundtrip() {
        let encoded = MsgPackCodec::encode("hello world").unwrap();
        assert_eq!(MsgPackCodec::decode::<String>(&encoded).unwrap(), "hello world");

        let encoded = MsgPackCodec::encode(&-12345i32).unwrap();
        assert_eq!(MsgPackCodec::decode::<i32>(&encoded).unwrap(), -12345);

        let encoded = MsgPackCodec::encode(&u64::MAX).unwrap();
        assert_eq!(MsgPackCodec::decode::<u64>(&encoded).unwrap(), u64::MAX);
    }

    #[test]
    fn test_bytes_encode_as_msgpack_bin() {
        let data = Bytes::from_static(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        let encoded = MsgPackCodec::encode(&data).unwrap();

        // bin8 format: 0xc4 + length + data
        assert_eq!(encoded[0], 0xc4, "Expected bin8 format");

        let decoded: Bytes = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_payload_default_methods_use_msgpack() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Ping {
            seq: u64,
        }
        impl Payload for Ping {}

        let bytes = Ping { seq: 7 }.to_payload().unwrap();
        assert_eq!(bytes[0], 0x81, "Expected fixmap with 1 element");
        assert_eq!(Ping::from_payload(&bytes).unwrap(), Ping { seq: 7 });
    }

    #[test]
    fn test_decode_type_mismatch_fails() {
        let encoded = MsgPackCodec::encode("not a number").unwrap();
        let result: Result<u32> = MsgPackCodec::decode(&encoded);
        assert!(result.is_err());
    }
}
