//! Integrity key derivation and frame tags.
//!
//! The key is never transmitted. Both sides derive it from the service
//! identity with SHA-256, so holding the right key doubles as a lightweight
//! shared-secret check between the worker and the coordinator.
//!
//! Tags are HighwayHash-64 over `opcode ‖ length ‖ payload`, written in
//! little-endian byte order.

use std::fmt;

use highway::{HighwayHash, HighwayHasher, Key};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Integrity key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Frame tag size in bytes.
pub const TAG_SIZE: usize = 8;

/// Process-lifetime secret used to tag and verify frames.
///
/// Read-only after derivation, so it can be shared freely behind an `Arc`.
#[derive(Clone, PartialEq, Eq)]
pub struct IntegrityKey {
    bytes: [u8; KEY_SIZE],
}

impl IntegrityKey {
    /// Derive the key for a service identity.
    ///
    /// # Example
    ///
    /// ```
    /// use elko_client::protocol::IntegrityKey;
    ///
    /// let a = IntegrityKey::derive("billing");
    /// let b = IntegrityKey::derive("billing");
    /// assert_eq!(a, b);
    /// assert_ne!(a, IntegrityKey::derive("search"));
    /// ```
    pub fn derive(service_id: &str) -> Self {
        let digest = Sha256::digest(service_id.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&digest);
        Self { bytes }
    }

    /// Build a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Compute the tag over the given byte ranges, in order.
    ///
    /// Accepting several parts lets callers tag a header and a payload that
    /// live in separate buffers without concatenating them first.
    pub fn tag(&self, parts: &[&[u8]]) -> [u8; TAG_SIZE] {
        let mut hasher = HighwayHasher::new(self.highway_key());
        for part in parts {
            hasher.append(part);
        }
        hasher.finalize64().to_le_bytes()
    }

    /// Check a received tag in constant time.
    pub fn verify(&self, parts: &[&[u8]], tag: &[u8]) -> bool {
        let expected = self.tag(parts);
        expected[..].ct_eq(tag).into()
    }

    fn highway_key(&self) -> Key {
        let mut lanes = [0u64; 4];
        for (lane, chunk) in lanes.iter_mut().zip(self.bytes.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *lane = u64::from_le_bytes(word);
        }
        Key(lanes)
    }
}

impl fmt::Debug for IntegrityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IntegrityKey(..)")
    }
}
