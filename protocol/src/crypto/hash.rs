//! # Hashing Utilities
//!
//! Two hash functions, no more:
//!
//! - **BLAKE3** for everything Keel-native: withdrawal roots, struct hashes,
//!   domain separators, type hashes.
//! - **SHA-256** for interoperability with off-ledger tooling that only
//!   speaks SHA-2.
//!
//! [`FieldEncoder`] produces the fixed-width encoding used for typed
//! structured digests. Every field occupies exactly 32 bytes, so two
//! different field sequences can never collide by shifting bytes between
//! neighbouring fields.

use sha2::{Digest as _, Sha256};

use crate::address::Address;

/// A 32-byte digest.
pub type Digest = [u8; 32];

/// SHA-256 of the input.
pub fn sha256(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// BLAKE3 of the input.
pub fn blake3_hash(data: &[u8]) -> Digest {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 over a domain tag followed by the payload.
///
/// Tags end in `\0` so no tag is a prefix of another.
pub fn tagged_hash(tag: &[u8], payload: &[u8]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(tag);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

/// Hash of a type string, used as the first word of a struct hash.
pub fn type_hash(type_string: &str) -> Digest {
    blake3_hash(type_string.as_bytes())
}

/// Fixed-width field encoder for structured digests.
///
/// ```
/// use keel_protocol::crypto::hash::FieldEncoder;
///
/// let a = FieldEncoder::new().u64(1).u64(2).finish();
/// let b = FieldEncoder::new().u64(2).u64(1).finish();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Default, Clone)]
pub struct FieldEncoder {
    buf: Vec<u8>,
}

impl FieldEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a 32-byte word verbatim.
    pub fn word(mut self, word: &Digest) -> Self {
        self.buf.extend_from_slice(word);
        self
    }

    /// Appends an address.
    pub fn address(self, address: &Address) -> Self {
        self.word(address.as_bytes())
    }

    /// Appends an unsigned integer, left-padded big-endian to 32 bytes.
    pub fn u64(mut self, value: u64) -> Self {
        self.buf.extend_from_slice(&[0u8; 24]);
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Appends the hash of a dynamic-length string.
    pub fn string(self, value: &str) -> Self {
        self.word(&blake3_hash(value.as_bytes()))
    }

    /// Raw encoded bytes, for callers that hash with a tag.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// BLAKE3 of the encoded fields.
    pub fn finish(self) -> Digest {
        blake3_hash(&self.buf)
    }
}
