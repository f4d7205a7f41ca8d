//! # Cryptographic Primitives for Keel
//!
//! Everything security-related in the ledger flows through here:
//!
//! - **Ed25519** for consent signatures from key-holding actors.
//! - **BLAKE3** for withdrawal roots, struct hashes and domain separators.
//! - **SHA-256** for compatibility with external tooling.
//!
//! These are thin, typed wrappers over audited implementations.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{blake3_hash, sha256, tagged_hash, type_hash, Digest, FieldEncoder};
pub use keys::{KeelKeypair, KeelSignature};
pub use signatures::{sign, verify};
