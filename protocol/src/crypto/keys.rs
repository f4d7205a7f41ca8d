//! # Key Management
//!
//! Ed25519 keypairs for key-holding ledger actors.
//!
//! A depositor's or approver's [`Address`] is simply its Ed25519 verifying
//! key, so "who signed this" and "who owns this position" are the same 32
//! bytes. There is no recovery step: a consent names its expected signer and
//! the signature is checked against that key.
//!
//! Key bytes are never logged.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::address::Address;

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,
}

/// An Ed25519 keypair.
///
/// Deliberately not `Serialize`: exporting secret material goes through
/// [`secret_key_bytes`](Self::secret_key_bytes) or [`to_hex`](Self::to_hex).
pub struct KeelKeypair {
    signing_key: SigningKey,
}

/// A 64-byte Ed25519 signature.
///
/// Stored as `Vec<u8>` for serde compatibility. A value of the wrong length
/// simply fails verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeelSignature {
    bytes: Vec<u8>,
}

impl KeelKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Tests lean on this.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Reconstruct a keypair from a hex-encoded secret key.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&arr))
    }

    /// Hex-encoded secret key. Handle with care.
    pub fn to_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Raw secret key bytes.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// The ledger identity of this key: its verifying key bytes.
    pub fn address(&self) -> Address {
        Address::new(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message. Deterministic per RFC 8032.
    pub fn sign(&self, message: &[u8]) -> KeelSignature {
        KeelSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }
}

impl Clone for KeelKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for KeelKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeelKeypair(addr={})", self.address().to_hex())
    }
}

/// Parses an address as an Ed25519 verifying key.
///
/// Fails for byte strings that are not valid curve points; such addresses
/// can still exist (program identities, labels) but cannot sign.
pub fn verifying_key(address: &Address) -> Result<VerifyingKey, KeyError> {
    VerifyingKey::from_bytes(address.as_bytes()).map_err(|_| KeyError::InvalidPublicKey)
}

/// Verify `signature` over `message` against the key named by `address`.
pub fn verify_address(address: &Address, message: &[u8], signature: &KeelSignature) -> bool {
    let Ok(key) = verifying_key(address) else {
        return false;
    };
    let Some(sig) = signature.to_dalek_signature() else {
        return false;
    };
    key.verify_strict(message, &sig).is_ok()
}

impl KeelSignature {
    /// Wraps arbitrary bytes. Length is checked at verification time.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Converts to the dalek type, or `None` if not exactly 64 bytes.
    pub fn to_dalek_signature(&self) -> Option<DalekSignature> {
        let arr: [u8; 64] = self.bytes.as_slice().try_into().ok()?;
        Some(DalekSignature::from_bytes(&arr))
    }

    /// Hex encoding, 128 characters for a well-formed signature.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Parses a hex encoding.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self {
            bytes: hex::decode(s)?,
        })
    }
}

impl fmt::Debug for KeelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        let shown = hex_str.get(..16).unwrap_or(&hex_str);
        write!(f, "KeelSignature({}..)", shown)
    }
}
