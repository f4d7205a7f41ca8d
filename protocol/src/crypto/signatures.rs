//! # Digital Signatures
//!
//! Thin wrappers over the keypair primitives plus the raw-bytes variant used
//! when a consent arrives off the wire as plain byte slices.
//!
//! Verification uses ed25519-dalek's strict mode: non-canonical and
//! small-order encodings are rejected.

use ed25519_dalek::{Signature as DalekSignature, VerifyingKey};
use thiserror::Error;

use super::keys::{verify_address, KeelKeypair, KeelSignature};
use crate::address::Address;

/// Errors during signature operations.
///
/// Intentionally vague: callers learn that verification failed, not why.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid signature bytes: expected 64 bytes")]
    InvalidSignatureBytes,

    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Sign a message with a keypair.
pub fn sign(keypair: &KeelKeypair, message: &[u8]) -> KeelSignature {
    keypair.sign(message)
}

/// Verify a signature against the key an address names.
pub fn verify(signer: &Address, message: &[u8], signature: &KeelSignature) -> bool {
    verify_address(signer, message, signature)
}

/// Verify using raw byte components.
pub fn verify_raw(
    public_key_bytes: &[u8; 32],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), SignatureError> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key_bytes).map_err(|_| SignatureError::InvalidPublicKey)?;
    let sig_arr: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| SignatureError::InvalidSignatureBytes)?;
    let signature = DalekSignature::from_bytes(&sig_arr);

    verifying_key
        .verify_strict(message, &signature)
        .map_err(|_| SignatureError::VerificationFailed)
}
