//! # Authorization Layer
//!
//! Off-line consent for delegation and deposits.
//!
//! A consent is a signature over a structured digest:
//!
//! ```text
//! digest     = H(0x19 ‖ 0x01 ‖ domain ‖ structHash)
//! domain     = H(typeHash(Domain) ‖ H(name) ‖ networkId ‖ ledger)
//! structHash = H(typeHash(T) ‖ field₀ ‖ field₁ ‖ …)
//! ```
//!
//! Every field is a 32-byte word (see [`FieldEncoder`]). The domain binds
//! the network and the ledger's own identity, so a consent produced for one
//! deployment is useless on another.
//!
//! Signers come in two kinds. An identity registered in the
//! [`ProgramRegistry`] is a program: its [`SignatureValidator`] decides, and
//! must answer with [`SIGNATURE_ACCEPTANCE_SENTINEL`]. Any other identity is
//! read as an Ed25519 verifying key and checked directly.
//!
//! Replay protection is a strictly increasing nonce per (scope, signer) and
//! a write-once salt set per approver.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use keel_protocol::config::{
    DELEGATION_APPROVAL_TYPE, DEPOSITOR_DELEGATION_TYPE, DEPOSIT_TYPE, DOMAIN_TYPE,
    SIGNATURE_ACCEPTANCE_SENTINEL,
};
use keel_protocol::crypto::signatures::verify_raw;
use keel_protocol::crypto::{blake3_hash, type_hash, FieldEncoder, KeelSignature};

use crate::types::{Address, AssetId, Digest, VaultId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("approver consent expired at {expiry} (now {now})")]
    ApprovalExpired { expiry: u64, now: u64 },

    #[error("depositor consent expired at {expiry} (now {now})")]
    ConsentExpired { expiry: u64, now: u64 },

    #[error("approver salt already spent")]
    SaltAlreadySpent,

    #[error("signature is not valid for signer {0}")]
    SignatureInvalid(String),

    #[error("approver consent required but none was supplied")]
    ApprovalMissing,
}

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// The digest domain, with its separator cached at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSeparator {
    name: String,
    network_id: u64,
    ledger: Address,
    cached: Digest,
}

impl DomainSeparator {
    pub fn new(name: &str, network_id: u64, ledger: Address) -> Self {
        Self {
            name: name.to_string(),
            network_id,
            ledger,
            cached: compute_domain_separator(name, network_id, &ledger),
        }
    }

    /// The separator for `network_id`.
    ///
    /// Returns the cached value when the host reports the network recorded
    /// at construction, otherwise recomputes it for the reported network.
    pub fn separator_for(&self, network_id: u64) -> Digest {
        if network_id == self.network_id {
            self.cached
        } else {
            compute_domain_separator(&self.name, network_id, &self.ledger)
        }
    }

    pub fn network_id(&self) -> u64 {
        self.network_id
    }

    pub fn ledger(&self) -> Address {
        self.ledger
    }
}

fn compute_domain_separator(name: &str, network_id: u64, ledger: &Address) -> Digest {
    FieldEncoder::new()
        .word(&type_hash(DOMAIN_TYPE))
        .string(name)
        .u64(network_id)
        .address(ledger)
        .finish()
}

/// `H(0x19 ‖ 0x01 ‖ domain ‖ structHash)`.
pub fn typed_digest(domain: &Digest, struct_hash: &Digest) -> Digest {
    let mut buf = Vec::with_capacity(2 + 64);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(domain);
    buf.extend_from_slice(struct_hash);
    blake3_hash(&buf)
}

// ---------------------------------------------------------------------------
// Typed structs
// ---------------------------------------------------------------------------

/// A struct that can be hashed under a type string.
pub trait TypedStruct {
    const TYPE: &'static str;

    fn encode_fields(&self, enc: FieldEncoder) -> FieldEncoder;

    fn struct_hash(&self) -> Digest {
        self.encode_fields(FieldEncoder::new().word(&type_hash(Self::TYPE)))
            .finish()
    }
}

/// An operator's approver consenting to one depositor delegating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationApproval {
    pub approver: Address,
    pub depositor: Address,
    pub operator: Address,
    pub salt: Digest,
    pub expiry: u64,
}

impl TypedStruct for DelegationApproval {
    const TYPE: &'static str = DELEGATION_APPROVAL_TYPE;

    fn encode_fields(&self, enc: FieldEncoder) -> FieldEncoder {
        enc.address(&self.approver)
            .address(&self.depositor)
            .address(&self.operator)
            .word(&self.salt)
            .u64(self.expiry)
    }
}

/// A depositor consenting to be delegated to `operator` by a relayer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositorDelegation {
    pub depositor: Address,
    pub operator: Address,
    pub nonce: u64,
    pub expiry: u64,
}

impl TypedStruct for DepositorDelegation {
    const TYPE: &'static str = DEPOSITOR_DELEGATION_TYPE;

    fn encode_fields(&self, enc: FieldEncoder) -> FieldEncoder {
        enc.address(&self.depositor)
            .address(&self.operator)
            .u64(self.nonce)
            .u64(self.expiry)
    }
}

/// A depositor consenting to be credited with a deposit someone else funds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositConsent {
    pub depositor: Address,
    pub vault: VaultId,
    pub asset: AssetId,
    pub amount: u64,
    pub nonce: u64,
    pub expiry: u64,
}

impl TypedStruct for DepositConsent {
    const TYPE: &'static str = DEPOSIT_TYPE;

    fn encode_fields(&self, enc: FieldEncoder) -> FieldEncoder {
        enc.address(&self.depositor)
            .address(&self.vault)
            .address(&self.asset)
            .u64(self.amount)
            .u64(self.nonce)
            .u64(self.expiry)
    }
}

/// A signature with the expiry it was produced for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedConsent {
    pub signature: KeelSignature,
    pub expiry: u64,
}

impl SignedConsent {
    pub fn new(signature: KeelSignature, expiry: u64) -> Self {
        Self { signature, expiry }
    }
}

// ---------------------------------------------------------------------------
// Signer kinds
// ---------------------------------------------------------------------------

/// Validation routine of a program identity.
pub trait SignatureValidator: Send + Sync {
    /// Returns [`SIGNATURE_ACCEPTANCE_SENTINEL`] to accept; anything else
    /// rejects.
    fn is_valid_signature(&self, digest: &Digest, signature: &[u8]) -> [u8; 4];
}

/// Maps identities that resolve to code onto their validators.
#[derive(Clone, Default)]
pub struct ProgramRegistry {
    programs: BTreeMap<Address, Arc<dyn SignatureValidator>>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, identity: Address, validator: Arc<dyn SignatureValidator>) {
        self.programs.insert(identity, validator);
    }

    pub fn resolve(&self, identity: &Address) -> Option<&dyn SignatureValidator> {
        self.programs.get(identity).map(|v| v.as_ref())
    }
}

impl fmt::Debug for ProgramRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramRegistry")
            .field("programs", &self.programs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// How a particular signer's signatures are checked.
pub enum Verifier<'a> {
    RawKey(Address),
    Program(&'a dyn SignatureValidator),
}

impl<'a> Verifier<'a> {
    pub fn for_signer(registry: &'a ProgramRegistry, signer: &Address) -> Self {
        match registry.resolve(signer) {
            Some(validator) => Verifier::Program(validator),
            None => Verifier::RawKey(*signer),
        }
    }

    pub fn accepts(&self, digest: &Digest, signature: &KeelSignature) -> bool {
        match self {
            Verifier::RawKey(key) => {
                verify_raw(key.as_bytes(), digest, signature.as_bytes()).is_ok()
            }
            Verifier::Program(validator) => {
                validator.is_valid_signature(digest, signature.as_bytes())
                    == SIGNATURE_ACCEPTANCE_SENTINEL
            }
        }
    }
}

/// Check that `signer` produced `signature` over `digest`.
pub fn verify_consent(
    registry: &ProgramRegistry,
    signer: &Address,
    digest: &Digest,
    signature: &KeelSignature,
) -> Result<(), AuthError> {
    if Verifier::for_signer(registry, signer).accepts(digest, signature) {
        Ok(())
    } else {
        warn!(%signer, "consent signature rejected");
        Err(AuthError::SignatureInvalid(signer.to_hex()))
    }
}

// ---------------------------------------------------------------------------
// Replay protection
// ---------------------------------------------------------------------------

/// Which action a nonce guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NonceScope {
    Delegation,
    Deposit,
}

/// Nonces, spent salts and the digest domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationLayer {
    domain: DomainSeparator,
    nonces: BTreeMap<(NonceScope, Address), u64>,
    spent_salts: BTreeSet<(Address, Digest)>,
}

impl AuthorizationLayer {
    pub fn new(domain: DomainSeparator) -> Self {
        Self {
            domain,
            nonces: BTreeMap::new(),
            spent_salts: BTreeSet::new(),
        }
    }

    pub fn domain(&self) -> &DomainSeparator {
        &self.domain
    }

    /// Full digest of `value` under the domain for `network_id`.
    pub fn digest<T: TypedStruct>(&self, network_id: u64, value: &T) -> Digest {
        typed_digest(&self.domain.separator_for(network_id), &value.struct_hash())
    }

    /// The next nonce `signer` must sign for `scope`.
    pub fn nonce(&self, scope: NonceScope, signer: &Address) -> u64 {
        self.nonces.get(&(scope, *signer)).copied().unwrap_or(0)
    }

    /// Return the current nonce and advance it.
    pub fn consume_nonce(&mut self, scope: NonceScope, signer: &Address) -> u64 {
        let entry = self.nonces.entry((scope, *signer)).or_insert(0);
        let used = *entry;
        *entry += 1;
        used
    }

    pub fn salt_spent(&self, approver: &Address, salt: &Digest) -> bool {
        self.spent_salts.contains(&(*approver, *salt))
    }

    pub fn spend_salt(&mut self, approver: &Address, salt: &Digest) -> Result<(), AuthError> {
        if !self.spent_salts.insert((*approver, *salt)) {
            return Err(AuthError::SaltAlreadySpent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_protocol::crypto::KeelKeypair;

    struct AlwaysYes;
    impl SignatureValidator for AlwaysYes {
        fn is_valid_signature(&self, _digest: &Digest, _sig: &[u8]) -> [u8; 4] {
            SIGNATURE_ACCEPTANCE_SENTINEL
        }
    }

    struct AlmostYes;
    impl SignatureValidator for AlmostYes {
        fn is_valid_signature(&self, _digest: &Digest, _sig: &[u8]) -> [u8; 4] {
            [0x16, 0x26, 0xba, 0x7f]
        }
    }

    fn layer() -> AuthorizationLayer {
        AuthorizationLayer::new(DomainSeparator::new("Keel", 7, Address::from_label("ledger")))
    }

    #[test]
    fn domain_recomputed_on_network_change() {
        let domain = DomainSeparator::new("Keel", 7, Address::from_label("ledger"));
        assert_eq!(domain.separator_for(7), domain.separator_for(7));
        assert_ne!(domain.separator_for(7), domain.separator_for(8));
        let other = DomainSeparator::new("Keel", 7, Address::from_label("other-ledger"));
        assert_ne!(domain.separator_for(7), other.separator_for(7));
    }

    #[test]
    fn raw_key_consent() {
        let kp = KeelKeypair::from_seed(&[3u8; 32]);
        let auth = layer();
        let msg = DepositorDelegation {
            depositor: kp.address(),
            operator: Address::from_label("op"),
            nonce: 0,
            expiry: 100,
        };
        let digest = auth.digest(7, &msg);
        let sig = kp.sign(&digest);
        let registry = ProgramRegistry::new();
        assert!(verify_consent(&registry, &kp.address(), &digest, &sig).is_ok());

        // Same signature does not carry over to another network.
        let foreign = auth.digest(8, &msg);
        assert!(verify_consent(&registry, &kp.address(), &foreign, &sig).is_err());
    }

    #[test]
    fn program_signer_needs_exact_sentinel() {
        let mut registry = ProgramRegistry::new();
        let yes = Address::from_label("program:yes");
        let almost = Address::from_label("program:almost");
        registry.register(yes, Arc::new(AlwaysYes));
        registry.register(almost, Arc::new(AlmostYes));

        let sig = KeelSignature::from_vec(vec![1, 2, 3]);
        let digest = [9u8; 32];
        assert!(verify_consent(&registry, &yes, &digest, &sig).is_ok());
        assert_eq!(
            verify_consent(&registry, &almost, &digest, &sig),
            Err(AuthError::SignatureInvalid(almost.to_hex()))
        );
    }

    #[test]
    fn nonces_strictly_increase() {
        let mut auth = layer();
        let who = Address::from_label("alice");
        assert_eq!(auth.consume_nonce(NonceScope::Delegation, &who), 0);
        assert_eq!(auth.consume_nonce(NonceScope::Delegation, &who), 1);
        assert_eq!(auth.nonce(NonceScope::Delegation, &who), 2);
        assert_eq!(auth.nonce(NonceScope::Deposit, &who), 0);
    }

    #[test]
    fn salts_are_write_once() {
        let mut auth = layer();
        let approver = Address::from_label("approver");
        let salt = [1u8; 32];
        auth.spend_salt(&approver, &salt).unwrap();
        assert!(auth.salt_spent(&approver, &salt));
        assert_eq!(
            auth.spend_salt(&approver, &salt),
            Err(AuthError::SaltAlreadySpent)
        );
        // Salts are scoped to their approver.
        auth.spend_salt(&Address::from_label("other"), &salt).unwrap();
    }

    #[test]
    fn field_order_matters() {
        let a = DelegationApproval {
            approver: Address::from_label("x"),
            depositor: Address::from_label("y"),
            operator: Address::from_label("z"),
            salt: [0u8; 32],
            expiry: 1,
        };
        let b = DelegationApproval {
            depositor: a.operator,
            operator: a.depositor,
            ..a.clone()
        };
        assert_ne!(a.struct_hash(), b.struct_hash());
    }
}
