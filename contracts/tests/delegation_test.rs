//! Integration tests for operators, delegation and signed consent.

mod common;

use std::sync::Arc;

use common::*;
use keel_contracts::authorization::AuthError;
use keel_contracts::delegation::DelegationError;
use keel_contracts::error::ErrorKind;
use keel_contracts::share_vault::VaultError;
use keel_contracts::{
    Address, AssetTransfer, CompletionMode, Digest, LedgerError, LedgerEvent, OperationClass,
    OperatorDetails, ProgramRegistry, SignatureValidator, SignedConsent,
};
use keel_protocol::config::{NETWORK_ID_DEVNET, NETWORK_ID_TESTNET, SIGNATURE_ACCEPTANCE_SENTINEL};
use keel_protocol::crypto::{KeelKeypair, KeelSignature};

fn approver_key() -> KeelKeypair {
    KeelKeypair::from_seed(&[7u8; 32])
}

/// Registers `op` with `approver_key()` as its delegation approver.
fn gated_operator(fx: &mut Fixture, op: Address) {
    let details = OperatorDetails::new(op).with_approver(approver_key().address());
    fx.ledger
        .register_operator(&fx.as_(op), details, "ipfs://gated")
        .unwrap();
}

fn approval(fx: &Fixture, depositor: Address, op: Address, salt: Digest, expiry: u64) -> SignedConsent {
    let key = approver_key();
    let digest = fx.ledger.delegation_approval_digest(
        key.address(),
        depositor,
        op,
        salt,
        expiry,
        NETWORK_ID_DEVNET,
    );
    SignedConsent::new(key.sign(&digest), expiry)
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn delegate_to_unregistered_operator() {
    let alice = addr("alice");
    let mut fx = Fixture::new(&[alice]);
    fx.deposit(alice, usd_vault(), 1_000);
    let err = fx
        .ledger
        .delegate(&fx.as_(alice), addr("ghost"))
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Delegation(DelegationError::OperatorNotRegistered(_))
    ));
    assert!(!fx.ledger.is_delegated(&alice));
}

#[test]
fn operator_registration_carries_own_deposits() {
    let op = addr("operator");
    let mut fx = Fixture::new(&[op]);
    fx.deposit(op, usd_vault(), 4_000);
    fx.register(op);
    assert!(fx.ledger.is_operator(&op));
    assert_eq!(fx.ledger.delegated_to(&op), Some(op));
    assert_eq!(fx.ledger.operator_shares(&op, &usd_vault()), 4_000);

    // Later deposits by the operator flow to its own total.
    fx.deposit(op, usd_vault(), 1_000);
    assert_eq!(fx.ledger.operator_shares(&op, &usd_vault()), 5_000);
    fx.assert_sound();
}

#[test]
fn operator_details_and_metadata() {
    let op = addr("operator");
    let mut fx = Fixture::new(&[]);
    let details = OperatorDetails::new(op).with_opt_out_window(100);
    fx.ledger
        .register_operator(&fx.as_(op), details.clone(), "ipfs://v1")
        .unwrap();

    let err = fx
        .ledger
        .modify_operator_details(&fx.as_(op), details.clone().with_opt_out_window(10))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    fx.ledger
        .modify_operator_details(&fx.as_(op), details.with_opt_out_window(500))
        .unwrap();
    fx.ledger
        .update_operator_metadata(&fx.as_(op), "ipfs://v2")
        .unwrap();
    let profile = fx.ledger.operator_profile(&op).unwrap();
    assert_eq!(profile.details.opt_out_window, 500);
    assert_eq!(profile.metadata_uri, "ipfs://v2");

    assert!(matches!(
        fx.ledger
            .update_operator_metadata(&fx.as_(addr("alice")), "ipfs://nope"),
        Err(LedgerError::Delegation(DelegationError::NotOperator))
    ));
}

// ---------------------------------------------------------------------------
// Approver Consent
// ---------------------------------------------------------------------------

fn depositor_consent(fx: &Fixture, key: &KeelKeypair, op: Address, network_id: u64) -> SignedConsent {
    let expiry = fx.ctx.now + 100;
    let digest = fx
        .ledger
        .depositor_delegation_digest(key.address(), op, expiry, network_id);
    SignedConsent::new(key.sign(&digest), expiry)
}

#[test]
fn depositor_acting_directly_skips_approver() {
    let alice = addr("alice");
    let op = addr("operator");
    let mut fx = Fixture::new(&[alice]);
    gated_operator(&mut fx, op);
    fx.deposit(alice, usd_vault(), 1_000);

    fx.ledger.delegate(&fx.as_(alice), op).unwrap();
    assert_eq!(fx.ledger.delegated_to(&alice), Some(op));
    assert_eq!(fx.ledger.operator_shares(&op, &usd_vault()), 1_000);
    fx.assert_sound();
}

#[test]
fn relayed_delegation_needs_approver_and_salt_single_use() {
    let alice = KeelKeypair::from_seed(&[21u8; 32]);
    let bob = KeelKeypair::from_seed(&[22u8; 32]);
    let relayer = addr("relayer");
    let op = addr("operator");
    let mut fx = Fixture::new(&[alice.address(), bob.address()]);
    gated_operator(&mut fx, op);
    fx.deposit(alice.address(), usd_vault(), 1_000);

    let consent = depositor_consent(&fx, &alice, op, NETWORK_ID_DEVNET);
    assert!(matches!(
        fx.ledger
            .delegate_by_consent(&fx.as_(relayer), alice.address(), op, &consent, None, [1u8; 32]),
        Err(LedgerError::Auth(AuthError::ApprovalMissing))
    ));
    assert!(!fx.ledger.is_delegated(&alice.address()));
    assert_eq!(fx.ledger.delegation_nonce(&alice.address()), 0);

    let salt = [1u8; 32];
    let approved = approval(&fx, alice.address(), op, salt, fx.ctx.now + 10);
    fx.ledger
        .delegate_by_consent(&fx.as_(relayer), alice.address(), op, &consent, Some(&approved), salt)
        .unwrap();
    assert_eq!(fx.ledger.operator_shares(&op, &usd_vault()), 1_000);
    assert!(fx
        .ledger
        .approver_salt_spent(&approver_key().address(), &salt));

    // Same salt, different depositor: refused before any signature check.
    let bob_consent = depositor_consent(&fx, &bob, op, NETWORK_ID_DEVNET);
    let replay = approval(&fx, bob.address(), op, salt, fx.ctx.now + 10);
    assert!(matches!(
        fx.ledger
            .delegate_by_consent(&fx.as_(relayer), bob.address(), op, &bob_consent, Some(&replay), salt),
        Err(LedgerError::Auth(AuthError::SaltAlreadySpent))
    ));

    // The approver relaying needs no signature of its own.
    fx.ledger
        .delegate_by_consent(
            &fx.as_(approver_key().address()),
            bob.address(),
            op,
            &bob_consent,
            None,
            [0u8; 32],
        )
        .unwrap();
    assert_eq!(fx.ledger.delegated_to(&bob.address()), Some(op));
    fx.assert_sound();
}

#[test]
fn expired_or_forged_approval_rejected() {
    let alice = KeelKeypair::from_seed(&[23u8; 32]);
    let relayer = addr("relayer");
    let op = addr("operator");
    let mut fx = Fixture::new(&[alice.address()]);
    gated_operator(&mut fx, op);
    let consent = depositor_consent(&fx, &alice, op, NETWORK_ID_DEVNET);

    let expired = approval(&fx, alice.address(), op, [2u8; 32], fx.ctx.now - 1);
    let err = fx
        .ledger
        .delegate_by_consent(&fx.as_(relayer), alice.address(), op, &consent, Some(&expired), [2u8; 32])
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Auth(AuthError::ApprovalExpired { .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Authorization);

    // Signed for a different salt than presented.
    let mismatched = approval(&fx, alice.address(), op, [3u8; 32], fx.ctx.now + 10);
    assert!(matches!(
        fx.ledger.delegate_by_consent(
            &fx.as_(relayer),
            alice.address(),
            op,
            &consent,
            Some(&mismatched),
            [4u8; 32]
        ),
        Err(LedgerError::Auth(AuthError::SignatureInvalid(_)))
    ));
    assert!(!fx
        .ledger
        .approver_salt_spent(&approver_key().address(), &[4u8; 32]));
    assert!(!fx.ledger.is_delegated(&alice.address()));
}

#[test]
fn approver_consent_bound_to_network() {
    let alice = KeelKeypair::from_seed(&[24u8; 32]);
    let op = addr("operator");
    let mut fx = Fixture::new(&[alice.address()]);
    gated_operator(&mut fx, op);

    // Depositor signs for the forked network; the approver signed for devnet.
    let consent = depositor_consent(&fx, &alice, op, NETWORK_ID_TESTNET);
    let approved = approval(&fx, alice.address(), op, [5u8; 32], fx.ctx.now + 10);
    let forked = keel_contracts::ExecutionContext {
        network_id: NETWORK_ID_TESTNET,
        ..fx.as_(addr("relayer"))
    };
    assert!(matches!(
        fx.ledger
            .delegate_by_consent(&forked, alice.address(), op, &consent, Some(&approved), [5u8; 32]),
        Err(LedgerError::Auth(AuthError::SignatureInvalid(_)))
    ));
    assert_eq!(fx.ledger.delegation_nonce(&alice.address()), 0);
}

// ---------------------------------------------------------------------------
// Depositor Consent
// ---------------------------------------------------------------------------

#[test]
fn delegation_consent_cannot_be_replayed() {
    let alice = KeelKeypair::from_seed(&[11u8; 32]);
    let relayer = addr("relayer");
    let op = addr("operator");
    let mut fx = Fixture::new(&[alice.address()]);
    fx.register(op);
    fx.deposit(alice.address(), usd_vault(), 2_000);

    let expiry = fx.ctx.now + 100;
    let digest = fx
        .ledger
        .depositor_delegation_digest(alice.address(), op, expiry, NETWORK_ID_DEVNET);
    let consent = SignedConsent::new(alice.sign(&digest), expiry);

    fx.ledger
        .delegate_by_consent(&fx.as_(relayer), alice.address(), op, &consent, None, [0u8; 32])
        .unwrap();
    assert_eq!(fx.ledger.delegated_to(&alice.address()), Some(op));
    assert_eq!(fx.ledger.delegation_nonce(&alice.address()), 1);

    fx.ledger
        .undelegate(&fx.as_(alice.address()), alice.address())
        .unwrap();

    let err = fx
        .ledger
        .delegate_by_consent(&fx.as_(relayer), alice.address(), op, &consent, None, [0u8; 32])
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Auth(AuthError::SignatureInvalid(_))
    ));
    assert!(!fx.ledger.is_delegated(&alice.address()));
}

struct DigestEcho;

impl SignatureValidator for DigestEcho {
    fn is_valid_signature(&self, digest: &Digest, signature: &[u8]) -> [u8; 4] {
        if signature == digest.as_slice() {
            SIGNATURE_ACCEPTANCE_SENTINEL
        } else {
            [0u8; 4]
        }
    }
}

#[test]
fn program_depositor_consents_through_its_validator() {
    let program = addr("program:multisig");
    let op = addr("operator");
    let mut registry = ProgramRegistry::new();
    registry.register(program, Arc::new(DigestEcho));

    let mut fx = Fixture::new(&[program]).with_programs(registry);
    fx.register(op);

    let expiry = fx.ctx.now + 5;
    let digest = fx
        .ledger
        .depositor_delegation_digest(program, op, expiry, NETWORK_ID_DEVNET);

    let bad = SignedConsent::new(KeelSignature::from_vec(vec![0; 32]), expiry);
    assert!(fx
        .ledger
        .delegate_by_consent(&fx.as_(addr("relayer")), program, op, &bad, None, [0u8; 32])
        .is_err());

    let good = SignedConsent::new(KeelSignature::from_vec(digest.to_vec()), expiry);
    fx.ledger
        .delegate_by_consent(&fx.as_(addr("relayer")), program, op, &good, None, [0u8; 32])
        .unwrap();
    assert_eq!(fx.ledger.delegated_to(&program), Some(op));
}

#[test]
fn vault_cannot_consent_to_hold_its_own_shares() {
    let alice = addr("alice");
    let mut registry = ProgramRegistry::new();
    registry.register(usd_vault(), Arc::new(DigestEcho));
    let mut fx = Fixture::new(&[alice]).with_programs(registry);
    fx.deposit(alice, usd_vault(), 1_000_000);

    let expiry = fx.ctx.now + 5;
    let digest = fx
        .ledger
        .deposit_digest(usd_vault(), usd_vault(), 1_000, expiry, NETWORK_ID_DEVNET)
        .unwrap();
    let consent = SignedConsent::new(KeelSignature::from_vec(digest.to_vec()), expiry);
    let err = fx
        .ledger
        .deposit_into_vault_by_consent(&fx.as_(alice), usd_vault(), usd_vault(), 1_000, &consent)
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Vault(VaultError::SelfDeposit(_))
    ));
    assert_eq!(fx.ledger.shares_of(&usd_vault(), &usd_vault()), 0);
    assert_eq!(fx.ledger.shares_of(&alice, &usd_vault()), 1_000_000);
    assert_eq!(fx.ledger.deposit_nonce(&usd_vault()), 0);
    fx.assert_sound();
}

// ---------------------------------------------------------------------------
// Undelegation
// ---------------------------------------------------------------------------

#[test]
fn forced_undelegation_queues_one_withdrawal_per_vault() {
    let alice = addr("alice");
    let op = addr("operator");
    let mut fx = Fixture::new(&[alice]);
    fx.register(op);
    fx.deposit(alice, usd_vault(), 1_000);
    fx.deposit(alice, eth_vault(), 2_000);
    fx.ledger
        .delegate(&fx.as_(alice), op)
        .unwrap();

    let from = fx.ledger.next_event_seq().unwrap();
    let roots = fx.ledger.undelegate(&fx.as_(op), alice).unwrap();
    assert_eq!(roots.len(), 2);
    assert!(!fx.ledger.is_delegated(&alice));
    assert!(fx.ledger.deposits(&alice).is_empty());
    assert_eq!(fx.ledger.operator_shares(&op, &usd_vault()), 0);
    assert_eq!(fx.ledger.operator_shares(&op, &eth_vault()), 0);
    fx.assert_sound();

    let events = fx.ledger.events_from(from).unwrap();
    assert!(events.iter().any(|(_, e)| matches!(
        e,
        LedgerEvent::ForceUndelegated { depositor, operator } if *depositor == alice && *operator == op
    )));

    // Every request pays the depositor; complete as shares to re-delegate.
    let requests: Vec<_> = roots
        .iter()
        .map(|r| fx.ledger.pending_withdrawal(r).unwrap().clone())
        .collect();
    assert!(requests.iter().all(|r| r.withdrawer == alice && r.delegated_to == op));
    let later = fx.as_(alice).at(fx.ctx.now + GLOBAL_DELAY);
    fx.ledger
        .complete_withdrawals(&later, &requests, &[CompletionMode::AsShares; 2])
        .unwrap();
    fx.ledger.delegate(&later, op).unwrap();
    assert_eq!(fx.ledger.operator_shares(&op, &usd_vault()), 1_000);
    assert_eq!(fx.ledger.operator_shares(&op, &eth_vault()), 2_000);
    assert_eq!(fx.ledger.assets().balance_of(&usd(), &alice), START_BALANCE - 1_000);
    fx.assert_sound();
}

#[test]
fn undelegation_caller_rules() {
    let alice = addr("alice");
    let op = addr("operator");
    let mut fx = Fixture::new(&[alice]);
    fx.register(op);
    fx.ledger
        .delegate(&fx.as_(alice), op)
        .unwrap();

    assert!(matches!(
        fx.ledger.undelegate(&fx.as_(addr("mallory")), alice),
        Err(LedgerError::Delegation(DelegationError::UnauthorizedCaller))
    ));
    assert!(matches!(
        fx.ledger.undelegate(&fx.as_(op), op),
        Err(LedgerError::Delegation(DelegationError::OperatorCannotUndelegate))
    ));

    // Nothing deposited: undelegation queues nothing.
    let roots = fx.ledger.undelegate(&fx.as_(alice), alice).unwrap();
    assert!(roots.is_empty());
    assert!(matches!(
        fx.ledger.undelegate(&fx.as_(alice), alice),
        Err(LedgerError::Delegation(DelegationError::NotDelegated(_)))
    ));
}

// ---------------------------------------------------------------------------
// Pausing
// ---------------------------------------------------------------------------

#[test]
fn pause_classes_gate_their_entry_points() {
    let alice = addr("alice");
    let op = addr("operator");
    let mut fx = Fixture::new(&[alice]);
    fx.register(op);
    fx.deposit(alice, usd_vault(), 1_000);

    fx.ledger
        .pause(&fx.ctx, OperationClass::NewDelegation.bit())
        .unwrap();
    assert!(fx
        .ledger
        .delegate(&fx.as_(alice), op)
        .is_err());
    fx.deposit(alice, usd_vault(), 1_000);

    let mask = OperationClass::NewDelegation.bit() | OperationClass::EnterWithdrawalQueue.bit();
    fx.ledger.pause(&fx.ctx, mask).unwrap();
    assert!(fx
        .ledger
        .queue_withdrawals(
            &fx.as_(alice),
            vec![keel_contracts::QueuedWithdrawalParams {
                vaults: vec![usd_vault()],
                shares: vec![10],
                withdrawer: alice,
            }],
        )
        .is_err());

    // Shrinking via pause() is refused; only the unpauser can shrink.
    assert!(fx
        .ledger
        .pause(&fx.ctx, OperationClass::NewDelegation.bit())
        .is_err());
    assert!(fx.ledger.unpause(&fx.as_(alice), 0).is_err());
    fx.ledger.unpause_all(&fx.ctx).unwrap();
    fx.ledger
        .delegate(&fx.as_(alice), op)
        .unwrap();
}
