//! Persistence tests: state and events survive a reopen of the database.

mod common;

use common::*;
use keel_contracts::{
    CompletionMode, Ledger, LedgerConfig, LedgerEvent, QueuedWithdrawalParams, VaultListing,
};
use keel_contracts::{AssetTransfer, ExecutionContext, InMemoryAssets};
use keel_protocol::config::NETWORK_ID_DEVNET;
use keel_protocol::storage::KeelDB;

fn config() -> LedgerConfig {
    let mut config = LedgerConfig::devnet(admin());
    config.min_withdrawal_delay = GLOBAL_DELAY;
    config
}

fn open(dir: &std::path::Path, config: LedgerConfig, assets: InMemoryAssets) -> Ledger {
    let db = KeelDB::open(dir).expect("open db");
    Ledger::open(db, config, assets).expect("open ledger")
}

#[test]
fn state_and_events_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let alice = addr("alice");
    let op = addr("operator");
    let admin_ctx = ExecutionContext::new(admin(), 1_000, NETWORK_ID_DEVNET);

    let mut assets = InMemoryAssets::new();
    assets.mint(usd(), alice, START_BALANCE);

    let (state, assets, request, next_seq) = {
        let mut ledger = open(dir.path(), config(), assets);
        ledger
            .add_vaults_to_allowlist(
                &admin_ctx,
                &[VaultListing {
                    vault: usd_vault(),
                    asset: usd(),
                    third_party_forbidden: false,
                }],
            )
            .unwrap();
        ledger
            .register_operator(
                &admin_ctx.with_caller(op),
                keel_contracts::OperatorDetails::new(op),
                "ipfs://operator",
            )
            .unwrap();

        let ctx = admin_ctx.with_caller(alice);
        ledger.deposit_into_vault(&ctx, usd_vault(), 4_000).unwrap();
        ledger.delegate(&ctx, op).unwrap();
        let roots = ledger
            .queue_withdrawals(
                &ctx,
                vec![QueuedWithdrawalParams {
                    vaults: vec![usd_vault()],
                    shares: vec![1_500],
                    withdrawer: alice,
                }],
            )
            .unwrap();
        let request = ledger.pending_withdrawal(&roots[0]).unwrap().clone();

        (
            ledger.state().clone(),
            ledger.assets().clone(),
            request,
            ledger.next_event_seq().unwrap(),
        )
    };

    let mut ledger = open(dir.path(), config(), assets);
    assert_eq!(ledger.state(), &state);
    assert_eq!(ledger.next_event_seq().unwrap(), next_seq);
    assert_eq!(ledger.delegated_to(&alice), Some(op));
    assert_eq!(ledger.operator_shares(&op, &usd_vault()), 2_500);

    let events = ledger.events_from(0).unwrap();
    assert_eq!(events.len() as u64, next_seq);
    assert!(matches!(events.first(), Some((0, LedgerEvent::VaultAddedToAllowlist { .. }))));
    assert!(events
        .iter()
        .any(|(_, e)| matches!(e, LedgerEvent::WithdrawalQueued { .. })));

    let later = admin_ctx.with_caller(alice).at(1_000 + GLOBAL_DELAY);
    ledger
        .complete_withdrawal(&later, &request, CompletionMode::AsAssets)
        .unwrap();
    assert_eq!(
        ledger.assets().balance_of(&usd(), &alice),
        START_BALANCE - 4_000 + 1_500
    );
    assert!(ledger.state().invariant_violations().is_empty());
}

#[test]
fn stored_config_wins_over_supplied() {
    let dir = tempfile::tempdir().unwrap();
    {
        let ledger = open(dir.path(), config(), InMemoryAssets::new());
        assert_eq!(ledger.min_withdrawal_delay(), GLOBAL_DELAY);
    }

    let mut other = config();
    other.min_withdrawal_delay = GLOBAL_DELAY * 10;
    let ledger = open(dir.path(), other, InMemoryAssets::new());
    assert_eq!(ledger.config().min_withdrawal_delay, GLOBAL_DELAY);
    assert_eq!(ledger.min_withdrawal_delay(), GLOBAL_DELAY);
}

#[test]
fn rejected_operation_writes_nothing() {
    let db = KeelDB::open_temporary().unwrap();
    let mut ledger = Ledger::open(db, config(), InMemoryAssets::new()).unwrap();
    let before = ledger.next_event_seq().unwrap();

    let ctx = ExecutionContext::new(addr("nobody"), 1_000, NETWORK_ID_DEVNET);
    assert!(ledger.deposit_into_vault(&ctx, usd_vault(), 10).is_err());
    assert!(ledger.pause_all(&ctx).is_err());

    assert_eq!(ledger.next_event_seq().unwrap(), before);
}
