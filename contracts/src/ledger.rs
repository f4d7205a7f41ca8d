//! # Ledger
//!
//! The entry points. Every mutating call takes an [`ExecutionContext`] and
//! runs as one atomic operation:
//!
//! 1. The current [`LedgerState`] is cloned into a working copy.
//! 2. The operation runs against the copy, recording asset movements in a
//!    journal instead of performing them and collecting events.
//! 3. On success the journal is handed to the asset collaborator in one
//!    all-or-nothing [`AssetTransfer::settle`] call, then the copy and its
//!    events are written to the database in one batch and swapped in.
//!
//! Any error before the swap leaves no trace: the copy and journal are
//! dropped. If the database write fails after settlement, the journal is
//! settled in reverse before the error is returned.
//!
//! Balance reads during an operation see the collaborator's balances
//! adjusted by the journal so far, so a deposit reads the vault's
//! post-transfer balance without any asset having moved yet.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use keel_protocol::storage::KeelDB;

use crate::access_gate::{AccessGate, OperationClass, PauseSet, PauserRegistry};
use crate::assets::{AssetTransfer, InMemoryAssets, Transfer, TransferError};
use crate::authorization::{
    verify_consent, AuthError, AuthorizationLayer, DelegationApproval, DepositConsent,
    DepositorDelegation, DomainSeparator, NonceScope, ProgramRegistry, SignedConsent,
};
use crate::config::LedgerConfig;
use crate::delegation::{DelegationError, DelegationGraph, OperatorDetails, OperatorProfile};
use crate::error::{ensure_same_len, LedgerError, LedgerResult};
use crate::events::LedgerEvent;
use crate::guard::ReentrancyGuard;
use crate::position_ledger::PositionLedger;
use crate::share_vault::{ShareVault, VaultError};
use crate::types::{Address, AssetId, Digest, ExecutionContext, VaultId};
use crate::withdrawal_queue::{
    CompletionMode, QueuedWithdrawalParams, WithdrawalError, WithdrawalQueue, WithdrawalRequest,
};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Everything the ledger persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub vaults: BTreeMap<VaultId, ShareVault>,
    pub positions: PositionLedger,
    pub delegation: DelegationGraph,
    pub withdrawals: WithdrawalQueue,
    pub auth: AuthorizationLayer,
    pub gate: AccessGate,
}

impl LedgerState {
    pub fn new(config: &LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        Ok(Self {
            vaults: BTreeMap::new(),
            positions: PositionLedger::new(),
            delegation: DelegationGraph::new(),
            withdrawals: WithdrawalQueue::new(config.min_withdrawal_delay)?,
            auth: AuthorizationLayer::new(DomainSeparator::new(
                &config.domain_name,
                config.network_id,
                config.ledger_identity,
            )),
            gate: AccessGate::new(PauseSet::from_mask(config.initial_pause_mask)?),
        })
    }

    /// Cross-component consistency checks. Empty when the state is sound.
    ///
    /// - every vault's `total_shares` equals the positions held in it plus
    ///   the shares sitting in pending withdrawals;
    /// - every operator total equals the positions of its delegators;
    /// - a depositor's vault list matches their nonzero positions.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        let mut held: BTreeMap<VaultId, u128> = BTreeMap::new();
        let mut delegated: BTreeMap<(Address, VaultId), u128> = BTreeMap::new();
        for (depositor, vault, shares) in self.positions.iter_positions() {
            *held.entry(*vault).or_default() += shares as u128;
            if let Some(op) = self.delegation.delegated_to(depositor) {
                *delegated.entry((op, *vault)).or_default() += shares as u128;
            }
            if !self.positions.vault_list(depositor).contains(vault) {
                violations.push(format!("{depositor} holds {vault} but it is not listed"));
            }
        }
        for (_, request) in self.withdrawals.pending() {
            for (vault, shares) in request.vaults.iter().zip(&request.shares) {
                *held.entry(*vault).or_default() += *shares as u128;
            }
        }
        for (id, vault) in &self.vaults {
            let accounted = held.remove(id).unwrap_or(0);
            if accounted != vault.total_shares as u128 {
                violations.push(format!(
                    "vault {id}: total_shares {} but {accounted} accounted for",
                    vault.total_shares
                ));
            }
        }
        for (id, accounted) in held {
            violations.push(format!("{accounted} shares held in unknown vault {id}"));
        }

        for (op, vault, shares) in self.delegation.iter_operator_shares() {
            let expected = delegated.remove(&(*op, *vault)).unwrap_or(0);
            if expected != shares as u128 {
                violations.push(format!(
                    "operator {op} vault {vault}: {shares} recorded, {expected} delegated"
                ));
            }
        }
        for ((op, vault), expected) in delegated {
            violations.push(format!(
                "operator {op} vault {vault}: 0 recorded, {expected} delegated"
            ));
        }
        violations
    }
}

/// Aggregate counters, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub vaults: usize,
    pub operators: usize,
    pub delegations: usize,
    pub pending_withdrawals: usize,
    pub paused_mask: u64,
}

/// One entry for `add_vaults_to_allowlist`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultListing {
    pub vault: VaultId,
    pub asset: AssetId,
    pub third_party_forbidden: bool,
}

// ---------------------------------------------------------------------------
// Working copy
// ---------------------------------------------------------------------------

/// One in-flight operation.
struct Txn<'a> {
    ctx: ExecutionContext,
    state: LedgerState,
    journal: Vec<Transfer>,
    events: Vec<LedgerEvent>,
    assets: &'a dyn AssetTransfer,
    programs: &'a ProgramRegistry,
    config: &'a LedgerConfig,
    pausers: &'a dyn PauserRegistry,
}

impl Txn<'_> {
    fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    fn ensure_open(&self, class: OperationClass) -> LedgerResult<()> {
        Ok(self.state.gate.ensure_open(class)?)
    }

    fn ensure_role(&self, role: &Address) -> LedgerResult<()> {
        if self.ctx.caller != *role {
            return Err(LedgerError::NotAdministrator);
        }
        Ok(())
    }

    /// Collaborator balance adjusted by the journal so far.
    fn balance_of(&self, asset: &AssetId, holder: &Address) -> u64 {
        let base = self.assets.balance_of(asset, holder) as i128;
        let delta: i128 = self
            .journal
            .iter()
            .filter(|t| t.asset == *asset)
            .map(|t| {
                let mut d = 0i128;
                if t.to == *holder {
                    d += t.amount as i128;
                }
                if t.from == *holder {
                    d -= t.amount as i128;
                }
                d
            })
            .sum();
        (base + delta).clamp(0, u64::MAX as i128) as u64
    }

    fn transfer(&mut self, asset: AssetId, from: Address, to: Address, amount: u64) -> LedgerResult<()> {
        let available = self.balance_of(&asset, &from);
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                asset: asset.to_hex(),
                holder: from.to_hex(),
                available,
                required: amount,
            }
            .into());
        }
        self.journal.push(Transfer {
            asset,
            from,
            to,
            amount,
        });
        Ok(())
    }

    fn vault_mut(&mut self, id: &VaultId) -> LedgerResult<&mut ShareVault> {
        self.state
            .vaults
            .get_mut(id)
            .ok_or_else(|| LedgerError::UnknownVault(id.to_hex()))
    }

    fn vault_asset(&self, id: &VaultId) -> LedgerResult<AssetId> {
        self.state
            .vaults
            .get(id)
            .map(|v| v.asset)
            .ok_or_else(|| LedgerError::UnknownVault(id.to_hex()))
    }

    // -- Positions ----------------------------------------------------------

    /// Add shares to a position and to the depositor's operator, if any.
    fn credit_position(&mut self, depositor: Address, vault: VaultId, shares: u64) -> LedgerResult<()> {
        self.state.positions.add_shares(depositor, vault, shares)?;
        if let Some(operator) = self
            .state
            .delegation
            .increase_operator_shares(&depositor, &vault, shares)?
        {
            self.emit(LedgerEvent::OperatorSharesIncreased {
                operator,
                depositor,
                vault,
                shares,
            });
        }
        Ok(())
    }

    /// Remove shares from a position and from the depositor's operator.
    fn debit_position(&mut self, depositor: Address, vault: VaultId, shares: u64) -> LedgerResult<()> {
        let available = self.state.positions.shares_of(&depositor, &vault);
        if shares > available {
            return Err(WithdrawalError::SharesExceedPosition {
                requested: shares,
                available,
            }
            .into());
        }
        if let Some(operator) = self
            .state
            .delegation
            .decrease_operator_shares(&depositor, &vault, shares)?
        {
            self.emit(LedgerEvent::OperatorSharesDecreased {
                operator,
                depositor,
                vault,
                shares,
            });
        }
        self.state.positions.remove_shares(&depositor, &vault, shares)?;
        Ok(())
    }

    // -- Deposits -----------------------------------------------------------

    /// `funder` pays `amount` into `vault`; `depositor` receives the shares.
    fn deposit(&mut self, funder: Address, depositor: Address, vault: VaultId, amount: u64) -> LedgerResult<u64> {
        self.ensure_open(OperationClass::Deposits)?;
        self.state.positions.ensure_allowlisted(&vault)?;
        if funder == vault || depositor == vault {
            return Err(VaultError::SelfDeposit(vault.to_hex()).into());
        }
        let asset = self.vault_asset(&vault)?;

        self.transfer(asset, funder, vault, amount)?;
        let post_transfer_balance = self.balance_of(&asset, &vault);
        let shares = self.vault_mut(&vault)?.deposit(amount, post_transfer_balance)?;
        self.credit_position(depositor, vault, shares)?;

        self.emit(LedgerEvent::Deposit {
            depositor,
            vault,
            amount,
            shares,
        });
        Ok(shares)
    }

    fn deposit_by_consent(
        &mut self,
        depositor: Address,
        vault: VaultId,
        amount: u64,
        consent: &SignedConsent,
    ) -> LedgerResult<u64> {
        let now = self.ctx.now;
        if consent.expiry < now {
            return Err(AuthError::ConsentExpired {
                expiry: consent.expiry,
                now,
            }
            .into());
        }
        if self.state.positions.third_party_forbidden(&vault) {
            return Err(WithdrawalError::ThirdPartyWithdrawalForbidden(vault.to_hex()).into());
        }
        let message = DepositConsent {
            depositor,
            vault,
            asset: self.vault_asset(&vault)?,
            amount,
            nonce: self.state.auth.nonce(NonceScope::Deposit, &depositor),
            expiry: consent.expiry,
        };
        let digest = self.state.auth.digest(self.ctx.network_id, &message);
        verify_consent(self.programs, &depositor, &digest, &consent.signature)?;
        self.state.auth.consume_nonce(NonceScope::Deposit, &depositor);

        self.deposit(self.ctx.caller, depositor, vault, amount)
    }

    // -- Delegation ---------------------------------------------------------

    fn delegate(
        &mut self,
        depositor: Address,
        operator: Address,
        approval: Option<&SignedConsent>,
        approver_salt: Digest,
    ) -> LedgerResult<()> {
        self.ensure_open(OperationClass::NewDelegation)?;
        if self.state.delegation.is_delegated(&depositor) {
            return Err(DelegationError::AlreadyDelegated(depositor.to_hex()).into());
        }
        if !self.state.delegation.is_operator(&operator) {
            return Err(DelegationError::OperatorNotRegistered(operator.to_hex()).into());
        }

        if let Some(approver) = self
            .state
            .delegation
            .required_approver(&operator, &depositor, &self.ctx.caller)
        {
            let consent = approval.ok_or(AuthError::ApprovalMissing)?;
            if consent.expiry < self.ctx.now {
                return Err(AuthError::ApprovalExpired {
                    expiry: consent.expiry,
                    now: self.ctx.now,
                }
                .into());
            }
            if self.state.auth.salt_spent(&approver, &approver_salt) {
                return Err(AuthError::SaltAlreadySpent.into());
            }
            let message = DelegationApproval {
                approver,
                depositor,
                operator,
                salt: approver_salt,
                expiry: consent.expiry,
            };
            let digest = self.state.auth.digest(self.ctx.network_id, &message);
            verify_consent(self.programs, &approver, &digest, &consent.signature)?;
            self.state.auth.spend_salt(&approver, &approver_salt)?;
        }

        let positions = self.state.positions.deposits(&depositor);
        self.state
            .delegation
            .delegate(depositor, operator, &positions)?;
        self.emit(LedgerEvent::Delegated {
            depositor,
            operator,
        });
        for (vault, shares) in positions {
            self.emit(LedgerEvent::OperatorSharesIncreased {
                operator,
                depositor,
                vault,
                shares,
            });
        }
        Ok(())
    }

    fn delegate_by_consent(
        &mut self,
        depositor: Address,
        operator: Address,
        depositor_consent: &SignedConsent,
        approval: Option<&SignedConsent>,
        approver_salt: Digest,
    ) -> LedgerResult<()> {
        let now = self.ctx.now;
        if depositor_consent.expiry < now {
            return Err(AuthError::ConsentExpired {
                expiry: depositor_consent.expiry,
                now,
            }
            .into());
        }
        let message = DepositorDelegation {
            depositor,
            operator,
            nonce: self.state.auth.nonce(NonceScope::Delegation, &depositor),
            expiry: depositor_consent.expiry,
        };
        let digest = self.state.auth.digest(self.ctx.network_id, &message);
        verify_consent(self.programs, &depositor, &digest, &depositor_consent.signature)?;
        self.state
            .auth
            .consume_nonce(NonceScope::Delegation, &depositor);

        self.delegate(depositor, operator, approval, approver_salt)
    }

    fn register_operator(&mut self, details: OperatorDetails, metadata_uri: String) -> LedgerResult<()> {
        self.ensure_open(OperationClass::NewDelegation)?;
        let operator = self.ctx.caller;
        let positions = self.state.positions.deposits(&operator);
        self.state.delegation.register_operator(
            operator,
            details.clone(),
            metadata_uri.clone(),
            &positions,
        )?;

        self.emit(LedgerEvent::OperatorRegistered { operator, details });
        self.emit(LedgerEvent::OperatorMetadataUpdated {
            operator,
            uri: metadata_uri,
        });
        self.emit(LedgerEvent::Delegated {
            depositor: operator,
            operator,
        });
        for (vault, shares) in positions {
            self.emit(LedgerEvent::OperatorSharesIncreased {
                operator,
                depositor: operator,
                vault,
                shares,
            });
        }
        Ok(())
    }

    fn undelegate(&mut self, depositor: Address) -> LedgerResult<Vec<Digest>> {
        self.ensure_open(OperationClass::EnterWithdrawalQueue)?;
        let operator = self
            .state
            .delegation
            .check_undelegate(&depositor, &self.ctx.caller)?;
        if self.ctx.caller != depositor {
            self.emit(LedgerEvent::ForceUndelegated {
                depositor,
                operator,
            });
        }
        self.emit(LedgerEvent::Undelegated {
            depositor,
            operator,
        });

        let positions = self.state.positions.deposits(&depositor);
        for (vault, shares) in &positions {
            self.debit_position(depositor, *vault, *shares)?;
        }
        self.state.delegation.clear_delegation(&depositor)?;

        let mut roots = Vec::with_capacity(positions.len());
        for (vault, shares) in positions {
            let params = QueuedWithdrawalParams {
                vaults: vec![vault],
                shares: vec![shares],
                withdrawer: depositor,
            };
            roots.push(self.enqueue(depositor, operator, params));
        }
        Ok(roots)
    }

    // -- Withdrawals --------------------------------------------------------

    fn enqueue(&mut self, depositor: Address, operator: Address, params: QueuedWithdrawalParams) -> Digest {
        let (root, request) = self
            .state
            .withdrawals
            .enqueue(depositor, operator, params, self.ctx.now);
        self.emit(LedgerEvent::WithdrawalQueued { root, request });
        root
    }

    fn queue_withdrawal(&mut self, params: QueuedWithdrawalParams) -> LedgerResult<Digest> {
        params.validate()?;
        let depositor = self.ctx.caller;
        if params.withdrawer != depositor {
            if let Some(vault) = params
                .vaults
                .iter()
                .find(|v| self.state.positions.third_party_forbidden(v))
            {
                return Err(WithdrawalError::ThirdPartyWithdrawalForbidden(vault.to_hex()).into());
            }
        }
        for (vault, shares) in params.vaults.iter().zip(&params.shares) {
            self.debit_position(depositor, *vault, *shares)?;
        }
        let operator = self
            .state
            .delegation
            .delegated_to(&depositor)
            .unwrap_or(Address::ZERO);
        Ok(self.enqueue(depositor, operator, params))
    }

    fn complete_withdrawal(&mut self, request: &WithdrawalRequest, mode: CompletionMode) -> LedgerResult<()> {
        self.ensure_open(OperationClass::ExitWithdrawalQueue)?;
        let root = self.state.withdrawals.take_for_completion(
            request,
            &self.ctx.caller,
            self.ctx.now,
        )?;

        let withdrawer = request.withdrawer;
        for (vault, shares) in request.vaults.iter().zip(&request.shares) {
            match mode {
                CompletionMode::AsAssets => {
                    self.ensure_open(OperationClass::VaultWithdrawals)?;
                    let asset = self.vault_asset(vault)?;
                    let balance = self.balance_of(&asset, vault);
                    let amount = self.vault_mut(vault)?.withdraw(*shares, balance)?;
                    if amount > 0 {
                        self.transfer(asset, *vault, withdrawer, amount)?;
                    }
                }
                CompletionMode::AsShares => {
                    self.credit_position(withdrawer, *vault, *shares)?;
                }
            }
        }

        self.emit(LedgerEvent::WithdrawalCompleted { root, mode });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The restaking ledger.
pub struct Ledger<A: AssetTransfer = InMemoryAssets> {
    config: LedgerConfig,
    state: LedgerState,
    assets: A,
    programs: ProgramRegistry,
    pausers: Box<dyn PauserRegistry + Send + Sync>,
    db: Option<KeelDB>,
    guard: ReentrancyGuard,
    /// Committed events, kept only when there is no database.
    memory_log: Vec<LedgerEvent>,
}

impl<A: AssetTransfer> Ledger<A> {
    /// An in-memory ledger with nothing persisted.
    pub fn new(config: LedgerConfig, assets: A) -> LedgerResult<Self> {
        let state = LedgerState::new(&config)?;
        Ok(Self::assemble(config, state, assets, None))
    }

    /// Open a persistent ledger, restoring the last committed state if the
    /// database has one.
    ///
    /// A database keeps the config it was first opened with; a different
    /// `config` passed later is ignored with a warning.
    pub fn open(db: KeelDB, config: LedgerConfig, assets: A) -> LedgerResult<Self> {
        let config = match db.get_config::<LedgerConfig>()? {
            Some(stored) => {
                if stored != config {
                    warn!("ignoring supplied ledger config; database was initialized with another");
                }
                stored
            }
            None => {
                config.validate()?;
                db.put_config(&config)?;
                config
            }
        };
        let state = match db.load_state::<LedgerState>()? {
            Some(state) => {
                info!(
                    vaults = state.vaults.len(),
                    pending = state.withdrawals.pending_count(),
                    "ledger state restored"
                );
                state
            }
            None => {
                let state = LedgerState::new(&config)?;
                db.commit::<_, LedgerEvent>(&state, &[])?;
                info!("ledger state initialized");
                state
            }
        };
        Ok(Self::assemble(config, state, assets, Some(db)))
    }

    fn assemble(config: LedgerConfig, state: LedgerState, assets: A, db: Option<KeelDB>) -> Self {
        let pausers = Box::new(config.pauser_registry());
        Self {
            config,
            state,
            assets,
            programs: ProgramRegistry::new(),
            pausers,
            db,
            guard: ReentrancyGuard::new(),
            memory_log: Vec::new(),
        }
    }

    pub fn with_program_registry(mut self, programs: ProgramRegistry) -> Self {
        self.programs = programs;
        self
    }

    pub fn with_pauser_registry(mut self, pausers: Box<dyn PauserRegistry + Send + Sync>) -> Self {
        self.pausers = pausers;
        self
    }

    /// Run `op` atomically. See the module docs.
    fn execute<T>(
        &mut self,
        ctx: &ExecutionContext,
        name: &'static str,
        op: impl FnOnce(&mut Txn<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let _entry = self.guard.enter()?;

        let mut txn = Txn {
            ctx: *ctx,
            state: self.state.clone(),
            journal: Vec::new(),
            events: Vec::new(),
            assets: &self.assets,
            programs: &self.programs,
            config: &self.config,
            pausers: self.pausers.as_ref(),
        };
        let result = op(&mut txn);
        let Txn {
            state,
            journal,
            events,
            ..
        } = txn;
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                debug!(op = name, caller = %ctx.caller, error = %e, "operation rejected");
                return Err(e);
            }
        };

        self.assets.settle(&journal)?;
        if let Some(db) = &self.db {
            if let Err(e) = db.commit(&state, &events) {
                let undo: Vec<Transfer> = journal.iter().rev().map(Transfer::reversed).collect();
                if let Err(undo_err) = self.assets.settle(&undo) {
                    error!(op = name, error = %undo_err, "failed to reverse settlement after storage error");
                }
                return Err(e.into());
            }
        } else {
            self.memory_log.extend(events.iter().cloned());
        }
        self.state = state;
        debug!(op = name, transfers = journal.len(), events = events.len(), "operation committed");
        Ok(value)
    }

    // -- Deposits -----------------------------------------------------------

    /// Deposit `amount` of the vault's asset from the caller.
    pub fn deposit_into_vault(&mut self, ctx: &ExecutionContext, vault: VaultId, amount: u64) -> LedgerResult<u64> {
        let shares = self.execute(ctx, "deposit_into_vault", |tx| {
            tx.deposit(ctx.caller, ctx.caller, vault, amount)
        })?;
        info!(depositor = %ctx.caller, %vault, amount, shares, "deposit");
        Ok(shares)
    }

    /// Deposit funded by the caller and credited to `depositor`, who signed
    /// a Deposit consent.
    pub fn deposit_into_vault_by_consent(
        &mut self,
        ctx: &ExecutionContext,
        depositor: Address,
        vault: VaultId,
        amount: u64,
        consent: &SignedConsent,
    ) -> LedgerResult<u64> {
        let shares = self.execute(ctx, "deposit_into_vault_by_consent", |tx| {
            tx.deposit_by_consent(depositor, vault, amount, consent)
        })?;
        info!(%depositor, funder = %ctx.caller, %vault, amount, shares, "deposit by consent");
        Ok(shares)
    }

    // -- Operators ----------------------------------------------------------

    pub fn register_operator(
        &mut self,
        ctx: &ExecutionContext,
        details: OperatorDetails,
        metadata_uri: impl Into<String>,
    ) -> LedgerResult<()> {
        let uri = metadata_uri.into();
        self.execute(ctx, "register_operator", |tx| tx.register_operator(details, uri))?;
        info!(operator = %ctx.caller, "operator registered");
        Ok(())
    }

    pub fn modify_operator_details(&mut self, ctx: &ExecutionContext, details: OperatorDetails) -> LedgerResult<()> {
        self.execute(ctx, "modify_operator_details", |tx| {
            let operator = tx.ctx.caller;
            tx.state
                .delegation
                .modify_operator_details(&operator, details.clone())?;
            tx.emit(LedgerEvent::OperatorDetailsModified { operator, details });
            Ok(())
        })?;
        info!(operator = %ctx.caller, "operator details modified");
        Ok(())
    }

    pub fn update_operator_metadata(&mut self, ctx: &ExecutionContext, uri: impl Into<String>) -> LedgerResult<()> {
        let uri = uri.into();
        self.execute(ctx, "update_operator_metadata", |tx| {
            let operator = tx.ctx.caller;
            tx.state
                .delegation
                .update_metadata_uri(&operator, uri.clone())?;
            tx.emit(LedgerEvent::OperatorMetadataUpdated { operator, uri });
            Ok(())
        })
    }

    // -- Delegation ---------------------------------------------------------

    /// Delegate the caller to `operator`.
    ///
    /// A depositor acting directly needs no approver consent, even for a
    /// gated operator. Relayed delegations go through
    /// [`Ledger::delegate_by_consent`].
    pub fn delegate(&mut self, ctx: &ExecutionContext, operator: Address) -> LedgerResult<()> {
        self.execute(ctx, "delegate", |tx| {
            tx.delegate(ctx.caller, operator, None, [0u8; 32])
        })?;
        info!(depositor = %ctx.caller, %operator, "delegated");
        Ok(())
    }

    /// Delegate `depositor` on their signed behalf.
    pub fn delegate_by_consent(
        &mut self,
        ctx: &ExecutionContext,
        depositor: Address,
        operator: Address,
        depositor_consent: &SignedConsent,
        approval: Option<&SignedConsent>,
        approver_salt: Digest,
    ) -> LedgerResult<()> {
        self.execute(ctx, "delegate_by_consent", |tx| {
            tx.delegate_by_consent(depositor, operator, depositor_consent, approval, approver_salt)
        })?;
        info!(%depositor, %operator, relayer = %ctx.caller, "delegated by consent");
        Ok(())
    }

    /// Undelegate `depositor`, queueing one withdrawal per vault they hold.
    pub fn undelegate(&mut self, ctx: &ExecutionContext, depositor: Address) -> LedgerResult<Vec<Digest>> {
        let roots = self.execute(ctx, "undelegate", |tx| tx.undelegate(depositor))?;
        info!(%depositor, by = %ctx.caller, withdrawals = roots.len(), "undelegated");
        Ok(roots)
    }

    // -- Withdrawals --------------------------------------------------------

    /// Queue one withdrawal per parameter set. Returns their roots.
    pub fn queue_withdrawals(
        &mut self,
        ctx: &ExecutionContext,
        params: Vec<QueuedWithdrawalParams>,
    ) -> LedgerResult<Vec<Digest>> {
        let roots = self.execute(ctx, "queue_withdrawals", |tx| {
            tx.ensure_open(OperationClass::EnterWithdrawalQueue)?;
            params
                .into_iter()
                .map(|p| tx.queue_withdrawal(p))
                .collect::<LedgerResult<Vec<_>>>()
        })?;
        info!(depositor = %ctx.caller, count = roots.len(), "withdrawals queued");
        Ok(roots)
    }

    pub fn complete_withdrawal(
        &mut self,
        ctx: &ExecutionContext,
        request: &WithdrawalRequest,
        mode: CompletionMode,
    ) -> LedgerResult<()> {
        self.execute(ctx, "complete_withdrawal", |tx| tx.complete_withdrawal(request, mode))?;
        info!(withdrawer = %ctx.caller, ?mode, "withdrawal completed");
        Ok(())
    }

    /// Complete several withdrawals. Any failure aborts all of them.
    pub fn complete_withdrawals(
        &mut self,
        ctx: &ExecutionContext,
        requests: &[WithdrawalRequest],
        modes: &[CompletionMode],
    ) -> LedgerResult<()> {
        ensure_same_len(requests.len(), modes.len())?;
        self.execute(ctx, "complete_withdrawals", |tx| {
            for (request, mode) in requests.iter().zip(modes) {
                tx.complete_withdrawal(request, *mode)?;
            }
            Ok(())
        })?;
        info!(withdrawer = %ctx.caller, count = requests.len(), "withdrawals completed");
        Ok(())
    }

    // -- Allow-list administration -------------------------------------------

    /// List vaults for deposit, creating each vault on first listing.
    pub fn add_vaults_to_allowlist(&mut self, ctx: &ExecutionContext, listings: &[VaultListing]) -> LedgerResult<()> {
        self.execute(ctx, "add_vaults_to_allowlist", |tx| {
            tx.ensure_role(&tx.config.allowlist_admin)?;
            for listing in listings {
                if listing.vault.is_zero() {
                    return Err(LedgerError::ZeroIdentity("vault"));
                }
                tx.state
                    .vaults
                    .entry(listing.vault)
                    .or_insert_with(|| ShareVault::new(listing.vault, listing.asset));
                if tx
                    .state
                    .positions
                    .allow_vault(listing.vault, listing.third_party_forbidden)
                {
                    tx.emit(LedgerEvent::VaultAddedToAllowlist {
                        vault: listing.vault,
                    });
                    tx.emit(LedgerEvent::ThirdPartyWithdrawalForbiddenSet {
                        vault: listing.vault,
                        forbidden: listing.third_party_forbidden,
                    });
                }
            }
            Ok(())
        })?;
        info!(count = listings.len(), "vaults added to allow-list");
        Ok(())
    }

    pub fn remove_vaults_from_allowlist(&mut self, ctx: &ExecutionContext, vaults: &[VaultId]) -> LedgerResult<()> {
        self.execute(ctx, "remove_vaults_from_allowlist", |tx| {
            tx.ensure_role(&tx.config.allowlist_admin)?;
            for vault in vaults {
                if tx.state.positions.disallow_vault(vault) {
                    tx.emit(LedgerEvent::VaultRemovedFromAllowlist { vault: *vault });
                }
            }
            Ok(())
        })
    }

    pub fn set_third_party_withdrawal_forbidden(
        &mut self,
        ctx: &ExecutionContext,
        vaults: &[VaultId],
        forbidden: &[bool],
    ) -> LedgerResult<()> {
        ensure_same_len(vaults.len(), forbidden.len())?;
        self.execute(ctx, "set_third_party_withdrawal_forbidden", |tx| {
            tx.ensure_role(&tx.config.allowlist_admin)?;
            for (vault, flag) in vaults.iter().zip(forbidden) {
                tx.state.positions.set_third_party_forbidden(*vault, *flag);
                tx.emit(LedgerEvent::ThirdPartyWithdrawalForbiddenSet {
                    vault: *vault,
                    forbidden: *flag,
                });
            }
            Ok(())
        })
    }

    pub fn set_vault_deposit_caps(
        &mut self,
        ctx: &ExecutionContext,
        vault: VaultId,
        max_per_deposit: u64,
        max_total_deposits: u64,
    ) -> LedgerResult<()> {
        self.execute(ctx, "set_vault_deposit_caps", |tx| {
            tx.ensure_role(&tx.config.allowlist_admin)?;
            tx.vault_mut(&vault)?
                .set_deposit_caps(max_per_deposit, max_total_deposits)?;
            tx.emit(LedgerEvent::VaultDepositCapsSet {
                vault,
                max_per_deposit,
                max_total_deposits,
            });
            Ok(())
        })
    }

    // -- Delay administration ------------------------------------------------

    pub fn set_min_withdrawal_delay(&mut self, ctx: &ExecutionContext, delay: u64) -> LedgerResult<()> {
        self.execute(ctx, "set_min_withdrawal_delay", |tx| {
            tx.ensure_role(&tx.config.owner)?;
            let previous = tx.state.withdrawals.set_min_delay(delay)?;
            tx.emit(LedgerEvent::MinWithdrawalDelaySet { previous, delay });
            Ok(())
        })?;
        info!(delay, "minimum withdrawal delay set");
        Ok(())
    }

    pub fn set_vault_withdrawal_delays(
        &mut self,
        ctx: &ExecutionContext,
        vaults: &[VaultId],
        delays: &[u64],
    ) -> LedgerResult<()> {
        ensure_same_len(vaults.len(), delays.len())?;
        self.execute(ctx, "set_vault_withdrawal_delays", |tx| {
            tx.ensure_role(&tx.config.owner)?;
            for (vault, delay) in vaults.iter().zip(delays) {
                let previous = tx.state.withdrawals.set_vault_delay(*vault, *delay)?;
                tx.emit(LedgerEvent::VaultWithdrawalDelaySet {
                    vault: *vault,
                    previous,
                    delay: *delay,
                });
            }
            Ok(())
        })
    }

    // -- Pausing ------------------------------------------------------------

    pub fn pause(&mut self, ctx: &ExecutionContext, mask: u64) -> LedgerResult<()> {
        self.execute(ctx, "pause", |tx| {
            tx.state.gate.pause(tx.pausers, &tx.ctx.caller, mask)?;
            let mask = tx.state.gate.mask();
            tx.emit(LedgerEvent::Paused {
                by: tx.ctx.caller,
                mask,
            });
            Ok(())
        })?;
        warn!(by = %ctx.caller, mask = self.paused_mask(), "ledger paused");
        Ok(())
    }

    pub fn pause_all(&mut self, ctx: &ExecutionContext) -> LedgerResult<()> {
        self.execute(ctx, "pause_all", |tx| {
            tx.state.gate.pause_all(tx.pausers, &tx.ctx.caller)?;
            let mask = tx.state.gate.mask();
            tx.emit(LedgerEvent::Paused {
                by: tx.ctx.caller,
                mask,
            });
            Ok(())
        })?;
        warn!(by = %ctx.caller, "ledger fully paused");
        Ok(())
    }

    pub fn unpause(&mut self, ctx: &ExecutionContext, mask: u64) -> LedgerResult<()> {
        self.execute(ctx, "unpause", |tx| {
            tx.state.gate.unpause(tx.pausers, &tx.ctx.caller, mask)?;
            tx.emit(LedgerEvent::Unpaused {
                by: tx.ctx.caller,
                mask,
            });
            Ok(())
        })?;
        info!(by = %ctx.caller, mask, "ledger unpaused");
        Ok(())
    }

    pub fn unpause_all(&mut self, ctx: &ExecutionContext) -> LedgerResult<()> {
        self.execute(ctx, "unpause_all", |tx| {
            tx.state.gate.unpause_all(tx.pausers, &tx.ctx.caller)?;
            tx.emit(LedgerEvent::Unpaused {
                by: tx.ctx.caller,
                mask: 0,
            });
            Ok(())
        })?;
        info!(by = %ctx.caller, "ledger fully unpaused");
        Ok(())
    }

    // -- Queries ------------------------------------------------------------

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn assets(&self) -> &A {
        &self.assets
    }

    /// Direct access to the collaborator, outside of any operation.
    pub fn assets_mut(&mut self) -> &mut A {
        &mut self.assets
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            vaults: self.state.vaults.len(),
            operators: self.state.delegation.operators().count(),
            delegations: self.state.delegation.edges().count(),
            pending_withdrawals: self.state.withdrawals.pending_count(),
            paused_mask: self.state.gate.mask(),
        }
    }

    pub fn vault(&self, id: &VaultId) -> Option<&ShareVault> {
        self.state.vaults.get(id)
    }

    pub fn is_vault_allowlisted(&self, id: &VaultId) -> bool {
        self.state.positions.is_allowlisted(id)
    }

    pub fn third_party_withdrawal_forbidden(&self, id: &VaultId) -> bool {
        self.state.positions.third_party_forbidden(id)
    }

    pub fn shares_of(&self, depositor: &Address, vault: &VaultId) -> u64 {
        self.state.positions.shares_of(depositor, vault)
    }

    /// `(vault, shares)` for every position `depositor` holds.
    pub fn deposits(&self, depositor: &Address) -> Vec<(VaultId, u64)> {
        self.state.positions.deposits(depositor)
    }

    pub fn delegated_to(&self, depositor: &Address) -> Option<Address> {
        self.state.delegation.delegated_to(depositor)
    }

    pub fn is_delegated(&self, depositor: &Address) -> bool {
        self.state.delegation.is_delegated(depositor)
    }

    pub fn is_operator(&self, who: &Address) -> bool {
        self.state.delegation.is_operator(who)
    }

    pub fn operator_profile(&self, operator: &Address) -> Option<&OperatorProfile> {
        self.state.delegation.operator_profile(operator)
    }

    pub fn operator_shares(&self, operator: &Address, vault: &VaultId) -> u64 {
        self.state.delegation.operator_shares(operator, vault)
    }

    pub fn is_withdrawal_pending(&self, root: &Digest) -> bool {
        self.state.withdrawals.is_pending(root)
    }

    pub fn pending_withdrawal(&self, root: &Digest) -> Option<&WithdrawalRequest> {
        self.state.withdrawals.pending_request(root)
    }

    pub fn cumulative_withdrawals_queued(&self, depositor: &Address) -> u64 {
        self.state.withdrawals.cumulative_queued(depositor)
    }

    pub fn min_withdrawal_delay(&self) -> u64 {
        self.state.withdrawals.min_delay()
    }

    pub fn vault_withdrawal_delay(&self, vault: &VaultId) -> u64 {
        self.state.withdrawals.vault_delay(vault)
    }

    pub fn delegation_nonce(&self, signer: &Address) -> u64 {
        self.state.auth.nonce(NonceScope::Delegation, signer)
    }

    pub fn deposit_nonce(&self, signer: &Address) -> u64 {
        self.state.auth.nonce(NonceScope::Deposit, signer)
    }

    pub fn approver_salt_spent(&self, approver: &Address, salt: &Digest) -> bool {
        self.state.auth.salt_spent(approver, salt)
    }

    pub fn paused_mask(&self) -> u64 {
        self.state.gate.mask()
    }

    pub fn is_paused(&self, class: OperationClass) -> bool {
        self.state.gate.is_paused(class)
    }

    // -- Conversions --------------------------------------------------------

    fn vault_and_balance(&self, id: &VaultId) -> LedgerResult<(&ShareVault, u64)> {
        let vault = self
            .state
            .vaults
            .get(id)
            .ok_or_else(|| LedgerError::UnknownVault(id.to_hex()))?;
        Ok((vault, self.assets.balance_of(&vault.asset, id)))
    }

    pub fn underlying_to_shares_view(&self, vault: &VaultId, amount: u64) -> LedgerResult<u64> {
        let (v, balance) = self.vault_and_balance(vault)?;
        Ok(v.underlying_to_shares_view(amount, balance)?)
    }

    pub fn shares_to_underlying_view(&self, vault: &VaultId, shares: u64) -> LedgerResult<u64> {
        let (v, balance) = self.vault_and_balance(vault)?;
        Ok(v.shares_to_underlying_view(shares, balance)?)
    }

    /// What `depositor`'s position in `vault` is worth in the asset.
    pub fn user_underlying_view(&self, vault: &VaultId, depositor: &Address) -> LedgerResult<u64> {
        self.shares_to_underlying_view(vault, self.shares_of(depositor, vault))
    }

    // -- Digest calculators -------------------------------------------------

    pub fn delegation_approval_digest(
        &self,
        approver: Address,
        depositor: Address,
        operator: Address,
        salt: Digest,
        expiry: u64,
        network_id: u64,
    ) -> Digest {
        self.state.auth.digest(
            network_id,
            &DelegationApproval {
                approver,
                depositor,
                operator,
                salt,
                expiry,
            },
        )
    }

    /// Digest a depositor signs for `delegate_by_consent` at their current nonce.
    pub fn depositor_delegation_digest(
        &self,
        depositor: Address,
        operator: Address,
        expiry: u64,
        network_id: u64,
    ) -> Digest {
        self.state.auth.digest(
            network_id,
            &DepositorDelegation {
                depositor,
                operator,
                nonce: self.delegation_nonce(&depositor),
                expiry,
            },
        )
    }

    /// Digest a depositor signs for `deposit_into_vault_by_consent` at their
    /// current nonce.
    pub fn deposit_digest(
        &self,
        depositor: Address,
        vault: VaultId,
        amount: u64,
        expiry: u64,
        network_id: u64,
    ) -> LedgerResult<Digest> {
        let (v, _) = self.vault_and_balance(&vault)?;
        Ok(self.state.auth.digest(
            network_id,
            &DepositConsent {
                depositor,
                vault,
                asset: v.asset,
                amount,
                nonce: self.deposit_nonce(&depositor),
                expiry,
            },
        ))
    }

    pub fn withdrawal_root(&self, request: &WithdrawalRequest) -> Digest {
        request.root()
    }

    // -- Events -------------------------------------------------------------

    /// Committed events with sequence number ≥ `from`.
    pub fn events_from(&self, from: u64) -> LedgerResult<Vec<(u64, LedgerEvent)>> {
        match &self.db {
            Some(db) => Ok(db.events_from(from)?),
            None => Ok(self
                .memory_log
                .iter()
                .enumerate()
                .skip(from as usize)
                .map(|(i, e)| (i as u64, e.clone()))
                .collect()),
        }
    }

    /// Sequence number the next committed event will receive.
    pub fn next_event_seq(&self) -> LedgerResult<u64> {
        match &self.db {
            Some(db) => Ok(db.next_event_seq()?),
            None => Ok(self.memory_log.len() as u64),
        }
    }
}
