//! Events emitted by committed ledger operations.
//!
//! Events are produced on the working copy and only become visible (in
//! memory and in the persisted log) when the operation commits.

use serde::{Deserialize, Serialize};

use crate::delegation::OperatorDetails;
use crate::types::{Address, Digest, VaultId};
use crate::withdrawal_queue::{CompletionMode, WithdrawalRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    Deposit {
        depositor: Address,
        vault: VaultId,
        amount: u64,
        shares: u64,
    },
    OperatorRegistered {
        operator: Address,
        details: OperatorDetails,
    },
    OperatorDetailsModified {
        operator: Address,
        details: OperatorDetails,
    },
    OperatorMetadataUpdated {
        operator: Address,
        uri: String,
    },
    Delegated {
        depositor: Address,
        operator: Address,
    },
    Undelegated {
        depositor: Address,
        operator: Address,
    },
    ForceUndelegated {
        depositor: Address,
        operator: Address,
    },
    OperatorSharesIncreased {
        operator: Address,
        depositor: Address,
        vault: VaultId,
        shares: u64,
    },
    OperatorSharesDecreased {
        operator: Address,
        depositor: Address,
        vault: VaultId,
        shares: u64,
    },
    WithdrawalQueued {
        root: Digest,
        request: WithdrawalRequest,
    },
    WithdrawalCompleted {
        root: Digest,
        mode: CompletionMode,
    },
    Paused {
        by: Address,
        mask: u64,
    },
    Unpaused {
        by: Address,
        mask: u64,
    },
    VaultAddedToAllowlist {
        vault: VaultId,
    },
    VaultRemovedFromAllowlist {
        vault: VaultId,
    },
    ThirdPartyWithdrawalForbiddenSet {
        vault: VaultId,
        forbidden: bool,
    },
    VaultDepositCapsSet {
        vault: VaultId,
        max_per_deposit: u64,
        max_total_deposits: u64,
    },
    MinWithdrawalDelaySet {
        previous: u64,
        delay: u64,
    },
    VaultWithdrawalDelaySet {
        vault: VaultId,
        previous: u64,
        delay: u64,
    },
}

impl LedgerEvent {
    /// Short name, used as a metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::Deposit { .. } => "deposit",
            LedgerEvent::OperatorRegistered { .. } => "operator_registered",
            LedgerEvent::OperatorDetailsModified { .. } => "operator_details_modified",
            LedgerEvent::OperatorMetadataUpdated { .. } => "operator_metadata_updated",
            LedgerEvent::Delegated { .. } => "delegated",
            LedgerEvent::Undelegated { .. } => "undelegated",
            LedgerEvent::ForceUndelegated { .. } => "force_undelegated",
            LedgerEvent::OperatorSharesIncreased { .. } => "operator_shares_increased",
            LedgerEvent::OperatorSharesDecreased { .. } => "operator_shares_decreased",
            LedgerEvent::WithdrawalQueued { .. } => "withdrawal_queued",
            LedgerEvent::WithdrawalCompleted { .. } => "withdrawal_completed",
            LedgerEvent::Paused { .. } => "paused",
            LedgerEvent::Unpaused { .. } => "unpaused",
            LedgerEvent::VaultAddedToAllowlist { .. } => "vault_added_to_allowlist",
            LedgerEvent::VaultRemovedFromAllowlist { .. } => "vault_removed_from_allowlist",
            LedgerEvent::ThirdPartyWithdrawalForbiddenSet { .. } => {
                "third_party_withdrawal_forbidden_set"
            }
            LedgerEvent::VaultDepositCapsSet { .. } => "vault_deposit_caps_set",
            LedgerEvent::MinWithdrawalDelaySet { .. } => "min_withdrawal_delay_set",
            LedgerEvent::VaultWithdrawalDelaySet { .. } => "vault_withdrawal_delay_set",
        }
    }
}
