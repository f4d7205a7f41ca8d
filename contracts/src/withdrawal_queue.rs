//! # Withdrawal Queue
//!
//! Shares leave a position in two steps. Queuing debits the position (and
//! the operator total) immediately and records a [`WithdrawalRequest`]
//! snapshot. After the unbonding delay the withdrawer completes it, either
//! redeeming the shares for the asset or re-crediting them as shares.
//!
//! A request is identified by its root, a tagged BLAKE3 hash over its
//! canonical field encoding. The per-depositor nonce makes otherwise equal
//! requests distinct. Roots are pending from queueing until completion and
//! can be completed exactly once. There is no cancellation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use keel_protocol::config::MAX_WITHDRAWAL_DELAY;
use keel_protocol::crypto::{tagged_hash, FieldEncoder};

use crate::error::ErrorKind;
use crate::types::{Address, Digest, VaultId};

const WITHDRAWAL_ROOT_TAG: &[u8] = b"keel:withdrawal-root:v1\0";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WithdrawalError {
    #[error("withdrawal {0} is not pending")]
    RequestNotFound(String),

    #[error("withdrawal not completable until {ready_at} (now {now})")]
    DelayNotElapsed { ready_at: u64, now: u64 },

    #[error("caller is not the withdrawer")]
    WrongWithdrawer,

    #[error("vault {0} forbids withdrawals to a third party")]
    ThirdPartyWithdrawalForbidden(String),

    #[error("withdrawal of {requested} shares exceeds position of {available}")]
    SharesExceedPosition { requested: u64, available: u64 },

    #[error("withdrawal names no vaults")]
    EmptyWithdrawal,

    #[error("withdrawal lists {vaults} vaults but {shares} share amounts")]
    LengthMismatch { vaults: usize, shares: usize },

    #[error("withdrawer must not be the zero identity")]
    ZeroWithdrawer,

    #[error("delay {0} exceeds the maximum withdrawal delay")]
    DelayTooLong(u64),
}

impl WithdrawalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WithdrawalError::RequestNotFound(_) | WithdrawalError::DelayNotElapsed { .. } => {
                ErrorKind::State
            }
            WithdrawalError::WrongWithdrawer
            | WithdrawalError::ThirdPartyWithdrawalForbidden(_) => ErrorKind::Authorization,
            _ => ErrorKind::Validation,
        }
    }
}

/// How a completed withdrawal pays out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionMode {
    /// Burn the shares and transfer the asset to the withdrawer.
    #[default]
    AsAssets,
    /// Re-credit the shares to the withdrawer's position.
    AsShares,
}

/// One set of parameters for `queue_withdrawals`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedWithdrawalParams {
    pub vaults: Vec<VaultId>,
    pub shares: Vec<u64>,
    pub withdrawer: Address,
}

impl QueuedWithdrawalParams {
    pub fn validate(&self) -> Result<(), WithdrawalError> {
        if self.vaults.is_empty() {
            return Err(WithdrawalError::EmptyWithdrawal);
        }
        if self.vaults.len() != self.shares.len() {
            return Err(WithdrawalError::LengthMismatch {
                vaults: self.vaults.len(),
                shares: self.shares.len(),
            });
        }
        if self.withdrawer.is_zero() {
            return Err(WithdrawalError::ZeroWithdrawer);
        }
        Ok(())
    }
}

/// Snapshot of a queued withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub depositor: Address,
    /// Operator at queue time, zero if the depositor was undelegated.
    pub delegated_to: Address,
    pub withdrawer: Address,
    pub nonce: u64,
    /// Logical clock reading at queue time.
    pub start: u64,
    pub vaults: Vec<VaultId>,
    pub shares: Vec<u64>,
}

impl WithdrawalRequest {
    /// Content digest identifying this request.
    pub fn root(&self) -> Digest {
        let mut enc = FieldEncoder::new()
            .address(&self.depositor)
            .address(&self.delegated_to)
            .address(&self.withdrawer)
            .u64(self.nonce)
            .u64(self.start)
            .u64(self.vaults.len() as u64);
        for (vault, shares) in self.vaults.iter().zip(&self.shares) {
            enc = enc.address(vault).u64(*shares);
        }
        tagged_hash(WITHDRAWAL_ROOT_TAG, &enc.into_bytes())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalQueue {
    pending: BTreeMap<Digest, WithdrawalRequest>,
    cumulative_queued: BTreeMap<Address, u64>,
    min_delay: u64,
    vault_delays: BTreeMap<VaultId, u64>,
}

impl WithdrawalQueue {
    pub fn new(min_delay: u64) -> Result<Self, WithdrawalError> {
        check_delay(min_delay)?;
        Ok(Self {
            min_delay,
            ..Self::default()
        })
    }

    // -- Delays -------------------------------------------------------------

    pub fn min_delay(&self) -> u64 {
        self.min_delay
    }

    pub fn vault_delay(&self, vault: &VaultId) -> u64 {
        self.vault_delays.get(vault).copied().unwrap_or(0)
    }

    /// Returns the previous value.
    pub fn set_min_delay(&mut self, delay: u64) -> Result<u64, WithdrawalError> {
        check_delay(delay)?;
        Ok(std::mem::replace(&mut self.min_delay, delay))
    }

    /// Returns the previous value.
    pub fn set_vault_delay(&mut self, vault: VaultId, delay: u64) -> Result<u64, WithdrawalError> {
        check_delay(delay)?;
        Ok(self.vault_delays.insert(vault, delay).unwrap_or(0))
    }

    /// The longest of the global delay and each listed vault's delay.
    pub fn effective_delay(&self, vaults: &[VaultId]) -> u64 {
        vaults
            .iter()
            .map(|v| self.vault_delay(v))
            .fold(self.min_delay, u64::max)
    }

    // -- Requests -----------------------------------------------------------

    /// Number of withdrawals `depositor` has ever queued.
    pub fn cumulative_queued(&self, depositor: &Address) -> u64 {
        self.cumulative_queued.get(depositor).copied().unwrap_or(0)
    }

    pub fn is_pending(&self, root: &Digest) -> bool {
        self.pending.contains_key(root)
    }

    pub fn pending_request(&self, root: &Digest) -> Option<&WithdrawalRequest> {
        self.pending.get(root)
    }

    pub fn pending(&self) -> impl Iterator<Item = (&Digest, &WithdrawalRequest)> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot a request, assign the depositor's next nonce and mark it
    /// pending. Positions must already be debited.
    pub fn enqueue(
        &mut self,
        depositor: Address,
        delegated_to: Address,
        params: QueuedWithdrawalParams,
        now: u64,
    ) -> (Digest, WithdrawalRequest) {
        let counter = self.cumulative_queued.entry(depositor).or_insert(0);
        let nonce = *counter;
        *counter += 1;

        let request = WithdrawalRequest {
            depositor,
            delegated_to,
            withdrawer: params.withdrawer,
            nonce,
            start: now,
            vaults: params.vaults,
            shares: params.shares,
        };
        let root = request.root();
        self.pending.insert(root, request.clone());
        (root, request)
    }

    /// Check that `caller` may complete `request` at `now` and clear it.
    pub fn take_for_completion(
        &mut self,
        request: &WithdrawalRequest,
        caller: &Address,
        now: u64,
    ) -> Result<Digest, WithdrawalError> {
        let root = request.root();
        if !self.is_pending(&root) {
            return Err(WithdrawalError::RequestNotFound(hex::encode(root)));
        }
        let ready_at = request
            .start
            .saturating_add(self.effective_delay(&request.vaults));
        if now < ready_at {
            return Err(WithdrawalError::DelayNotElapsed { ready_at, now });
        }
        if *caller != request.withdrawer {
            return Err(WithdrawalError::WrongWithdrawer);
        }
        self.pending.remove(&root);
        Ok(root)
    }
}

fn check_delay(delay: u64) -> Result<(), WithdrawalError> {
    if delay > MAX_WITHDRAWAL_DELAY {
        return Err(WithdrawalError::DelayTooLong(delay));
    }
    Ok(())
}
