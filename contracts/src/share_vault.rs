//! # Share Vault
//!
//! Converts asset amounts into an internal share unit and back. A vault's
//! exchange rate is simply `balance / totalShares`, with both sides padded
//! by a virtual offset:
//!
//! ```text
//! deposit:   newShares = amount · (totalShares + SHARES_OFFSET)
//!                        / (postTransferBalance + BALANCE_OFFSET − amount)
//! withdraw:  amount    = (balance + BALANCE_OFFSET) · shares
//!                        / (totalShares + SHARES_OFFSET)
//! ```
//!
//! The offsets keep the rate defined on an empty vault and make donating to
//! an empty vault to skew the first depositor's rate unprofitable.
//! Division always floors, so a round trip never creates value.
//!
//! The vault never tracks its own asset balance. The ledger queries the
//! asset collaborator and passes the reading in.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use keel_protocol::config::{BALANCE_OFFSET, MAX_TOTAL_SHARES, SHARES_OFFSET};

use crate::error::ErrorKind;
use crate::types::{AssetId, VaultId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by share arithmetic and vault bookkeeping.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("amount must be greater than zero")]
    AmountZero,

    #[error("deposit of {amount} would mint zero shares")]
    ZeroSharesMinted { amount: u64 },

    #[error("cannot withdraw {requested} shares: vault has {total} outstanding")]
    SharesExceedTotal { requested: u64, total: u64 },

    #[error("deposit of {amount} exceeds the per-deposit cap of {cap}")]
    MaxPerDepositExceeded { amount: u64, cap: u64 },

    #[error("vault balance {balance} would exceed the total deposit cap of {cap}")]
    MaxTotalDepositsExceeded { balance: u64, cap: u64 },

    #[error("total shares would exceed the vault ceiling")]
    TotalSharesExceeded,

    #[error("per-deposit cap {per_deposit} exceeds total cap {total}")]
    InvalidCaps { per_deposit: u64, total: u64 },

    #[error("arithmetic overflow")]
    MathOverflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("vault {0} cannot fund or hold its own shares")]
    SelfDeposit(String),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::SharesExceedTotal { .. } => ErrorKind::State,
            VaultError::MaxPerDepositExceeded { .. }
            | VaultError::MaxTotalDepositsExceeded { .. }
            | VaultError::TotalSharesExceeded => ErrorKind::Capacity,
            _ => ErrorKind::Validation,
        }
    }
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

/// `value · numerator / denominator`, floored, with a u128 intermediate.
pub fn mul_div(value: u64, numerator: u64, denominator: u64) -> Result<u64, VaultError> {
    if denominator == 0 {
        return Err(VaultError::DivisionByZero);
    }
    let product = (value as u128)
        .checked_mul(numerator as u128)
        .ok_or(VaultError::MathOverflow)?;
    let result = product / denominator as u128;
    u64::try_from(result).map_err(|_| VaultError::MathOverflow)
}

fn virtual_shares(total_shares: u64) -> Result<u64, VaultError> {
    total_shares
        .checked_add(SHARES_OFFSET)
        .ok_or(VaultError::MathOverflow)
}

fn virtual_balance(balance: u64) -> Result<u64, VaultError> {
    balance
        .checked_add(BALANCE_OFFSET)
        .ok_or(VaultError::MathOverflow)
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// One pluggable vault: an asset, its outstanding shares and deposit caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareVault {
    /// The vault's identity; its assets are held under this address.
    pub id: VaultId,
    /// The single asset this vault accepts.
    pub asset: AssetId,
    /// Shares outstanding across all depositors and pending withdrawals.
    pub total_shares: u64,
    /// Largest single deposit accepted.
    pub max_per_deposit: u64,
    /// Largest post-deposit asset balance accepted.
    pub max_total_deposits: u64,
}

impl ShareVault {
    /// A new, empty vault with no deposit caps.
    pub fn new(id: VaultId, asset: AssetId) -> Self {
        Self {
            id,
            asset,
            total_shares: 0,
            max_per_deposit: u64::MAX,
            max_total_deposits: u64::MAX,
        }
    }

    /// Set the deposit caps.
    pub fn set_deposit_caps(&mut self, per_deposit: u64, total: u64) -> Result<(), VaultError> {
        if per_deposit > total {
            return Err(VaultError::InvalidCaps {
                per_deposit,
                total,
            });
        }
        self.max_per_deposit = per_deposit;
        self.max_total_deposits = total;
        Ok(())
    }

    /// Mint shares for `amount` that has just been transferred in.
    ///
    /// `post_transfer_balance` is the vault's asset balance including
    /// `amount`.
    pub fn deposit(&mut self, amount: u64, post_transfer_balance: u64) -> Result<u64, VaultError> {
        if amount == 0 {
            return Err(VaultError::AmountZero);
        }
        if amount > self.max_per_deposit {
            return Err(VaultError::MaxPerDepositExceeded {
                amount,
                cap: self.max_per_deposit,
            });
        }
        if post_transfer_balance > self.max_total_deposits {
            return Err(VaultError::MaxTotalDepositsExceeded {
                balance: post_transfer_balance,
                cap: self.max_total_deposits,
            });
        }

        let prior_virtual_balance = virtual_balance(post_transfer_balance)?
            .checked_sub(amount)
            .ok_or(VaultError::MathOverflow)?;
        let new_shares = mul_div(
            amount,
            virtual_shares(self.total_shares)?,
            prior_virtual_balance,
        )?;
        if new_shares == 0 {
            return Err(VaultError::ZeroSharesMinted { amount });
        }

        let total = self
            .total_shares
            .checked_add(new_shares)
            .ok_or(VaultError::MathOverflow)?;
        if total > MAX_TOTAL_SHARES {
            return Err(VaultError::TotalSharesExceeded);
        }
        self.total_shares = total;

        tracing::debug!(vault = %self.id, amount, new_shares, total_shares = total, "shares minted");
        Ok(new_shares)
    }

    /// Burn `shares` and return the asset amount they redeem for.
    ///
    /// `balance` is the vault's asset balance before the payout leaves.
    pub fn withdraw(&mut self, shares: u64, balance: u64) -> Result<u64, VaultError> {
        if shares > self.total_shares {
            return Err(VaultError::SharesExceedTotal {
                requested: shares,
                total: self.total_shares,
            });
        }
        let amount = mul_div(
            virtual_balance(balance)?,
            shares,
            virtual_shares(self.total_shares)?,
        )?;
        self.total_shares -= shares;

        tracing::debug!(vault = %self.id, shares, amount, total_shares = self.total_shares, "shares burned");
        Ok(amount)
    }

    /// How many shares `amount` would buy at the current rate.
    pub fn underlying_to_shares_view(&self, amount: u64, balance: u64) -> Result<u64, VaultError> {
        mul_div(
            amount,
            virtual_shares(self.total_shares)?,
            virtual_balance(balance)?,
        )
    }

    /// How much asset `shares` would redeem for at the current rate.
    pub fn shares_to_underlying_view(&self, shares: u64, balance: u64) -> Result<u64, VaultError> {
        mul_div(
            virtual_balance(balance)?,
            shares,
            virtual_shares(self.total_shares)?,
        )
    }
}
