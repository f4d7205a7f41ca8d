//! # Asset Transfer Collaborator
//!
//! The ledger never holds raw balances. Moving the underlying fungible asset
//! is delegated to an [`AssetTransfer`] implementation supplied by the host.
//!
//! Each ledger operation collects the transfers it needs into a journal and
//! hands the whole journal to [`AssetTransfer::settle`] once, after every
//! state check has passed. Implementations must settle all-or-nothing: if
//! any transfer in the batch cannot be made, none of them are.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::{Address, AssetId};

/// Why the collaborator refused a batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("insufficient {asset} balance for {holder}: has {available}, needs {required}")]
    InsufficientBalance {
        asset: String,
        holder: String,
        available: u64,
        required: u64,
    },

    #[error("balance overflow")]
    Overflow,

    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// A single movement of `amount` of `asset` from `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub asset: AssetId,
    pub from: Address,
    pub to: Address,
    pub amount: u64,
}

impl Transfer {
    /// The transfer that undoes this one.
    pub fn reversed(&self) -> Transfer {
        Transfer {
            asset: self.asset,
            from: self.to,
            to: self.from,
            amount: self.amount,
        }
    }
}

/// Host-provided push/pull transfer service and balance oracle.
pub trait AssetTransfer {
    /// Current balance of `holder` in `asset`.
    fn balance_of(&self, asset: &AssetId, holder: &Address) -> u64;

    /// Apply every transfer in order, or none of them.
    fn settle(&mut self, transfers: &[Transfer]) -> Result<(), TransferError>;
}

/// Simple map-backed asset book.
///
/// Used by tests and by the node for devnet ledgers that have no external
/// asset system to talk to.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAssets {
    balances: BTreeMap<(AssetId, Address), u64>,
}

impl InMemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` out of thin air. Devnet faucet and test setup only.
    pub fn mint(&mut self, asset: AssetId, holder: Address, amount: u64) {
        *self.balances.entry((asset, holder)).or_insert(0) += amount;
    }
}

impl AssetTransfer for InMemoryAssets {
    fn balance_of(&self, asset: &AssetId, holder: &Address) -> u64 {
        self.balances.get(&(*asset, *holder)).copied().unwrap_or(0)
    }

    fn settle(&mut self, transfers: &[Transfer]) -> Result<(), TransferError> {
        // Apply to a scratch copy so a failure halfway leaves nothing behind.
        let mut scratch = self.balances.clone();
        for t in transfers {
            let from = scratch.entry((t.asset, t.from)).or_insert(0);
            if *from < t.amount {
                return Err(TransferError::InsufficientBalance {
                    asset: t.asset.to_hex(),
                    holder: t.from.to_hex(),
                    available: *from,
                    required: t.amount,
                });
            }
            *from -= t.amount;
            let to = scratch.entry((t.asset, t.to)).or_insert(0);
            *to = to.checked_add(t.amount).ok_or(TransferError::Overflow)?;
        }
        self.balances = scratch;
        Ok(())
    }
}
