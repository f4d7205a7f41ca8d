//! # Position Ledger
//!
//! Who holds how many shares of which vault.
//!
//! A depositor's vaults are kept in an explicit list alongside the share
//! map. Delegation and undelegation walk that list, so it is capped at
//! [`MAX_DEPOSITOR_VAULT_LIST_LENGTH`] entries. A vault is in the list
//! exactly when the depositor's position in it is nonzero.
//!
//! The vault allow-list and the per-vault "third-party withdrawal
//! forbidden" flag live here too; both are administered from outside.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use keel_protocol::config::MAX_DEPOSITOR_VAULT_LIST_LENGTH;

use crate::error::ErrorKind;
use crate::types::{Address, VaultId};

/// Errors raised by position bookkeeping.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("share amount must be greater than zero")]
    AmountZero,

    #[error("vault {0} is not on the allow-list")]
    VaultNotWhitelisted(String),

    #[error("depositor already holds {max} vaults")]
    ListFull { max: usize },

    #[error("insufficient shares: has {available}, requested {requested}")]
    InsufficientShares { available: u64, requested: u64 },

    #[error("share balance overflow")]
    Overflow,
}

impl PositionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PositionError::AmountZero
            | PositionError::VaultNotWhitelisted(_)
            | PositionError::Overflow => ErrorKind::Validation,
            PositionError::ListFull { .. } => ErrorKind::Capacity,
            PositionError::InsufficientShares { .. } => ErrorKind::State,
        }
    }
}

/// Per-depositor share positions plus the vault allow-list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLedger {
    shares: BTreeMap<(Address, VaultId), u64>,
    vault_lists: BTreeMap<Address, Vec<VaultId>>,
    allowlist: BTreeSet<VaultId>,
    third_party_forbidden: BTreeSet<VaultId>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Allow-list ---------------------------------------------------------

    /// Add `vault` to the allow-list. Returns `false` if it was already there.
    pub fn allow_vault(&mut self, vault: VaultId, third_party_forbidden: bool) -> bool {
        let added = self.allowlist.insert(vault);
        if added {
            self.set_third_party_forbidden(vault, third_party_forbidden);
        }
        added
    }

    /// Remove `vault` from the allow-list. Existing positions are untouched
    /// and may still be withdrawn; only new deposits are refused.
    pub fn disallow_vault(&mut self, vault: &VaultId) -> bool {
        self.allowlist.remove(vault)
    }

    pub fn is_allowlisted(&self, vault: &VaultId) -> bool {
        self.allowlist.contains(vault)
    }

    pub fn ensure_allowlisted(&self, vault: &VaultId) -> Result<(), PositionError> {
        if !self.is_allowlisted(vault) {
            return Err(PositionError::VaultNotWhitelisted(vault.to_hex()));
        }
        Ok(())
    }

    pub fn set_third_party_forbidden(&mut self, vault: VaultId, forbidden: bool) {
        if forbidden {
            self.third_party_forbidden.insert(vault);
        } else {
            self.third_party_forbidden.remove(&vault);
        }
    }

    pub fn third_party_forbidden(&self, vault: &VaultId) -> bool {
        self.third_party_forbidden.contains(vault)
    }

    pub fn allowlisted_vaults(&self) -> impl Iterator<Item = &VaultId> {
        self.allowlist.iter()
    }

    // -- Positions ----------------------------------------------------------

    /// Credit `shares` to `depositor` in `vault`.
    ///
    /// Delegated-operator bookkeeping is the caller's job; see
    /// `Ledger::credit_position`.
    pub fn add_shares(
        &mut self,
        depositor: Address,
        vault: VaultId,
        shares: u64,
    ) -> Result<(), PositionError> {
        if shares == 0 {
            return Err(PositionError::AmountZero);
        }
        let current = self.shares_of(&depositor, &vault);
        let updated = current.checked_add(shares).ok_or(PositionError::Overflow)?;

        if current == 0 {
            let list = self.vault_lists.entry(depositor).or_default();
            if list.len() >= MAX_DEPOSITOR_VAULT_LIST_LENGTH {
                return Err(PositionError::ListFull {
                    max: MAX_DEPOSITOR_VAULT_LIST_LENGTH,
                });
            }
            list.push(vault);
        }
        self.shares.insert((depositor, vault), updated);
        Ok(())
    }

    /// Debit `shares` from `depositor` in `vault`.
    ///
    /// Returns `true` when the position reached zero and the vault was
    /// swap-removed from the depositor's list.
    pub fn remove_shares(
        &mut self,
        depositor: &Address,
        vault: &VaultId,
        shares: u64,
    ) -> Result<bool, PositionError> {
        if shares == 0 {
            return Err(PositionError::AmountZero);
        }
        let current = self.shares_of(depositor, vault);
        if shares > current {
            return Err(PositionError::InsufficientShares {
                available: current,
                requested: shares,
            });
        }

        let remaining = current - shares;
        if remaining > 0 {
            self.shares.insert((*depositor, *vault), remaining);
            return Ok(false);
        }

        self.shares.remove(&(*depositor, *vault));
        if let Some(list) = self.vault_lists.get_mut(depositor) {
            if let Some(idx) = list.iter().position(|v| v == vault) {
                list.swap_remove(idx);
            }
            if list.is_empty() {
                self.vault_lists.remove(depositor);
            }
        }
        Ok(true)
    }

    pub fn shares_of(&self, depositor: &Address, vault: &VaultId) -> u64 {
        self.shares.get(&(*depositor, *vault)).copied().unwrap_or(0)
    }

    /// The depositor's active vaults, in list order.
    pub fn vault_list(&self, depositor: &Address) -> &[VaultId] {
        self.vault_lists
            .get(depositor)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `(vault, shares)` for every nonzero position the depositor holds.
    pub fn deposits(&self, depositor: &Address) -> Vec<(VaultId, u64)> {
        self.vault_list(depositor)
            .iter()
            .map(|v| (*v, self.shares_of(depositor, v)))
            .collect()
    }

    /// Every nonzero position in the ledger.
    pub fn iter_positions(&self) -> impl Iterator<Item = (&Address, &VaultId, u64)> {
        self.shares.iter().map(|((d, v), s)| (d, v, *s))
    }
}
