//! # Access Gate
//!
//! A circuit breaker over five operation classes. Each value-moving entry
//! point names the class it belongs to and refuses to run while that class
//! is paused.
//!
//! Pausing is one-way per role: a pauser may only add classes to the paused
//! set, the unpauser may only remove them. The set is encoded as a bitmask
//! where bit *i* is class *i*; the mask is an encoding only, all checks run
//! on [`PauseSet`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::types::Address;

/// The classes of operation that can be paused independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationClass {
    Deposits = 0,
    VaultWithdrawals = 1,
    NewDelegation = 2,
    EnterWithdrawalQueue = 3,
    ExitWithdrawalQueue = 4,
}

impl OperationClass {
    pub const ALL: [OperationClass; 5] = [
        OperationClass::Deposits,
        OperationClass::VaultWithdrawals,
        OperationClass::NewDelegation,
        OperationClass::EnterWithdrawalQueue,
        OperationClass::ExitWithdrawalQueue,
    ];

    /// This class's bit in the encoded mask.
    pub const fn bit(self) -> u64 {
        1 << (self as u64)
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationClass::Deposits => "deposits",
            OperationClass::VaultWithdrawals => "vault-withdrawals",
            OperationClass::NewDelegation => "new-delegation",
            OperationClass::EnterWithdrawalQueue => "enter-withdrawal-queue",
            OperationClass::ExitWithdrawalQueue => "exit-withdrawal-queue",
        };
        f.write_str(name)
    }
}

/// Mask with every known class bit set.
pub const ALL_CLASSES_MASK: u64 = (1 << OperationClass::ALL.len()) - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("operation class {0} is paused")]
    Paused(OperationClass),

    #[error("caller is not a pauser")]
    NotPauser,

    #[error("caller is not the unpauser")]
    NotUnpauser,

    #[error("pause mask {requested:#x} is not monotonic with current mask {current:#x}")]
    NotMonotonic { current: u64, requested: u64 },

    #[error("pause mask {0:#x} names unknown operation classes")]
    UnknownBits(u64),
}

impl GateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GateError::Paused(_) => ErrorKind::State,
            GateError::NotPauser | GateError::NotUnpauser => ErrorKind::Authorization,
            GateError::NotMonotonic { .. } | GateError::UnknownBits(_) => ErrorKind::Validation,
        }
    }
}

/// A set of paused operation classes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseSet(BTreeSet<OperationClass>);

impl PauseSet {
    pub fn all() -> Self {
        Self(OperationClass::ALL.into_iter().collect())
    }

    /// Decode a mask. Bits beyond the known classes are rejected.
    pub fn from_mask(mask: u64) -> Result<Self, GateError> {
        if mask & !ALL_CLASSES_MASK != 0 {
            return Err(GateError::UnknownBits(mask));
        }
        Ok(Self(
            OperationClass::ALL
                .into_iter()
                .filter(|c| mask & c.bit() != 0)
                .collect(),
        ))
    }

    pub fn to_mask(&self) -> u64 {
        self.0.iter().fold(0, |acc, c| acc | c.bit())
    }

    pub fn contains(&self, class: OperationClass) -> bool {
        self.0.contains(&class)
    }

    pub fn is_subset(&self, other: &PauseSet) -> bool {
        self.0.is_subset(&other.0)
    }
}

/// Who may pause and who may unpause.
pub trait PauserRegistry {
    fn is_pauser(&self, who: &Address) -> bool;
    fn is_unpauser(&self, who: &Address) -> bool;
}

/// A fixed roster loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPauserRegistry {
    pub pausers: BTreeSet<Address>,
    pub unpauser: Address,
}

impl StaticPauserRegistry {
    pub fn new(pausers: impl IntoIterator<Item = Address>, unpauser: Address) -> Self {
        Self {
            pausers: pausers.into_iter().collect(),
            unpauser,
        }
    }
}

impl PauserRegistry for StaticPauserRegistry {
    fn is_pauser(&self, who: &Address) -> bool {
        self.pausers.contains(who)
    }

    fn is_unpauser(&self, who: &Address) -> bool {
        !self.unpauser.is_zero() && self.unpauser == *who
    }
}

/// The current pause state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGate {
    paused: PauseSet,
}

impl AccessGate {
    pub fn new(initial: PauseSet) -> Self {
        Self { paused: initial }
    }

    pub fn mask(&self) -> u64 {
        self.paused.to_mask()
    }

    pub fn is_paused(&self, class: OperationClass) -> bool {
        self.paused.contains(class)
    }

    /// Fails with `Paused(class)` while `class` is paused.
    pub fn ensure_open(&self, class: OperationClass) -> Result<(), GateError> {
        if self.is_paused(class) {
            return Err(GateError::Paused(class));
        }
        Ok(())
    }

    /// Replace the paused set with `mask`, which must be a superset of it.
    pub fn pause(
        &mut self,
        registry: &dyn PauserRegistry,
        caller: &Address,
        mask: u64,
    ) -> Result<(), GateError> {
        if !registry.is_pauser(caller) {
            return Err(GateError::NotPauser);
        }
        let requested = PauseSet::from_mask(mask)?;
        if !self.paused.is_subset(&requested) {
            return Err(GateError::NotMonotonic {
                current: self.mask(),
                requested: mask,
            });
        }
        self.paused = requested;
        Ok(())
    }

    pub fn pause_all(
        &mut self,
        registry: &dyn PauserRegistry,
        caller: &Address,
    ) -> Result<(), GateError> {
        self.pause(registry, caller, ALL_CLASSES_MASK)
    }

    /// Replace the paused set with `mask`, which must be a subset of it.
    pub fn unpause(
        &mut self,
        registry: &dyn PauserRegistry,
        caller: &Address,
        mask: u64,
    ) -> Result<(), GateError> {
        if !registry.is_unpauser(caller) {
            return Err(GateError::NotUnpauser);
        }
        let requested = PauseSet::from_mask(mask)?;
        if !requested.is_subset(&self.paused) {
            return Err(GateError::NotMonotonic {
                current: self.mask(),
                requested: mask,
            });
        }
        self.paused = requested;
        Ok(())
    }

    pub fn unpause_all(
        &mut self,
        registry: &dyn PauserRegistry,
        caller: &Address,
    ) -> Result<(), GateError> {
        self.unpause(registry, caller, 0)
    }
}
