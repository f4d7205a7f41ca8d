//! # Ledger Errors
//!
//! Each component has its own `thiserror` enum; [`LedgerError`] folds them
//! together for the entry points. Every variant maps onto one
//! [`ErrorKind`] so callers can branch on the class of failure without
//! matching every variant.
//!
//! Any error aborts the whole in-flight operation. Nothing is retried.

use thiserror::Error;

use keel_protocol::storage::DbError;

use crate::access_gate::GateError;
use crate::assets::TransferError;
use crate::authorization::AuthError;
use crate::config::ConfigError;
use crate::delegation::DelegationError;
use crate::position_ledger::PositionError;
use crate::share_vault::VaultError;
use crate::withdrawal_queue::WithdrawalError;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input: zero amount, mismatched lengths, zero identity.
    Validation,
    /// The caller or a presented consent is not allowed to do this.
    Authorization,
    /// The ledger is not in a state that permits the operation.
    State,
    /// A bounded collection is full.
    Capacity,
    /// The asset collaborator refused to settle.
    Settlement,
    /// Persistence failed.
    Storage,
}

/// Top-level error returned by every [`Ledger`](crate::ledger::Ledger) entry point.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Delegation(#[from] DelegationError),

    #[error(transparent)]
    Withdrawal(#[from] WithdrawalError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("asset settlement failed: {0}")]
    Settlement(#[from] TransferError),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("re-entrant call into a value-moving entry point")]
    Reentrant,

    #[error("caller is not authorized for this administrative action")]
    NotAdministrator,

    #[error("unknown vault: {0}")]
    UnknownVault(String),

    #[error("{0} must not be the zero identity")]
    ZeroIdentity(&'static str),

    #[error("input lengths do not match: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
}

impl LedgerError {
    /// The taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Vault(e) => e.kind(),
            LedgerError::Position(e) => e.kind(),
            LedgerError::Delegation(e) => e.kind(),
            LedgerError::Withdrawal(e) => e.kind(),
            LedgerError::Auth(_) => ErrorKind::Authorization,
            LedgerError::Gate(e) => e.kind(),
            LedgerError::Settlement(_) => ErrorKind::Settlement,
            LedgerError::Storage(_) => ErrorKind::Storage,
            LedgerError::Reentrant => ErrorKind::State,
            LedgerError::NotAdministrator => ErrorKind::Authorization,
            LedgerError::UnknownVault(_)
            | LedgerError::Config(_)
            | LedgerError::ZeroIdentity(_)
            | LedgerError::LengthMismatch { .. } => ErrorKind::Validation,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Returns `LengthMismatch` unless both lengths agree.
pub(crate) fn ensure_same_len(left: usize, right: usize) -> LedgerResult<()> {
    if left != right {
        return Err(LedgerError::LengthMismatch { left, right });
    }
    Ok(())
}
