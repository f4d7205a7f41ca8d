//! # Keel Ledger
//!
//! The restaking state machine: depositors put fungible assets into vaults
//! in exchange for shares, delegate those shares to operators, and take
//! them back out through a time-delayed withdrawal queue.
//!
//! - **Share Vault**: offset-protected exchange rate between an asset and
//!   its shares.
//! - **Position Ledger**: shares per depositor per vault, plus the vault
//!   allow-list.
//! - **Delegation Graph**: depositor → operator edges and per-operator
//!   share totals.
//! - **Withdrawal Queue**: queued requests, unbonding delays, completion.
//! - **Authorization**: structured-digest consents, signer kinds, nonces
//!   and salts.
//! - **Access Gate**: per-operation-class pause switch.
//!
//! [`Ledger`] is the only entry point that mutates anything.
//!
//! ## Design Principles
//!
//! 1. Every operation is atomic. It runs on a working copy and commits
//!    only after the asset collaborator has settled every transfer.
//! 2. No ambient state: caller, clock and network arrive in an
//!    [`ExecutionContext`] on every call.
//! 3. Amounts are `u64`; products go through `u128` and checked arithmetic.
//! 4. All state is serde-serializable and persisted through `KeelDB`.

pub mod access_gate;
pub mod assets;
pub mod authorization;
pub mod config;
pub mod delegation;
pub mod error;
pub mod events;
pub mod guard;
pub mod ledger;
pub mod position_ledger;
pub mod share_vault;
pub mod types;
pub mod withdrawal_queue;

pub use access_gate::{OperationClass, PauseSet, PauserRegistry, StaticPauserRegistry};
pub use assets::{AssetTransfer, InMemoryAssets, Transfer};
pub use authorization::{ProgramRegistry, SignatureValidator, SignedConsent};
pub use config::LedgerConfig;
pub use delegation::{OperatorDetails, OperatorProfile};
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use events::LedgerEvent;
pub use ledger::{Ledger, LedgerState, LedgerStats, VaultListing};
pub use types::{Address, AssetId, Digest, ExecutionContext, VaultId};
pub use withdrawal_queue::{CompletionMode, QueuedWithdrawalParams, WithdrawalRequest};
