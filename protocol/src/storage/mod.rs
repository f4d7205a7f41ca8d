//! # Storage Module
//!
//! Durable persistence for ledger state. Every committed ledger operation
//! writes a full state snapshot plus the events it produced in one atomic
//! sled batch, so a restart resumes from exactly the last committed
//! operation.
//!
//! Bincode is the on-disk encoding: compact, fast, deterministic.

pub mod db;

pub use db::{DbError, DbResult, KeelDB};
