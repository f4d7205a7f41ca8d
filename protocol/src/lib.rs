// Copyright (c) 2026 Keel Contributors. MIT License.
// See LICENSE for details.

//! # Keel Protocol: Core Primitives
//!
//! The building blocks the Keel restaking ledger stands on:
//!
//! - **address**: 32-byte identities for every ledger actor.
//! - **crypto**: Ed25519 consent signatures, BLAKE3/SHA-256 digests and
//!   the fixed-width field encoding for structured digests.
//! - **storage**: sled-backed snapshot + event-log persistence.
//! - **config**: protocol constants: share offsets, list caps, delay caps,
//!   network identities, digest type strings.
//!
//! The ledger state machines themselves live in `keel-contracts`.

pub mod address;
pub mod config;
pub mod crypto;
pub mod storage;

pub use address::Address;
