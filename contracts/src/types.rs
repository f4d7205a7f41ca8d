//! Shared value types passed into every entry point.

use serde::{Deserialize, Serialize};

pub use keel_protocol::crypto::Digest;
pub use keel_protocol::Address;

/// Identity of a vault. Vaults hold their assets under this address.
pub type VaultId = Address;

/// Identity of a fungible asset.
pub type AssetId = Address;

/// The explicit execution context for one ledger operation.
///
/// Supplied by the host for every call: who is calling, the logical clock
/// reading, and the network the host believes it is running on. There is no
/// ambient caller or clock anywhere else in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub caller: Address,
    pub now: u64,
    pub network_id: u64,
}

impl ExecutionContext {
    pub fn new(caller: Address, now: u64, network_id: u64) -> Self {
        Self {
            caller,
            now,
            network_id,
        }
    }

    /// Same clock and network, different caller.
    pub fn with_caller(self, caller: Address) -> Self {
        Self { caller, ..self }
    }

    /// Same caller and network, clock moved to `now`.
    pub fn at(self, now: u64) -> Self {
        Self { now, ..self }
    }
}
