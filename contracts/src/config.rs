//! Ledger configuration.
//!
//! Everything a ledger needs at construction that is not state: the digest
//! domain, the administrative roster and the initial delay and pause
//! settings. Stored as JSON by the node and mirrored into the database on
//! first open.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

use keel_protocol::config::{DEFAULT_DOMAIN_NAME, MAX_WITHDRAWAL_DELAY, NETWORK_ID_DEVNET};

use crate::access_gate::{PauseSet, StaticPauserRegistry};
use crate::types::Address;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Name bound into the digest domain.
    pub domain_name: String,
    /// Network the ledger is deployed on.
    pub network_id: u64,
    /// The ledger's own identity, bound into the digest domain.
    pub ledger_identity: Address,
    /// May change withdrawal delays.
    pub owner: Address,
    /// May manage the vault allow-list, third-party flags and deposit caps.
    pub allowlist_admin: Address,
    #[serde(default)]
    pub pausers: BTreeSet<Address>,
    pub unpauser: Address,
    #[serde(default)]
    pub min_withdrawal_delay: u64,
    #[serde(default)]
    pub initial_pause_mask: u64,
}

impl LedgerConfig {
    /// A single-administrator config. `admin` holds every role.
    pub fn devnet(admin: Address) -> Self {
        Self {
            domain_name: DEFAULT_DOMAIN_NAME.to_string(),
            network_id: NETWORK_ID_DEVNET,
            ledger_identity: Address::from_label("keel:ledger:devnet"),
            owner: admin,
            allowlist_admin: admin,
            pausers: [admin].into_iter().collect(),
            unpauser: admin,
            min_withdrawal_delay: 0,
            initial_pause_mask: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger_identity.is_zero() {
            return Err(ConfigError::Invalid("ledger_identity is zero".into()));
        }
        if self.owner.is_zero() || self.allowlist_admin.is_zero() {
            return Err(ConfigError::Invalid(
                "owner and allowlist_admin must be set".into(),
            ));
        }
        if self.min_withdrawal_delay > MAX_WITHDRAWAL_DELAY {
            return Err(ConfigError::Invalid(format!(
                "min_withdrawal_delay {} exceeds {}",
                self.min_withdrawal_delay, MAX_WITHDRAWAL_DELAY
            )));
        }
        PauseSet::from_mask(self.initial_pause_mask)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn pauser_registry(&self) -> StaticPauserRegistry {
        StaticPauserRegistry::new(self.pausers.iter().copied(), self.unpauser)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devnet_config_is_valid() {
        let cfg = LedgerConfig::devnet(Address::from_label("admin"));
        cfg.validate().unwrap();
        let reg = cfg.pauser_registry();
        assert!(reg.pausers.contains(&Address::from_label("admin")));
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let cfg = LedgerConfig::devnet(Address::from_label("admin"));
        cfg.save(&path).unwrap();
        assert_eq!(LedgerConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = LedgerConfig::devnet(Address::from_label("admin"));
        cfg.min_withdrawal_delay = MAX_WITHDRAWAL_DELAY + 1;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = LedgerConfig::devnet(Address::from_label("admin"));
        cfg.initial_pause_mask = 1 << 40;
        assert!(cfg.validate().is_err());
    }
}
