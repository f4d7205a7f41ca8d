//! Shared fixture for the ledger integration tests.

#![allow(dead_code)]

use keel_contracts::{
    Address, ExecutionContext, InMemoryAssets, Ledger, LedgerConfig, OperatorDetails,
    ProgramRegistry, VaultListing,
};
use keel_protocol::config::NETWORK_ID_DEVNET;

pub const START_BALANCE: u64 = 10_000_000;
pub const GLOBAL_DELAY: u64 = 50;

pub fn addr(label: &str) -> Address {
    Address::from_label(label)
}

pub fn admin() -> Address {
    addr("admin")
}

pub fn usd() -> Address {
    addr("asset:usd")
}

pub fn eth() -> Address {
    addr("asset:eth")
}

pub fn usd_vault() -> Address {
    addr("vault:usd")
}

pub fn eth_vault() -> Address {
    addr("vault:eth")
}

pub struct Fixture {
    pub ledger: Ledger,
    pub ctx: ExecutionContext,
}

impl Fixture {
    /// Two allow-listed vaults, funded depositors and a global delay.
    pub fn new(holders: &[Address]) -> Self {
        let mut config = LedgerConfig::devnet(admin());
        config.min_withdrawal_delay = GLOBAL_DELAY;
        Self::with_config(config, holders)
    }

    pub fn with_config(config: LedgerConfig, holders: &[Address]) -> Self {
        let mut assets = InMemoryAssets::new();
        for h in holders {
            assets.mint(usd(), *h, START_BALANCE);
            assets.mint(eth(), *h, START_BALANCE);
        }
        let mut ledger = Ledger::new(config, assets).expect("ledger");
        let ctx = ExecutionContext::new(admin(), 1_000, NETWORK_ID_DEVNET);
        ledger
            .add_vaults_to_allowlist(
                &ctx,
                &[
                    VaultListing {
                        vault: usd_vault(),
                        asset: usd(),
                        third_party_forbidden: false,
                    },
                    VaultListing {
                        vault: eth_vault(),
                        asset: eth(),
                        third_party_forbidden: false,
                    },
                ],
            )
            .expect("allow-list");
        Self { ledger, ctx }
    }

    pub fn with_programs(mut self, programs: ProgramRegistry) -> Self {
        self.ledger = self.ledger.with_program_registry(programs);
        self
    }

    pub fn as_(&self, who: Address) -> ExecutionContext {
        self.ctx.with_caller(who)
    }

    pub fn register(&mut self, operator: Address) {
        let ctx = self.as_(operator);
        self.ledger
            .register_operator(&ctx, OperatorDetails::new(operator), "https://op.example/meta")
            .expect("register operator");
    }

    pub fn deposit(&mut self, who: Address, vault: Address, amount: u64) -> u64 {
        let ctx = self.as_(who);
        self.ledger
            .deposit_into_vault(&ctx, vault, amount)
            .expect("deposit")
    }

    pub fn assert_sound(&self) {
        let violations = self.ledger.state().invariant_violations();
        assert!(violations.is_empty(), "invariants broken: {violations:#?}");
    }
}
