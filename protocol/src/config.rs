//! # Protocol Configuration & Constants
//!
//! Every magic number in Keel lives here. The share arithmetic, the list
//! caps and the delay ceilings are consensus-relevant: two ledgers that
//! disagree on any of them will disagree on balances.

// ---------------------------------------------------------------------------
// Network Identifiers
// ---------------------------------------------------------------------------

/// Mainnet network identity. Bound into every consent digest.
pub const NETWORK_ID_MAINNET: u64 = 0x4B45_454C; // "KEEL"

/// Testnet network identity.
pub const NETWORK_ID_TESTNET: u64 = 0x4B45_4554; // "KEET"

/// Devnet network identity. Reset freely.
pub const NETWORK_ID_DEVNET: u64 = 0x4B45_4544; // "KEED"

/// The full version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Share Arithmetic
// ---------------------------------------------------------------------------

/// Virtual shares added to a vault's total supply in every conversion.
///
/// Together with [`BALANCE_OFFSET`] this keeps the exchange rate defined on
/// an empty vault and makes a first-depositor donation attack cost roughly
/// `OFFSET` times what it steals.
pub const SHARES_OFFSET: u64 = 1_000;

/// Virtual balance added to a vault's asset balance in every conversion.
pub const BALANCE_OFFSET: u64 = 1_000;

/// Hard ceiling on a single vault's outstanding shares.
pub const MAX_TOTAL_SHARES: u64 = 1_000_000_000_000_000_000;

// ---------------------------------------------------------------------------
// Position Limits
// ---------------------------------------------------------------------------

/// Maximum number of vaults a single depositor may hold shares in at once.
///
/// Bounds the work done by delegation and undelegation, which iterate the
/// depositor's full vault list.
pub const MAX_DEPOSITOR_VAULT_LIST_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Timing Constants (logical clock units)
// ---------------------------------------------------------------------------

/// Upper bound for both the global and every per-vault withdrawal delay.
/// 216_000 units is 30 days at one unit per 12 seconds.
pub const MAX_WITHDRAWAL_DELAY: u64 = 216_000;

/// Upper bound for an operator's depositor opt-out window.
/// 180 days at one unit per 12 seconds.
pub const MAX_OPT_OUT_WINDOW: u64 = 1_296_000;

// ---------------------------------------------------------------------------
// Structured Digest Domain
// ---------------------------------------------------------------------------

/// Default domain name bound into the digest domain separator.
pub const DEFAULT_DOMAIN_NAME: &str = "Keel";

/// Type string for the domain tuple.
pub const DOMAIN_TYPE: &str = "Domain(string name,uint256 networkId,address ledger)";

/// Type string for an operator-approver consent.
pub const DELEGATION_APPROVAL_TYPE: &str =
    "DelegationApproval(address approver,address depositor,address operator,bytes32 salt,uint256 expiry)";

/// Type string for a depositor's self-signed delegation consent.
pub const DEPOSITOR_DELEGATION_TYPE: &str =
    "DepositorDelegation(address depositor,address operator,uint256 nonce,uint256 expiry)";

/// Type string for a depositor's signed deposit consent.
pub const DEPOSIT_TYPE: &str =
    "Deposit(address depositor,address vault,address asset,uint256 amount,uint256 nonce,uint256 expiry)";

/// Value a program signer's validation routine returns to accept a signature.
pub const SIGNATURE_ACCEPTANCE_SENTINEL: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Returns a friendly name for a network ID, mainly for logging.
pub fn network_name(network_id: u64) -> String {
    match network_id {
        NETWORK_ID_MAINNET => "mainnet".to_string(),
        NETWORK_ID_TESTNET => "testnet".to_string(),
        NETWORK_ID_DEVNET => "devnet".to_string(),
        other => format!("unknown(0x{:08X})", other),
    }
}

/// Parses a network name back into its identifier.
pub fn network_id_from_name(name: &str) -> Option<u64> {
    match name.to_lowercase().as_str() {
        "mainnet" => Some(NETWORK_ID_MAINNET),
        "testnet" => Some(NETWORK_ID_TESTNET),
        "devnet" => Some(NETWORK_ID_DEVNET),
        _ => None,
    }
}
