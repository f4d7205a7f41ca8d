//! # CLI Interface
//!
//! Defines the command-line argument structure for `keel-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Keel ledger node.
///
/// Hosts a persistent restaking ledger, serves a read-only query API over
/// its state and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "keel-node",
    about = "Keel restaking ledger node",
    version,
    propagate_version = true
)]
pub struct KeelNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the Keel node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open the ledger and serve the query API.
    Run(RunArgs),
    /// Create the data directory and write a ledger config.
    Init(InitArgs),
    /// Query the status of a running node via its API endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Log output format flag.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the ledger configuration file (JSON).
    ///
    /// When omitted, the node looks for `ledger.json` in the data directory.
    #[arg(long, short = 'c', env = "KEEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the ledger database and config.
    #[arg(long, short = 'd', env = "KEEL_DATA_DIR", default_value = ".keel")]
    pub data_dir: PathBuf,

    /// Port for the HTTP query API.
    #[arg(long, env = "KEEL_API_PORT", default_value_t = 9841)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "KEEL_METRICS_PORT", default_value_t = 9842)]
    pub metrics_port: u16,

    /// Address to bind both listeners on.
    #[arg(long, env = "KEEL_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Log output format.
    #[arg(long, env = "KEEL_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Seconds between metric gauge refreshes.
    #[arg(long, default_value_t = 5)]
    pub metrics_interval_secs: u64,
}

impl RunArgs {
    /// The config path, defaulting into the data directory.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.data_dir.join(crate::CONFIG_FILE_NAME))
    }
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "KEEL_DATA_DIR", default_value = ".keel")]
    pub data_dir: PathBuf,

    /// Network to configure for: mainnet, testnet, or devnet.
    #[arg(long, default_value = "devnet")]
    pub network: String,

    /// Hex address holding every administrative role.
    ///
    /// When omitted, a fresh keypair is generated and its address is used.
    #[arg(long, env = "KEEL_ADMIN")]
    pub admin: Option<String>,

    /// Initial minimum withdrawal delay, in logical clock ticks.
    #[arg(long, default_value_t = 0)]
    pub min_withdrawal_delay: u64,

    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API endpoint of the running node.
    #[arg(long, env = "KEEL_API_URL", default_value = "http://127.0.0.1:9841")]
    pub api_url: String,
}
