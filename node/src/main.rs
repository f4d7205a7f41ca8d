// Copyright (c) 2026 Keel Contributors. MIT License.
// See LICENSE for details.

//! # Keel Ledger Node
//!
//! Entry point for the `keel-node` binary. Parses CLI arguments, initializes
//! logging and metrics, opens the persistent ledger and serves the query API.
//!
//! The binary supports four subcommands:
//!
//! - `run`     : open the ledger and serve the API and metrics
//! - `init`    : create the data directory and write a ledger config
//! - `status`  : query a running node's status endpoint
//! - `version` : print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use keel_contracts::{Address, InMemoryAssets, Ledger, LedgerConfig};
use keel_protocol::config::{network_id_from_name, network_name, PROTOCOL_VERSION};
use keel_protocol::crypto::KeelKeypair;
use keel_protocol::storage::KeelDB;

use cli::{Commands, KeelNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Config file written by `init` and read by `run` by default.
pub const CONFIG_FILE_NAME: &str = "ledger.json";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = KeelNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens the ledger and serves the API and metrics until shutdown.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, LogFormat::from(args.log_format))?;

    let config_path = args.config_path();
    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        config = %config_path.display(),
        "starting keel-node"
    );

    let config = LedgerConfig::load(&config_path)
        .with_context(|| format!("failed to load ledger config {}", config_path.display()))?;
    let network = network_name(config.network_id);

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = KeelDB::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // Asset balances are not persisted by the node; see InMemoryAssets.
    let ledger = Ledger::open(db, config, InMemoryAssets::new()).context("failed to open ledger")?;
    let ledger = Arc::new(RwLock::new(ledger));

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    let app_state = api::AppState {
        version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        network,
        ledger: Arc::clone(&ledger),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.bind, args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("query API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Gauge refresher ---
    let ledger_ref = Arc::clone(&ledger);
    let metrics_ref = Arc::clone(&node_metrics);
    let period = Duration::from_secs(args.metrics_interval_secs.max(1));
    let refresher = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let snapshot = {
                let ledger = ledger_ref.read();
                ledger.next_event_seq().map(|seq| (ledger.stats(), seq))
            };
            match snapshot {
                Ok((stats, seq)) => {
                    metrics_ref.observe(&stats, seq);
                    tracing::debug!(?stats, next_event_seq = seq, "metrics refreshed");
                }
                Err(e) => tracing::warn!(error = %e, "failed to read ledger stats"),
            }
        }
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    refresher.abort();
    tracing::info!("keel-node stopped");
    Ok(())
}

/// Creates the data directory and writes a single-administrator config.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("keel_node=info", LogFormat::Pretty)?;

    let data_dir = &args.data_dir;
    let network_id = network_id_from_name(&args.network)
        .with_context(|| format!("unknown network: {}", args.network))?;
    tracing::info!(data_dir = %data_dir.display(), network = %args.network, "initializing node");

    let config_path = data_dir.join(CONFIG_FILE_NAME);
    if config_path.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite",
            config_path.display()
        );
    }
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let admin = match &args.admin {
        Some(hex) => Address::from_hex(hex).context("invalid --admin address")?,
        None => generate_admin_key(data_dir)?,
    };

    let mut config = LedgerConfig::devnet(admin);
    config.network_id = network_id;
    config.ledger_identity = Address::from_label(&format!("keel:ledger:{}", args.network));
    config.min_withdrawal_delay = args.min_withdrawal_delay;
    config.validate().context("generated config is invalid")?;
    config
        .save(&config_path)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Network        : {}", network_name(network_id));
    println!("  Config         : {}", config_path.display());
    println!("  Administrator  : {}", admin.to_hex());

    Ok(())
}

/// Generates an administrator keypair and stores its secret next to the
/// config. Returns the administrator's address.
fn generate_admin_key(data_dir: &std::path::Path) -> Result<Address> {
    let keypair = KeelKeypair::generate();
    let key_path = data_dir.join("admin.key");
    std::fs::write(&key_path, hex::encode(keypair.secret_key_bytes()))
        .with_context(|| format!("failed to write admin key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(
        address = %keypair.address().to_hex(),
        key_path = %key_path.display(),
        "administrator keypair generated"
    );
    Ok(keypair.address())
}

/// Queries a running node's status endpoint and prints the body.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let body = http_get(&args.api_url, "/status").await?;
    let value: serde_json::Value =
        serde_json::from_str(&body).context("status endpoint returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Splits `http://host:port/...` into `host:port` and the host alone.
fn endpoint_authority(url: &str) -> Result<(String, String)> {
    let rest = url
        .strip_prefix("http://")
        .with_context(|| format!("only http:// endpoints are supported: {url}"))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        bail!("missing host in {url}");
    }
    let host = authority.split(':').next().unwrap_or(authority).to_string();
    let authority = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{authority}:80")
    };
    Ok((authority, host))
}

/// Minimal HTTP/1.1 GET over a raw TCP stream.
async fn http_get(base: &str, path: &str) -> Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (authority, host) = endpoint_authority(base)?;
    let mut stream = tokio::net::TcpStream::connect(&authority)
        .await
        .with_context(|| format!("failed to connect to {}", authority))?;

    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    let (head, body) = response
        .split_once("\r\n\r\n")
        .context("malformed HTTP response")?;
    if !head.starts_with("HTTP/1.1 200") {
        bail!(
            "node answered: {}",
            head.lines().next().unwrap_or_default()
        );
    }
    Ok(body.to_string())
}

fn print_version() {
    println!("keel-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
