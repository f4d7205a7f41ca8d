//! # Prometheus Metrics
//!
//! Ledger gauges scraped at `/metrics` on the metrics port. The gauges are
//! refreshed from [`LedgerStats`] on an interval rather than updated inline,
//! since the API is read-only and the ledger has no hooks into the node.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] under the
//! `keel` namespace.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

use keel_contracts::{LedgerStats, OperationClass};

/// All Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Allow-listed vaults.
    pub vaults: IntGauge,
    /// Registered operators.
    pub operators: IntGauge,
    /// Depositors currently delegated.
    pub delegations: IntGauge,
    /// Withdrawal requests queued and not yet completed.
    pub pending_withdrawals: IntGauge,
    /// 1 when the operation class is paused.
    pub paused: IntGaugeVec,
    /// Next event sequence number.
    pub event_seq: IntGauge,
    /// Query API requests served.
    pub api_requests_total: IntCounter,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("keel".into()), None)?;

        let vaults = IntGauge::new("vaults", "Number of allow-listed vaults")?;
        let operators = IntGauge::new("operators", "Number of registered operators")?;
        let delegations = IntGauge::new("delegations", "Number of delegated depositors")?;
        let pending_withdrawals = IntGauge::new(
            "pending_withdrawals",
            "Withdrawal requests queued and not yet completed",
        )?;
        let paused = IntGaugeVec::new(
            Opts::new("paused", "1 when the operation class is paused"),
            &["class"],
        )?;
        let event_seq = IntGauge::new("event_seq", "Sequence number of the next ledger event")?;
        let api_requests_total =
            IntCounter::new("api_requests_total", "Query API requests served")?;

        registry.register(Box::new(vaults.clone()))?;
        registry.register(Box::new(operators.clone()))?;
        registry.register(Box::new(delegations.clone()))?;
        registry.register(Box::new(pending_withdrawals.clone()))?;
        registry.register(Box::new(paused.clone()))?;
        registry.register(Box::new(event_seq.clone()))?;
        registry.register(Box::new(api_requests_total.clone()))?;

        Ok(Self {
            registry,
            vaults,
            operators,
            delegations,
            pending_withdrawals,
            paused,
            event_seq,
            api_requests_total,
        })
    }

    /// Copy a stats snapshot into the gauges.
    pub fn observe(&self, stats: &LedgerStats, next_event_seq: u64) {
        self.vaults.set(stats.vaults as i64);
        self.operators.set(stats.operators as i64);
        self.delegations.set(stats.delegations as i64);
        self.pending_withdrawals.set(stats.pending_withdrawals as i64);
        for class in OperationClass::ALL {
            let paused = stats.paused_mask & class.bit() != 0;
            self.paused
                .with_label_values(&[&class.to_string()])
                .set(paused as i64);
        }
        self.event_seq.set(next_event_seq as i64);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics handle passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
