//! # Query API
//!
//! Builds the axum router for the node's read-only HTTP interface. Every
//! handler takes a read lock on the ledger, copies out what it needs and
//! releases the lock before responding.
//!
//! ## Endpoints
//!
//! | Method | Path                       | Description                              |
//! |--------|----------------------------|------------------------------------------|
//! | GET    | `/health`                  | Liveness probe                           |
//! | GET    | `/status`                  | Node and ledger summary                  |
//! | GET    | `/vaults`                  | Allow-listed vaults                      |
//! | GET    | `/vaults/:vault`           | One vault with its exchange rate inputs  |
//! | GET    | `/depositors/:address`     | Positions, delegation, nonces            |
//! | GET    | `/operators/:address`      | Operator profile and delegated shares    |
//! | GET    | `/withdrawals/:root`       | Pending withdrawal request               |
//! | GET    | `/events?from=N&limit=M`   | Committed ledger events                  |

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use keel_contracts::{
    Address, Digest, Ledger, LedgerError, LedgerEvent, LedgerStats, OperationClass, VaultId,
    WithdrawalRequest,
};

use crate::metrics::SharedMetrics;

/// Upper bound on events returned per `/events` call.
pub const MAX_EVENTS_PER_PAGE: usize = 500;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// The ledger as shared between the API and the metrics refresher.
pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Network name (e.g., "devnet").
    pub network: String,
    pub ledger: SharedLedger,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/vaults", get(vaults_handler))
        .route("/vaults/:vault", get(vault_handler))
        .route("/depositors/:address", get(depositor_handler))
        .route("/operators/:address", get(operator_handler))
        .route("/withdrawals/:root", get(withdrawal_handler))
        .route("/events", get(events_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Ledger(LedgerError),
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Ledger(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Ledger(e) => {
                tracing::error!(error = %e, "ledger query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_address(s: &str) -> Result<Address, ApiError> {
    Address::from_hex(s).map_err(|e| ApiError::BadRequest(format!("bad address {s}: {e}")))
}

fn parse_digest(s: &str) -> Result<Digest, ApiError> {
    let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|_| ApiError::BadRequest(format!("bad digest {s}")))?;
    bytes
        .try_into()
        .map_err(|_| ApiError::BadRequest(format!("digest must be 32 bytes: {s}")))
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub network: String,
    pub network_id: u64,
    pub stats: LedgerStats,
    /// Names of the paused operation classes.
    pub paused: Vec<String>,
    pub min_withdrawal_delay: u64,
    pub next_event_seq: u64,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VaultResponse {
    pub vault: VaultId,
    pub asset: Address,
    pub total_shares: u64,
    /// Asset balance held under the vault's identity.
    pub balance: u64,
    pub max_per_deposit: u64,
    pub max_total_deposits: u64,
    pub third_party_withdrawal_forbidden: bool,
    pub withdrawal_delay: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PositionResponse {
    pub vault: VaultId,
    pub shares: u64,
    /// What the shares redeem for at the current rate.
    pub underlying: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DepositorResponse {
    pub address: Address,
    pub delegated_to: Option<Address>,
    pub positions: Vec<PositionResponse>,
    pub cumulative_withdrawals_queued: u64,
    pub delegation_nonce: u64,
    pub deposit_nonce: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OperatorResponse {
    pub address: Address,
    pub earnings_receiver: Address,
    pub delegation_approver: Option<Address>,
    pub opt_out_window: u64,
    pub metadata_uri: String,
    pub shares: Vec<OperatorSharesEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OperatorSharesEntry {
    pub vault: VaultId,
    pub shares: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawalResponse {
    pub root: String,
    pub request: WithdrawalRequest,
    /// Earliest logical time the request can complete.
    pub ready_at: u64,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub from: u64,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventEntry {
    pub seq: u64,
    pub name: String,
    pub event: LedgerEvent,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is up.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`
async fn status_handler(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    state.metrics.api_requests_total.inc();
    let ledger = state.ledger.read();
    let stats = ledger.stats();
    let paused = OperationClass::ALL
        .iter()
        .filter(|c| ledger.is_paused(**c))
        .map(|c| c.to_string())
        .collect();

    Ok(Json(StatusResponse {
        version: state.version.clone(),
        network: state.network.clone(),
        network_id: ledger.config().network_id,
        stats,
        paused,
        min_withdrawal_delay: ledger.min_withdrawal_delay(),
        next_event_seq: ledger.next_event_seq()?,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

fn vault_response(ledger: &Ledger, id: &VaultId) -> Option<VaultResponse> {
    use keel_contracts::AssetTransfer;

    let vault = ledger.vault(id)?;
    Some(VaultResponse {
        vault: vault.id,
        asset: vault.asset,
        total_shares: vault.total_shares,
        balance: ledger.assets().balance_of(&vault.asset, &vault.id),
        max_per_deposit: vault.max_per_deposit,
        max_total_deposits: vault.max_total_deposits,
        third_party_withdrawal_forbidden: ledger.third_party_withdrawal_forbidden(id),
        withdrawal_delay: ledger.vault_withdrawal_delay(id),
    })
}

/// `GET /vaults`: allow-listed vaults only.
async fn vaults_handler(State(state): State<AppState>) -> ApiResult<Vec<VaultResponse>> {
    state.metrics.api_requests_total.inc();
    let ledger = state.ledger.read();
    let vaults = ledger
        .state()
        .positions
        .allowlisted_vaults()
        .filter_map(|id| vault_response(&ledger, id))
        .collect();
    Ok(Json(vaults))
}

/// `GET /vaults/:vault`: any known vault, listed or not.
async fn vault_handler(
    Path(vault): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<VaultResponse> {
    state.metrics.api_requests_total.inc();
    let id = parse_address(&vault)?;
    let ledger = state.ledger.read();
    vault_response(&ledger, &id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("vault not found: {vault}")))
}

/// `GET /depositors/:address`. Unknown depositors get an empty record.
async fn depositor_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<DepositorResponse> {
    state.metrics.api_requests_total.inc();
    let who = parse_address(&address)?;
    let ledger = state.ledger.read();

    let positions = ledger
        .deposits(&who)
        .into_iter()
        .map(|(vault, shares)| -> Result<PositionResponse, LedgerError> {
            Ok(PositionResponse {
                vault,
                shares,
                underlying: ledger.shares_to_underlying_view(&vault, shares)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(DepositorResponse {
        address: who,
        delegated_to: ledger.delegated_to(&who),
        positions,
        cumulative_withdrawals_queued: ledger.cumulative_withdrawals_queued(&who),
        delegation_nonce: ledger.delegation_nonce(&who),
        deposit_nonce: ledger.deposit_nonce(&who),
    }))
}

/// `GET /operators/:address`
async fn operator_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<OperatorResponse> {
    state.metrics.api_requests_total.inc();
    let operator = parse_address(&address)?;
    let ledger = state.ledger.read();
    let profile = ledger
        .operator_profile(&operator)
        .ok_or_else(|| ApiError::NotFound(format!("not an operator: {address}")))?;

    let shares = ledger
        .state()
        .delegation
        .iter_operator_shares()
        .filter(|(op, _, _)| **op == operator)
        .map(|(_, vault, shares)| OperatorSharesEntry {
            vault: *vault,
            shares,
        })
        .collect();

    Ok(Json(OperatorResponse {
        address: operator,
        earnings_receiver: profile.details.earnings_receiver,
        delegation_approver: profile.details.approver(),
        opt_out_window: profile.details.opt_out_window,
        metadata_uri: profile.metadata_uri.clone(),
        shares,
    }))
}

/// `GET /withdrawals/:root`: 404 once completed.
async fn withdrawal_handler(
    Path(root): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<WithdrawalResponse> {
    state.metrics.api_requests_total.inc();
    let digest = parse_digest(&root)?;
    let ledger = state.ledger.read();
    let request = ledger
        .pending_withdrawal(&digest)
        .ok_or_else(|| ApiError::NotFound(format!("no pending withdrawal: {root}")))?
        .clone();
    let ready_at = request.start
        + ledger
            .state()
            .withdrawals
            .effective_delay(&request.vaults);

    Ok(Json(WithdrawalResponse {
        root: hex::encode(digest),
        request,
        ready_at,
    }))
}

/// `GET /events`: up to `limit` events starting at `from`.
async fn events_handler(
    Query(query): Query<EventsQuery>,
    State(state): State<AppState>,
) -> ApiResult<Vec<EventEntry>> {
    state.metrics.api_requests_total.inc();
    let limit = query
        .limit
        .unwrap_or(MAX_EVENTS_PER_PAGE)
        .min(MAX_EVENTS_PER_PAGE);
    let ledger = state.ledger.read();
    let events = ledger
        .events_from(query.from)?
        .into_iter()
        .take(limit)
        .map(|(seq, event)| EventEntry {
            seq,
            name: event.name().to_string(),
            event,
        })
        .collect();
    Ok(Json(events))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use keel_contracts::{
        ExecutionContext, InMemoryAssets, LedgerConfig, OperatorDetails, QueuedWithdrawalParams,
        VaultListing,
    };
    use keel_protocol::config::NETWORK_ID_DEVNET;
    use tower::ServiceExt;

    fn a(label: &str) -> Address {
        Address::from_label(label)
    }

    /// A ledger with one vault, one operator and alice delegated to it
    /// with a withdrawal pending.
    fn test_app_state() -> (AppState, Digest) {
        let admin = a("admin");
        let alice = a("alice");
        let op = a("operator");
        let mut config = LedgerConfig::devnet(admin);
        config.min_withdrawal_delay = 10;

        let mut assets = InMemoryAssets::new();
        assets.mint(a("asset:usd"), alice, 10_000);
        let mut ledger = Ledger::new(config, assets).expect("ledger");

        let ctx = ExecutionContext::new(admin, 100, NETWORK_ID_DEVNET);
        ledger
            .add_vaults_to_allowlist(
                &ctx,
                &[VaultListing {
                    vault: a("vault:usd"),
                    asset: a("asset:usd"),
                    third_party_forbidden: true,
                }],
            )
            .unwrap();
        ledger
            .register_operator(&ctx.with_caller(op), OperatorDetails::new(op), "ipfs://op")
            .unwrap();
        let alice_ctx = ctx.with_caller(alice);
        ledger
            .deposit_into_vault(&alice_ctx, a("vault:usd"), 4_000)
            .unwrap();
        ledger.delegate(&alice_ctx, op).unwrap();
        let roots = ledger
            .queue_withdrawals(
                &alice_ctx,
                vec![QueuedWithdrawalParams {
                    vaults: vec![a("vault:usd")],
                    shares: vec![1_000],
                    withdrawer: alice,
                }],
            )
            .unwrap();

        let state = AppState {
            version: "0.1.0-test".into(),
            network: "devnet".into(),
            ledger: Arc::new(RwLock::new(ledger)),
            metrics: Arc::new(crate::metrics::NodeMetrics::new().unwrap()),
        };
        (state, roots[0])
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _) = test_app_state();
        let (status, body) = get(&create_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_ledger_stats() {
        let (state, _) = test_app_state();
        let metrics = state.metrics.clone();
        let (status, body) = get(&create_router(state), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["vaults"], 1);
        assert_eq!(body["stats"]["operators"], 1);
        assert_eq!(body["stats"]["pending_withdrawals"], 1);
        assert_eq!(body["min_withdrawal_delay"], 10);
        assert_eq!(body["network_id"], NETWORK_ID_DEVNET);
        assert!(body["paused"].as_array().unwrap().is_empty());
        assert_eq!(metrics.api_requests_total.get(), 1);
    }

    #[tokio::test]
    async fn vaults_lists_allowlisted_vault() {
        let (state, _) = test_app_state();
        let (status, body) = get(&create_router(state), "/vaults").await;
        assert_eq!(status, StatusCode::OK);
        let vaults = body.as_array().unwrap();
        assert_eq!(vaults.len(), 1);
        assert_eq!(vaults[0]["vault"], a("vault:usd").to_hex());
        assert_eq!(vaults[0]["total_shares"], 4_000);
        assert_eq!(vaults[0]["balance"], 4_000);
        assert_eq!(vaults[0]["third_party_withdrawal_forbidden"], true);
    }

    #[tokio::test]
    async fn vault_lookup_rejects_bad_hex_and_unknown_ids() {
        let (state, _) = test_app_state();
        let router = create_router(state);

        let (status, _) = get(&router, "/vaults/not-hex").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get(&router, &format!("/vaults/{}", a("nope").to_hex())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("vault not found"));
    }

    #[tokio::test]
    async fn depositor_shows_positions_and_delegation() {
        let (state, _) = test_app_state();
        let path = format!("/depositors/{}", a("alice").to_hex());
        let (status, body) = get(&create_router(state), &path).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delegated_to"], a("operator").to_hex());
        assert_eq!(body["positions"][0]["shares"], 3_000);
        assert_eq!(body["positions"][0]["underlying"], 3_000);
        assert_eq!(body["cumulative_withdrawals_queued"], 1);
    }

    #[tokio::test]
    async fn unknown_depositor_is_empty_not_missing() {
        let (state, _) = test_app_state();
        let path = format!("/depositors/{}", a("stranger").to_hex());
        let (status, body) = get(&create_router(state), &path).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["delegated_to"].is_null());
        assert!(body["positions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn operator_shows_delegated_shares() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, body) = get(&router, &format!("/operators/{}", a("operator").to_hex())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata_uri"], "ipfs://op");
        assert_eq!(body["shares"][0]["shares"], 3_000);
        assert!(body["delegation_approver"].is_null());

        let (status, _) = get(&router, &format!("/operators/{}", a("alice").to_hex())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn withdrawal_reports_ready_time() {
        let (state, root) = test_app_state();
        let (status, body) =
            get(&create_router(state), &format!("/withdrawals/{}", hex::encode(root))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready_at"], 110);
        assert_eq!(body["request"]["start"], 100);
        assert_eq!(body["root"], hex::encode(root));
    }

    #[tokio::test]
    async fn events_page_from_sequence() {
        let (state, _) = test_app_state();
        let router = create_router(state);

        let (status, body) = get(&router, "/events").await;
        assert_eq!(status, StatusCode::OK);
        let all = body.as_array().unwrap().len();
        assert!(all >= 5);
        assert_eq!(body[0]["seq"], 0);

        let (_, body) = get(&router, "/events?from=1&limit=2").await;
        let page = body.as_array().unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["seq"], 1);
    }
}
