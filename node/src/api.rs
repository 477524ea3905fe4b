//! # REST API
//!
//! The axum router in front of the [`LedgerHost`]. All endpoints share
//! application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                  | Description                            |
//! |--------|-----------------------|----------------------------------------|
//! | GET    | `/health`             | Liveness check                         |
//! | GET    | `/statistics`         | Aggregates and caps                    |
//! | GET    | `/balances/:account`  | Balance of one account                 |
//! | GET    | `/events`             | Most recent committed events           |
//! | GET    | `/payouts`            | Payouts awaiting settlement            |
//! | POST   | `/payouts/drain`      | Hand pending payouts to settlement     |
//! | POST   | `/deposit`            | Credit the caller                      |
//! | POST   | `/withdraw`           | Debit the caller and release value     |
//! | POST   | `/`                   | Unsolicited value; always refused      |
//!
//! State-changing endpoints act on behalf of the account named in the
//! `x-caller` header. The node trusts that header; authenticating it is the
//! job of the gateway in front of the node.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use capvault_contracts::{LedgerError, Payout, VaultEvent};
use capvault_protocol::config::CALLER_HEADER;
use capvault_protocol::identity::AccountId;

use crate::host::{HostError, LedgerHost, LedgerSummary};
use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Reported by `/health`.
    pub version: String,
    pub host: Arc<LedgerHost>,
    pub metrics: SharedMetrics,
}

impl AppState {
    /// Counts a rejected operation and converts its error. The
    /// `total_deposited` gauge is kept by the host under its lock.
    fn record<T>(&self, result: Result<T, HostError>) -> Result<T, ApiError> {
        result.map_err(|err| {
            let err = ApiError::from(err);
            self.metrics.reject(err.kind);
            err
        })
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the API [`Router`] with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", post(direct_transfer_handler))
        .route("/health", get(health_handler))
        .route("/statistics", get(statistics_handler))
        .route("/balances/:account", get(balance_handler))
        .route("/events", get(events_handler))
        .route("/payouts", get(payouts_handler))
        .route("/payouts/drain", post(drain_payouts_handler))
        .route("/deposit", post(deposit_handler))
        .route("/withdraw", post(withdraw_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /deposit`, `POST /withdraw` and `POST /`.
#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: u64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account: AccountId,
    pub balance: u64,
}

/// The account named by the `x-caller` header.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub AccountId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts.headers.get(CALLER_HEADER).ok_or_else(|| {
            ApiError::new(
                StatusCode::UNAUTHORIZED,
                "missing_caller",
                format!("missing {CALLER_HEADER} header"),
            )
        })?;

        value
            .to_str()
            .ok()
            .and_then(|s| s.parse::<AccountId>().ok())
            .map(Caller)
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    "invalid_caller",
                    format!("{CALLER_HEADER} must be a 64-character hex account id"),
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An error rendered as `{ "error": kind, "message": text, ...context }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    context: serde_json::Map<String, serde_json::Value>,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: String) -> Self {
        Self {
            status,
            kind,
            message,
            context: serde_json::Map::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

impl From<HostError> for ApiError {
    fn from(err: HostError) -> Self {
        let message = err.to_string();
        let ledger = match err {
            HostError::Ledger(ledger) => ledger,
            HostError::Storage(_) => {
                return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "storage_failure", message)
            }
        };

        let status = match &ledger {
            LedgerError::ZeroAmount => StatusCode::BAD_REQUEST,
            LedgerError::GlobalCapExceeded { .. }
            | LedgerError::WithdrawalCapExceeded { .. }
            | LedgerError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::TransferFailed { .. } => StatusCode::BAD_GATEWAY,
            LedgerError::DirectTransferRejected { .. } => StatusCode::FORBIDDEN,
            LedgerError::InvalidConfiguration { .. }
            | LedgerError::CorruptState(_)
            | LedgerError::AmountOverflow => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error = ApiError::new(status, ledger.kind(), message);

        match ledger {
            LedgerError::GlobalCapExceeded { attempted, cap } => {
                error.with("attempted", attempted).with("cap", cap)
            }
            LedgerError::WithdrawalCapExceeded { requested, cap } => {
                error.with("requested", requested).with("cap", cap)
            }
            LedgerError::InsufficientBalance {
                requested,
                available,
            } => error
                .with("requested", requested)
                .with("available", available),
            LedgerError::TransferFailed {
                destination,
                amount,
            } => error
                .with("destination", destination.to_hex())
                .with("amount", amount),
            LedgerError::DirectTransferRejected { sender, amount } => error
                .with("sender", sender.to_hex())
                .with("amount", amount),
            _ => error,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::Map::new();
        body.insert("error".into(), self.kind.into());
        body.insert("message".into(), self.message.into());
        body.extend(self.context);
        (self.status, Json(serde_json::Value::Object(body))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 while the process is serving.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": state.version }))
}

/// `GET /statistics`: aggregates, caps and account count.
async fn statistics_handler(State(state): State<AppState>) -> Json<LedgerSummary> {
    Json(state.host.summary())
}

/// `GET /balances/:account`: zero for accounts never seen.
async fn balance_handler(
    Path(account): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account: AccountId = account.parse().map_err(|e| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_account",
            format!("{e}"),
        )
    })?;
    Ok(Json(BalanceResponse {
        account,
        balance: state.host.balance_of(&account),
    }))
}

async fn events_handler(State(state): State<AppState>) -> Json<Vec<VaultEvent>> {
    Json(state.host.events())
}

async fn payouts_handler(State(state): State<AppState>) -> Json<Vec<Payout>> {
    Json(state.host.payouts())
}

/// `POST /payouts/drain`: empties the outbox and returns what it held.
async fn drain_payouts_handler(State(state): State<AppState>) -> Json<Vec<Payout>> {
    Json(state.host.drain_payouts())
}

/// `POST /deposit`: credits the caller; responds with the committed event.
async fn deposit_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<AmountRequest>,
) -> Result<Json<VaultEvent>, ApiError> {
    let timer = state.metrics.operation_latency_seconds.start_timer();
    let result = state.host.deposit(&caller, req.amount);
    timer.observe_duration();

    let event = state.record(result)?;
    state.metrics.deposits_total.inc();
    Ok(Json(event))
}

/// `POST /withdraw`: debits the caller and queues a payout.
async fn withdraw_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<AmountRequest>,
) -> Result<Json<VaultEvent>, ApiError> {
    let timer = state.metrics.operation_latency_seconds.start_timer();
    let result = state.host.withdraw(&caller, req.amount);
    timer.observe_duration();

    let event = state.record(result)?;
    state.metrics.withdrawals_total.inc();
    Ok(Json(event))
}

/// `POST /`: value sent without going through `/deposit`. Always 403.
async fn direct_transfer_handler(
    State(state): State<AppState>,
    Caller(sender): Caller,
    Json(req): Json<AmountRequest>,
) -> Result<StatusCode, ApiError> {
    let result = state.host.receive_direct(&sender, req.amount);
    state.record(result).map(|()| StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
