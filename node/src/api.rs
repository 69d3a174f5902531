//! # Status API
//!
//! | Method | Path                 | Description                       |
//! |--------|----------------------|-----------------------------------|
//! | GET    | `/health`            | Liveness check                    |
//! | GET    | `/status`            | Ledger and relayer summary        |
//! | GET    | `/sessions/:id`      | A learning session, hex id        |
//! | GET    | `/credentials/:id`   | A credential by numeric id        |
//! | GET    | `/metrics`           | Prometheus exposition             |

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use accredit_protocol::error::ProtocolError;
use accredit_protocol::ledger::Ledger;
use accredit_protocol::mint::CredentialId;
use accredit_protocol::session::SessionId;

use crate::metrics::{metrics_handler, MetricsState};

pub type AppState = MetricsState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/sessions/:id", get(session_handler))
        .route("/credentials/:id", get(credential_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub version: String,
    pub chain_id: u64,
    pub block_number: u64,
    pub pool_size: usize,
    pub registry: String,
    pub relayer: String,
    pub validators: usize,
    pub relayer_sent: u64,
    pub relayer_confirmed: u64,
    pub relayer_retries: u64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

fn protocol_error_response(error: ProtocolError) -> Response {
    let status = match error {
        ProtocolError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        ProtocolError::MintRejected(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    };
    error_response(status, error.to_string())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let devnet = &state.devnet;
    let stats = devnet.platform.stats();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        chain_id: devnet.ledger.chain_id(),
        block_number: devnet.ledger.block_number(),
        pool_size: devnet.ledger.pool_size(),
        registry: devnet.ledger.registry_address().to_string(),
        relayer: devnet.platform_address().to_string(),
        validators: devnet.validators.len(),
        relayer_sent: stats.sent(),
        relayer_confirmed: stats.confirmed(),
        relayer_retries: stats.retries(),
    })
}

async fn session_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(session_id) = SessionId::from_hex(&id) else {
        return error_response(StatusCode::BAD_REQUEST, format!("'{id}' is not a session id"));
    };
    match state.devnet.sessions.get(&session_id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => protocol_error_response(e),
    }
}

async fn credential_handler(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.devnet.minter.fetch_credential(CredentialId(id)).await {
        Ok(credential) => Json(credential).into_response(),
        Err(e) => protocol_error_response(e),
    }
}
