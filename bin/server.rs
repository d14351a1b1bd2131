// Bean Ledger - Web Server
// Thin REST handlers over the Ledger handle

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bean_ledger::{AccountType, Ledger, LedgerConfig, LedgerError, TransactionInput};

/// Shared application state
#[derive(Clone)]
struct AppState {
    ledger: Arc<Ledger>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Validation(_) | LedgerError::Parse { .. } => StatusCode::BAD_REQUEST,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Duplicate(_) | LedgerError::HasTransactions(_) => StatusCode::CONFLICT,
        LedgerError::Persistence(_) | LedgerError::Projection(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn fail(err: LedgerError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(kind = err.kind(), error = %err, "request failed");
    } else {
        warn!(kind = err.kind(), error = %err, "request rejected");
    }
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.to_string()),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(result: Result<T, LedgerError>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data),
        Err(err) => fail(err),
    }
}

/// Decode URL-encoded account names ("Assets%3ABank")
fn decode_segment(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Deserialize)]
struct TransactionParams {
    start: Option<i64>,
    end: Option<i64>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewAccount {
    nickname: String,
    actual_name: String,
    #[serde(rename = "type")]
    kind: AccountType,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetBalance {
    date: String,
    balance: f64,
    pad_account: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health
async fn health_check() -> Response {
    ApiResponse::ok("OK")
}

/// GET /api/transactions?start&end&limit
async fn get_transactions(State(state): State<AppState>, Query(params): Query<TransactionParams>) -> Response {
    respond(state.ledger.get_transactions(params.start, params.end, params.limit).await)
}

/// POST /api/transactions
async fn add_transaction(State(state): State<AppState>, Json(input): Json<TransactionInput>) -> Response {
    respond(state.ledger.add_transaction(input).await)
}

/// DELETE /api/transactions/:id
async fn delete_transaction(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(state.ledger.delete_transaction(&decode_segment(&id)).await)
}

/// GET /api/accounts
async fn get_accounts(State(state): State<AppState>) -> Response {
    respond(state.ledger.get_accounts().await)
}

/// POST /api/accounts
async fn add_account(State(state): State<AppState>, Json(body): Json<NewAccount>) -> Response {
    respond(
        state
            .ledger
            .add_account(&body.nickname, &body.actual_name, body.kind)
            .await,
    )
}

/// DELETE /api/accounts/:account
async fn delete_account(State(state): State<AppState>, Path(account): Path<String>) -> Response {
    respond(state.ledger.delete_account(&decode_segment(&account)).await)
}

/// GET /api/accounts/:account/balance
async fn get_account_balance(State(state): State<AppState>, Path(account): Path<String>) -> Response {
    respond(state.ledger.get_account_balance(&decode_segment(&account)).await)
}

/// POST /api/accounts/:account/balance
async fn set_account_balance(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Json(body): Json<SetBalance>,
) -> Response {
    let account = decode_segment(&account);
    match state
        .ledger
        .set_account_balance(&account, &body.date, body.balance, &body.pad_account)
        .await
    {
        Ok(true) => ApiResponse::ok(true),
        Ok(false) => fail(LedgerError::NotFound(format!(
            "account {} or {}",
            account, body.pad_account
        ))),
        Err(err) => fail(err),
    }
}

/// GET /api/accounts/:account/transactions?limit
async fn get_account_transactions(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(params): Query<LimitParams>,
) -> Response {
    respond(
        state
            .ledger
            .get_account_transactions(&decode_segment(&account), params.limit)
            .await,
    )
}

/// POST /api/sync
async fn sync_transactions(State(state): State<AppState>) -> Response {
    respond(state.ledger.sync_transactions().await)
}

/// GET /api/balance
async fn get_balance(State(state): State<AppState>) -> Response {
    respond(state.ledger.get_balance().await)
}

/// GET /api/monthly-stats
async fn get_monthly_stats(State(state): State<AppState>) -> Response {
    respond(state.ledger.get_monthly_stats().await)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bean_ledger=info,bean_server=info")),
        )
        .init();

    let config = LedgerConfig::from_env();
    let ledger = Ledger::open(config.clone())
        .with_context(|| format!("opening ledger in {}", config.data_dir.display()))?;

    // bring the store in line with hand edits made while the server was down
    match ledger.sync_transactions().await {
        Ok(report) => info!("{}", report.summary()),
        Err(err) => warn!(error = %err, "startup sync failed"),
    }

    let state = AppState {
        ledger: Arc::new(ledger),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/transactions", get(get_transactions).post(add_transaction))
        .route("/transactions/:id", delete(delete_transaction))
        .route("/accounts", get(get_accounts).post(add_account))
        .route("/accounts/:account", delete(delete_account))
        .route(
            "/accounts/:account/balance",
            get(get_account_balance).post(set_account_balance),
        )
        .route("/accounts/:account/transactions", get(get_account_transactions))
        .route("/sync", post(sync_transactions))
        .route("/balance", get(get_balance))
        .route("/monthly-stats", get(get_monthly_stats))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = std::env::var("BEAN_LEDGER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!(%addr, "🚀 server running");
    axum::serve(listener, app).await.context("server stopped")?;
    Ok(())
}
