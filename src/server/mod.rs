//! HTTP + WebSocket transport
//!
//! Thin glue between the outside world and the core: REST routes for the
//! instrument catalog, trading and history, plus a `/ws` endpoint wired to
//! the broadcast hub. All domain decisions live in the engine; this layer
//! only parses requests and maps errors to status codes.

mod ws;

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::auth::{AuthError, AuthService};
use crate::core::hub::BroadcastHub;
use crate::core::portfolio::types::{PositionView, TradeRecord};
use crate::core::portfolio::{PortfolioEngine, TradeError};
use crate::core::types::market::Instrument;
use crate::ledger::{LedgerError, LedgerStore};

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerStore>,
    pub engine: Arc<PortfolioEngine>,
    pub hub: Arc<BroadcastHub>,
    pub auth: Arc<AuthService>,
}

/// Build the full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/stocks", get(list_stocks))
        .route("/api/stocks/:symbol", get(get_stock))
        .route("/api/portfolio", get(portfolio))
        .route("/api/portfolio/buy", post(buy))
        .route("/api/portfolio/sell", post(sell))
        .route("/api/portfolio/transactions", get(transactions))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process exits
pub async fn run_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// --- request/response types ---

#[derive(Debug, Deserialize)]
struct CredentialsRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
struct UserView {
    username: String,
    #[serde(with = "rust_decimal::serde::float")]
    balance: Decimal,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    message: &'static str,
    token: String,
    user: UserView,
}

#[derive(Debug, Deserialize)]
struct OrderRequest {
    symbol: String,
    quantity: i64,
}

#[derive(Debug, Serialize)]
struct TradeResponse {
    message: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    balance: Decimal,
    transaction: TradeRecord,
}

#[derive(Debug, Serialize)]
struct PortfolioResponse {
    positions: Vec<PositionView>,
    #[serde(with = "rust_decimal::serde::float")]
    balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

// --- handlers ---

async fn health() -> &'static str {
    "OK"
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let session = state.auth.register(&req.username, &req.password).await?;
    Ok(Json(AuthResponse {
        message: "User registered successfully",
        token: session.token,
        user: UserView {
            username: session.account.id,
            balance: session.account.balance,
        },
    }))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let session = state.auth.login(&req.username, &req.password).await?;
    Ok(Json(AuthResponse {
        message: "Login successful",
        token: session.token,
        user: UserView {
            username: session.account.id,
            balance: session.account.balance,
        },
    }))
}

async fn list_stocks(State(state): State<AppState>) -> Result<Json<Vec<Instrument>>, ApiError> {
    Ok(Json(state.ledger.instruments()?))
}

async fn get_stock(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Instrument>, ApiError> {
    state
        .ledger
        .instrument(&symbol)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Stock not found"))
}

async fn portfolio(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PortfolioResponse>, ApiError> {
    let account = authenticate(&state, &headers)?;
    let positions = state.engine.positions(&account)?;
    let balance = state.engine.balance(&account)?;
    Ok(Json(PortfolioResponse { positions, balance }))
}

async fn buy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OrderRequest>,
) -> Result<Json<TradeResponse>, ApiError> {
    let account = authenticate(&state, &headers)?;
    let quantity = validate_quantity(req.quantity)?;
    let outcome = state.engine.buy(&account, &req.symbol, quantity).await?;
    Ok(Json(TradeResponse {
        message: "Stock purchased successfully",
        balance: outcome.balance,
        transaction: outcome.trade,
    }))
}

async fn sell(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OrderRequest>,
) -> Result<Json<TradeResponse>, ApiError> {
    let account = authenticate(&state, &headers)?;
    let quantity = validate_quantity(req.quantity)?;
    let outcome = state.engine.sell(&account, &req.symbol, quantity).await?;
    Ok(Json(TradeResponse {
        message: "Stock sold successfully",
        balance: outcome.balance,
        transaction: outcome.trade,
    }))
}

async fn transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<TradeRecord>>, ApiError> {
    let account = authenticate(&state, &headers)?;
    Ok(Json(state.engine.history(&account, params.limit)?))
}

/// Resolve the caller's account id from the bearer token
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    Ok(state.auth.verify(token)?)
}

fn validate_quantity(quantity: i64) -> Result<u32, ApiError> {
    u32::try_from(quantity)
        .ok()
        .filter(|&q| q > 0)
        .ok_or_else(|| {
            ApiError::bad_request("quantity must be a positive integer")
        })
}

// --- error mapping ---

/// Transport-facing error: a status code plus a JSON `{"error": ...}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<TradeError> for ApiError {
    fn from(err: TradeError) -> Self {
        let status = match &err {
            TradeError::InvalidOrder(_)
            | TradeError::InsufficientFunds
            | TradeError::InsufficientShares => StatusCode::BAD_REQUEST,
            TradeError::UnknownInstrument(_) => StatusCode::NOT_FOUND,
            TradeError::ServiceBusy => StatusCode::SERVICE_UNAVAILABLE,
            TradeError::Unauthenticated => StatusCode::UNAUTHORIZED,
            TradeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match &err {
            AuthError::MissingCredentials
            | AuthError::PasswordTooShort
            | AuthError::InvalidUsername(_)
            | AuthError::UsernameTaken => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::Storage(_) | AuthError::Hash(_) | AuthError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}
