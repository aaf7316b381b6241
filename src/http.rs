//! HTTP boundary (spec §6). Deliberately thin: framing, auth, and request
//! schemas beyond what's needed to exercise the trade pipeline are out of
//! scope, but the surface follows the teacher's `axum::Router` + shared
//! `AppState` shape (`main.rs`) rather than inventing a new one.

use crate::balance::BalanceService;
use crate::config::Config;
use crate::dispatcher::MarketDispatcher;
use crate::domain::Outcome;
use crate::error::AppError;
use crate::executor::MarketOrderRequest;
use crate::ledger::Ledger;
use crate::rate_limiter::RateLimiter;
use crate::store::{MarketStore, PositionStore};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub markets: Arc<MarketStore>,
    pub positions: Arc<PositionStore>,
    pub ledger: Arc<Ledger>,
    pub balances: Arc<BalanceService>,
    pub dispatcher: Arc<MarketDispatcher>,
    pub rate_limiter: Arc<RateLimiter>,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/trade", post(submit_trade))
        .route("/orders/:order_id/cancel", post(cancel_order))
        .route("/markets/:market_id", get(get_market))
        .route("/users/:user_id/balance", get(get_balance))
        .route("/users/:user_id/positions/:market_id", get(get_position))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Derives the rate-limit principal (spec §6): `user:<id>` when the request
/// carries one, else `ip:<addr>` taken from the first hop of
/// `X-Forwarded-For`. There's no auth layer in scope, so "authenticated"
/// here just means the caller supplied a `user_id` in the request body.
fn principal_for(user_id: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(user_id) = user_id.filter(|id| !id.is_empty()) {
        return format!("user:{user_id}");
    }
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown");
    format!("ip:{ip}")
}

#[derive(Debug, Deserialize)]
struct TradeRequest {
    user_id: String,
    market_id: String,
    outcome: String,
    quantity: f64,
    nonce: Option<String>,
}

#[derive(Debug, Serialize)]
struct TradeResponse {
    order_id: String,
    status: String,
    filled_quantity: f64,
    total_cost: Option<String>,
    average_fill_price: Option<String>,
}

async fn submit_trade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TradeRequest>,
) -> Result<Json<TradeResponse>, ApiError> {
    if !state.config.is_rate_limit_exempt("/trade") {
        let principal = principal_for(Some(&body.user_id), &headers);
        state.rate_limiter.check(&principal).map_err(|err| ApiError::rate_limited(err, principal))?;
    }

    let outcome = Outcome::from_str(&body.outcome).ok_or_else(|| {
        AppError::ValidationFailed(crate::error::ValidationErrors(vec![format!(
            "unknown outcome '{}'",
            body.outcome
        )]))
    })?;

    let order = state
        .dispatcher
        .submit(MarketOrderRequest {
            user_id: body.user_id,
            market_id: body.market_id,
            outcome,
            quantity: body.quantity,
            nonce: body.nonce,
        })
        .await?;

    Ok(Json(TradeResponse {
        order_id: order.id.to_string(),
        status: order.status.to_string(),
        filled_quantity: order.filled_quantity,
        total_cost: order.total_cost.map(|c| c.to_canonical_string()),
        average_fill_price: order.average_fill_price.map(|c| c.to_canonical_string()),
    }))
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    user_id: String,
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<TradeResponse>, ApiError> {
    let order = state.dispatcher.cancel(order_id, &body.user_id).await?;
    Ok(Json(TradeResponse {
        order_id: order.id.to_string(),
        status: order.status.to_string(),
        filled_quantity: order.filled_quantity,
        total_cost: order.total_cost.map(|c| c.to_canonical_string()),
        average_fill_price: order.average_fill_price.map(|c| c.to_canonical_string()),
    }))
}

#[derive(Debug, Serialize)]
struct MarketSummary {
    id: String,
    yes_shares: f64,
    no_shares: f64,
    liquidity_b: f64,
    price_yes: f64,
}

async fn get_market(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
) -> Result<Json<MarketSummary>, ApiError> {
    let market = state
        .markets
        .get(&market_id)
        .ok_or_else(|| AppError::MarketNotFound(market_id.clone()))?;
    let price_yes = crate::pricing::price_yes(market.yes_shares, market.no_shares, market.liquidity_b);
    Ok(Json(MarketSummary {
        id: market.id,
        yes_shares: market.yes_shares,
        no_shares: market.no_shares,
        liquidity_b: market.liquidity_b,
        price_yes,
    }))
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    user_id: String,
    balance: String,
}

async fn get_balance(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<BalanceResponse> {
    let balance = state.balances.get(&user_id, &state.ledger);
    Json(BalanceResponse {
        user_id,
        balance: balance.to_canonical_string(),
    })
}

#[derive(Debug, Serialize)]
struct PositionResponse {
    user_id: String,
    market_id: String,
    yes_shares: f64,
    no_shares: f64,
}

async fn get_position(
    State(state): State<AppState>,
    Path((user_id, market_id)): Path<(String, String)>,
) -> Json<PositionResponse> {
    let position = state.positions.get(&user_id, &market_id);
    Json(PositionResponse {
        user_id,
        market_id,
        yes_shares: position.as_ref().map(|p| p.yes_shares).unwrap_or(0.0),
        no_shares: position.as_ref().map(|p| p.no_shares).unwrap_or(0.0),
    })
}

/// Maps `AppError`'s reason code onto an HTTP status the way the teacher's
/// `internal_error`/`not_found_error` helpers do for its own error cases.
struct ApiError {
    err: AppError,
    rate_limit_identifier: Option<String>,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError { err, rate_limit_identifier: None }
    }
}

impl ApiError {
    /// A `RateLimited` error carries the principal that tripped it, for the
    /// `X-RateLimit-Identifier` header (spec §6).
    fn rate_limited(err: AppError, identifier: String) -> Self {
        ApiError { err, rate_limit_identifier: Some(identifier) }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.err {
            AppError::MarketNotFound(_) => StatusCode::NOT_FOUND,
            AppError::ValidationFailed(_)
            | AppError::InvalidAmount(_)
            | AppError::ArithmeticError(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientBalance { .. }
            | AppError::IllegalTransition { .. }
            | AppError::NotActive
            | AppError::DuplicateNonce(_) => StatusCode::CONFLICT,
            AppError::NotAuthorized => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::RaceLost | AppError::ExecutionFailed(_) | AppError::PersistenceError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.err, "internal error handling request");
        }

        // spec §6: 429 responses carry `Retry-After` and
        // `X-RateLimit-Identifier` headers plus a body naming both.
        if let AppError::RateLimited { retry_after_seconds } = &self.err {
            let identifier = self.rate_limit_identifier.unwrap_or_default();
            let body = Json(serde_json::json!({
                "error": "Rate limit exceeded",
                "identifier": identifier,
                "retryAfter": retry_after_seconds,
            }));
            let mut response = (status, body).into_response();
            if let Ok(value) = retry_after_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
            if let Ok(value) = identifier.parse() {
                response.headers_mut().insert("X-RateLimit-Identifier", value);
            }
            return response;
        }

        let body = Json(serde_json::json!({
            "error": self.err.reason_code(),
            "message": self.err.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_prefers_user_id_over_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        assert_eq!(principal_for(Some("bob"), &headers), "user:bob");
    }

    #[test]
    fn principal_falls_back_to_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(principal_for(None, &headers), "ip:203.0.113.9");
    }

    #[test]
    fn principal_falls_back_to_unknown_with_no_headers() {
        let headers = HeaderMap::new();
        assert_eq!(principal_for(None, &headers), "ip:unknown");
    }
}
