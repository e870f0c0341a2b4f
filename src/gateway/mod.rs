//! HTTP gateway for payout intake and status lookup.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::Database;
use crate::error::PayoutError;
use crate::payout::PayoutOrchestrator;
use crate::types::{Currency, PayoutRequest};

pub struct AppState {
    pub orchestrator: PayoutOrchestrator,
    pub database: Database,
}

/// Request payload for POST /api/v1/payouts.
///
/// Currency arrives as a raw string so unsupported codes surface as a 400
/// instead of a deserialization error.
#[derive(Debug, Deserialize)]
pub struct CreatePayoutRequest {
    pub merchant_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub idempotency_key: String,
}

impl IntoResponse for PayoutError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// POST /api/v1/payouts - accept a payout and drive it through settlement.
async fn create_payout(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreatePayoutRequest>,
) -> Result<impl IntoResponse, PayoutError> {
    let currency = payload.currency.parse::<Currency>().map_err(|_| {
        PayoutError::InvalidArgument(format!("unsupported currency: {}", payload.currency))
    })?;

    let result = state
        .orchestrator
        .process_payout(PayoutRequest {
            merchant_id: payload.merchant_id,
            amount: payload.amount,
            currency,
            idempotency_key: payload.idempotency_key,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /api/v1/payouts/{payout_id} - current status projection.
async fn get_payout(
    State(state): State<Arc<AppState>>,
    Path(payout_id): Path<String>,
) -> Result<impl IntoResponse, PayoutError> {
    let payout_id = payout_id
        .parse::<Uuid>()
        .map_err(|_| PayoutError::InvalidArgument("invalid payout id".to_string()))?;

    let result = state.orchestrator.get_payout(payout_id).await?;
    Ok(Json(result))
}

/// GET /health - liveness plus a database round trip.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.database.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded" })),
            )
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/payouts", post(create_payout))
        .route("/api/v1/payouts/{payout_id}", get(get_payout))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(config: &AppConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_status_mapping() {
        let response = PayoutError::InsufficientFunds.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = PayoutError::IdempotencyConflict.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = PayoutError::NotFound("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = PayoutError::InvalidArgument("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_create_payout_payload_parses() {
        let payload: CreatePayoutRequest = serde_json::from_str(
            r#"{"merchant_id":"m-1","amount":"150.00","currency":"NGN","idempotency_key":"key-1"}"#,
        )
        .unwrap();
        assert_eq!(payload.merchant_id, "m-1");
        assert_eq!(payload.amount, Decimal::new(15_000, 2));
        assert_eq!(payload.currency, "NGN");
    }
}
