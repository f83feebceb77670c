//! HTTP surface of the payment service.
//!
//! Routes are grouped by concern: /payments/* for the transaction ledger,
//! /plans/* for the catalog, /health for probes. All handlers share one
//! AppState carrying the orchestrator, plan catalog and health checker.

pub mod payments;
pub mod plans;

use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::error;

use crate::error::{ErrorResponse, PaymentError};
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::logging::{
    request_id_from_headers, request_logging_middleware, UuidRequestId,
};
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::pricing::PlanCatalog;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub catalog: Arc<PlanCatalog>,
    pub health_checker: HealthChecker,
}

/// Error body plus status, with the request id attached for support lookups
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(err: PaymentError, headers: &HeaderMap) -> ApiError {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = ?err, status = %status.as_u16(), "Request failed");
    } else {
        tracing::warn!(error = ?err, status = %status.as_u16(), "Request rejected");
    }

    let mut body = ErrorResponse::from_error(&err);
    if let Some(request_id) = request_id_from_headers(headers) {
        body = body.with_request_id(request_id);
    }
    (status, Json(body))
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health_checker.check_health().await;

    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        Ok(Json(health_status))
    }
}

/// Liveness probe, process-only
async fn liveness() -> &'static str {
    "OK"
}

/// Build the application router with request-id and logging middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route("/payments/create", post(payments::create_payment))
        .route("/payments/capture", post(payments::capture_payment))
        .route("/payments/refund", post(payments::refund_payment))
        .route("/payments/transaction/{id}", get(payments::get_transaction))
        .route("/payments/transactions", get(payments::list_transactions))
        .route("/payments/webhook/{provider}", post(payments::handle_webhook))
        .route("/plans", get(plans::list_plans))
        .route("/plans/{plan_id}", get(plans::get_plan))
        .route("/plans/{plan_id}/calculate", post(plans::calculate_pricing))
        .route("/plans/{plan_id}/emi/{amount}", get(plans::emi_options))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
