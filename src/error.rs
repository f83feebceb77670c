//! Unified error handling for the WebHaze payment service
//!
//! One domain error type with HTTP status mapping, machine-readable error
//! codes, and a standardized JSON response body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "UNKNOWN_TRANSACTION")]
    UnknownTransaction,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "PLAN_NOT_FOUND")]
    PlanNotFound,
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "REFUND_EXCEEDS_AMOUNT")]
    RefundExceedsAmount,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "UNKNOWN_PROVIDER")]
    UnknownProvider,
    #[serde(rename = "CAPTURE_FAILED")]
    CaptureFailed,
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "GATEWAY_TIMEOUT")]
    GatewayTimeout,
    #[serde(rename = "STORAGE_ERROR")]
    StorageError,
}

/// Application-wide payment error taxonomy.
///
/// Validation and ledger-invariant violations map to 4xx and are never
/// silently swallowed; gateway-side failures map to 5xx (or 400 for a
/// rejected capture) and are returned to the caller for explicit retry
/// decisions. This service performs no automatic retries of its own.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("unknown transaction: {transaction_id}")]
    UnknownTransaction { transaction_id: String },

    #[error("transaction not found: {transaction_id}")]
    TransactionNotFound { transaction_id: String },

    #[error("plan not found: {plan}")]
    PlanNotFound { plan: String },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("refund of {requested} exceeds refundable remainder {refundable}")]
    RefundExceedsAmount {
        requested: String,
        refundable: String,
    },

    #[error("invalid webhook signature for provider {provider}")]
    InvalidSignature { provider: String },

    #[error("unknown payment provider: {provider}")]
    UnknownProvider { provider: String },

    #[error("capture rejected by {provider}: {message}")]
    CaptureFailed { provider: String, message: String },

    #[error("gateway error from {provider}: {message}")]
    Gateway {
        provider: String,
        code: Option<String>,
        message: String,
        retryable: bool,
    },

    #[error("gateway request to {provider} timed out")]
    GatewayTimeout { provider: String },

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl PaymentError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownTransaction { .. } => StatusCode::BAD_REQUEST,
            Self::TransactionNotFound { .. } => StatusCode::NOT_FOUND,
            Self::PlanNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            Self::RefundExceedsAmount { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidSignature { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownProvider { .. } => StatusCode::BAD_REQUEST,
            Self::CaptureFailed { .. } => StatusCode::BAD_REQUEST,
            Self::Gateway { .. } => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::UnknownTransaction { .. } => ErrorCode::UnknownTransaction,
            Self::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
            Self::PlanNotFound { .. } => ErrorCode::PlanNotFound,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::RefundExceedsAmount { .. } => ErrorCode::RefundExceedsAmount,
            Self::InvalidSignature { .. } => ErrorCode::InvalidSignature,
            Self::UnknownProvider { .. } => ErrorCode::UnknownProvider,
            Self::CaptureFailed { .. } => ErrorCode::CaptureFailed,
            Self::Gateway { .. } => ErrorCode::GatewayError,
            Self::GatewayTimeout { .. } => ErrorCode::GatewayTimeout,
            Self::Storage { .. } => ErrorCode::StorageError,
        }
    }

    /// Get user-friendly error message (safe to return to clients)
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message, field } => match field {
                Some(field) => format!("Validation failed for '{}': {}", field, message),
                None => format!("Validation failed: {}", message),
            },
            Self::UnknownTransaction { transaction_id } => {
                format!("Transaction '{}' does not exist", transaction_id)
            }
            Self::TransactionNotFound { transaction_id } => {
                format!("Transaction '{}' was not found", transaction_id)
            }
            Self::PlanNotFound { plan } => format!("Plan '{}' was not found", plan),
            Self::InvalidTransition { from, to } => {
                format!("Transaction cannot move from '{}' to '{}'", from, to)
            }
            Self::RefundExceedsAmount {
                requested,
                refundable,
            } => format!(
                "Refund of {} exceeds the refundable remainder of {}",
                requested, refundable
            ),
            Self::InvalidSignature { .. } => "Webhook signature verification failed".to_string(),
            Self::UnknownProvider { provider } => {
                format!("Payment provider '{}' is not configured", provider)
            }
            Self::CaptureFailed { provider, message } => {
                format!("Payment capture was rejected by {}: {}", provider, message)
            }
            Self::Gateway { provider, .. } => format!(
                "The payment provider {} could not process the request. Please try again.",
                provider
            ),
            Self::GatewayTimeout { provider } => format!(
                "The payment provider {} did not respond in time. Retry with the same idempotency key.",
                provider
            ),
            Self::Storage { .. } => {
                "An internal storage error occurred. Please try again later.".to_string()
            }
        }
    }

    /// Whether the client may safely retry the same request
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway { retryable, .. } => *retryable,
            Self::GatewayTimeout { .. } => true,
            Self::Storage { .. } => true,
            _ => false,
        }
    }
}

/// Standardized error response structure returned for all error cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    /// Optional additional details (e.g., the offending field)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_error(error: &PaymentError) -> Self {
        let details = match error {
            PaymentError::Validation {
                field: Some(field), ..
            } => Some(serde_json::json!({ "field": field })),
            PaymentError::Gateway {
                code: Some(code), ..
            } => Some(serde_json::json!({ "provider_code": code })),
            _ => None,
        };

        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: None,
            timestamp: Utc::now().to_rfc3339(),
            details,
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = ?self,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let body = ErrorResponse::from_error(&self);
        (status_code, Json(body)).into_response()
    }
}
