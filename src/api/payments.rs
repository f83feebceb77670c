//! Payment endpoints: create, capture, refund, lookup, webhooks

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

use crate::api::{api_error, ApiError, AppState};
use crate::error::PaymentError;
use crate::ledger::transaction::{Transaction, TransactionStatus};
use crate::services::payment_orchestrator::PaymentIntent;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Accept a JSON number or string as a decimal amount
fn deserialize_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigDecimal, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(serde_json::Number),
        Text(String),
    }

    let raw = Raw::deserialize(deserializer)?;
    let text = match raw {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    };
    BigDecimal::from_str(text.trim())
        .map_err(|e| serde::de::Error::custom(format!("invalid amount: {}", e)))
}

fn parse_transaction_id(raw: &str) -> Result<Uuid, PaymentError> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        PaymentError::validation_field(
            format!("'{}' is not a valid transaction id", raw),
            "transactionId",
        )
    })
}

/// Caller-supplied key, or a server-generated one when the header is absent
fn idempotency_key(headers: &HeaderMap) -> String {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub plan_id: String,
    pub user_id: Option<String>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: BigDecimal,
    pub currency: String,
    pub metadata: Option<JsonValue>,
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    pub transaction_id: Uuid,
    pub gateway_order_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub is_existing: bool,
}

/// POST /payments/create
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), ApiError> {
    let key = idempotency_key(&headers);
    let intent = PaymentIntent {
        plan_id: payload.plan_id,
        user_id: payload.user_id,
        amount: payload.amount,
        currency: payload.currency,
        metadata: payload.metadata.unwrap_or_else(|| serde_json::json!({})),
        provider: payload.provider,
    };

    let outcome = state
        .orchestrator
        .create_payment(intent, key)
        .await
        .map_err(|e| api_error(e, &headers))?;

    let status = if outcome.is_existing {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let transaction = outcome.transaction;
    Ok((
        status,
        Json(CreatePaymentResponse {
            transaction_id: transaction.transaction_id,
            gateway_order_id: transaction.gateway.order_id,
            amount: transaction.amount,
            currency: transaction.currency,
            is_existing: outcome.is_existing,
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePaymentRequest {
    pub transaction_id: String,
    pub gateway_payment_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub id: Uuid,
    pub status: TransactionStatus,
    pub amount: BigDecimal,
}

impl TransactionSummary {
    fn of(transaction: &Transaction) -> Self {
        Self {
            id: transaction.transaction_id,
            status: transaction.status,
            amount: transaction.amount.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CapturePaymentResponse {
    pub transaction: TransactionSummary,
}

/// POST /payments/capture
pub async fn capture_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CapturePaymentRequest>,
) -> Result<Json<CapturePaymentResponse>, ApiError> {
    let transaction_id =
        parse_transaction_id(&payload.transaction_id).map_err(|e| api_error(e, &headers))?;

    let outcome = state
        .orchestrator
        .capture_payment(transaction_id, payload.gateway_payment_id)
        .await
        .map_err(|e| api_error(e, &headers))?;

    Ok(Json(CapturePaymentResponse {
        transaction: TransactionSummary::of(&outcome.transaction),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundPaymentRequest {
    pub transaction_id: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: BigDecimal,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundSummary {
    pub id: String,
    pub amount: BigDecimal,
    /// Transaction status after the refund settled
    pub status: TransactionStatus,
}

#[derive(Debug, Serialize)]
pub struct RefundPaymentResponse {
    pub refund: RefundSummary,
}

/// POST /payments/refund
pub async fn refund_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RefundPaymentRequest>,
) -> Result<Json<RefundPaymentResponse>, ApiError> {
    let transaction_id =
        parse_transaction_id(&payload.transaction_id).map_err(|e| api_error(e, &headers))?;
    let key = idempotency_key(&headers);

    let outcome = state
        .orchestrator
        .refund_payment(transaction_id, payload.amount, payload.reason, key)
        .await
        .map_err(|e| api_error(e, &headers))?;

    Ok(Json(RefundPaymentResponse {
        refund: RefundSummary {
            id: outcome.refund.refund_id,
            amount: outcome.refund.amount,
            status: outcome.transaction.status,
        },
    }))
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction: Transaction,
}

/// GET /payments/transaction/{id}
pub async fn get_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let transaction_id = parse_transaction_id(&id).map_err(|e| api_error(e, &headers))?;

    let transaction = state
        .orchestrator
        .get_transaction(transaction_id)
        .await
        .map_err(|e| api_error(e, &headers))?;

    Ok(Json(TransactionResponse { transaction }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTransactionsQuery {
    pub user_id: String,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub transactions: Vec<Transaction>,
}

/// GET /payments/transactions?userId=&limit=
pub async fn list_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    if query.user_id.trim().is_empty() {
        return Err(api_error(
            PaymentError::validation_field("userId is required", "userId"),
            &headers,
        ));
    }

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let transactions = state
        .orchestrator
        .list_transactions(&query.user_id, limit)
        .await
        .map_err(|e| api_error(e, &headers))?;

    Ok(Json(TransactionListResponse { transactions }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub success: bool,
    pub event_type: String,
}

/// POST /payments/webhook/{provider}
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let header_name = state
        .orchestrator
        .webhook_signature_header(&provider)
        .map_err(|e| api_error(e, &headers))?;

    let signature = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            api_error(
                PaymentError::InvalidSignature {
                    provider: provider.clone(),
                },
                &headers,
            )
        })?;

    let outcome = state
        .orchestrator
        .process_webhook(&provider, &body, signature)
        .await
        .map_err(|e| api_error(e, &headers))?;

    Ok(Json(WebhookResponse {
        success: true,
        event_type: outcome.event_type,
    }))
}
