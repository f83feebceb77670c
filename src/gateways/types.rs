use crate::gateways::error::GatewayError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Request to open an order with the gateway before any money moves.
///
/// Amounts are decimal major units throughout the service; each adapter
/// converts to its gateway's minor-unit representation on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub amount: BigDecimal,
    pub currency: String,
    /// Our transaction reference, echoed back by the gateway.
    pub receipt: String,
    pub notes: Option<JsonValue>,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.amount <= BigDecimal::from(0) {
            return Err(GatewayError::Validation {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(GatewayError::Validation {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub payment_id: String,
    pub amount: BigDecimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub payment_id: String,
    /// `None` requests a full refund of the remaining captured amount.
    pub amount: Option<BigDecimal>,
    pub notes: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub order_id: String,
    pub raw: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCapture {
    pub payment_id: String,
    pub status: String,
    pub raw: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub refund_id: String,
    pub status: String,
    pub raw: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerification {
    pub valid: bool,
    pub reason: Option<String>,
}

/// A gateway webhook decoded far enough to correlate with a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayWebhookEvent {
    pub provider: String,
    pub event_type: String,
    /// Gateway order id, when present in the payload.
    pub order_reference: Option<String>,
    /// Gateway payment id, when present in the payload.
    pub payment_reference: Option<String>,
    pub payload: JsonValue,
    pub received_at: String,
}
