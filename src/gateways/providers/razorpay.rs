//! Razorpay gateway adapter.
//!
//! Speaks the Orders, Payments, and Refunds APIs over basic auth. Amounts
//! cross this boundary in minor units (paise for INR). Webhook signatures
//! are hex HMAC-SHA256 of the raw body under the webhook secret; checkout
//! signatures sign `"{order_id}|{payment_id}"` with the key secret.

use crate::gateways::adapter::PaymentGateway;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    CaptureRequest, GatewayCapture, GatewayOrder, GatewayRefund, GatewayWebhookEvent,
    OrderRequest, RefundRequest, WebhookVerification,
};
use crate::gateways::utils::{
    hmac_sha256_hex, secure_eq, verify_hmac_sha256_hex, GatewayHttpClient,
};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    /// Separate secret configured on the Razorpay dashboard; falls back to
    /// the key secret when unset.
    pub webhook_secret: Secret<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl RazorpayConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let key_id =
            std::env::var("RAZORPAY_KEY_ID").map_err(|_| GatewayError::Validation {
                message: "RAZORPAY_KEY_ID environment variable is required".to_string(),
                field: Some("RAZORPAY_KEY_ID".to_string()),
            })?;
        let key_secret =
            std::env::var("RAZORPAY_KEY_SECRET").map_err(|_| GatewayError::Validation {
                message: "RAZORPAY_KEY_SECRET environment variable is required".to_string(),
                field: Some("RAZORPAY_KEY_SECRET".to_string()),
            })?;
        let webhook_secret =
            std::env::var("RAZORPAY_WEBHOOK_SECRET").unwrap_or_else(|_| key_secret.clone());

        Ok(Self {
            key_id,
            key_secret: Secret::new(key_secret),
            webhook_secret: Secret::new(webhook_secret),
            base_url: std::env::var("RAZORPAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
            timeout_secs: std::env::var("RAZORPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
        })
    }
}

pub struct RazorpayGateway {
    config: RazorpayConfig,
    http: GatewayHttpClient,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new("razorpay", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(RazorpayConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> (&str, &str) {
        (
            self.config.key_id.as_str(),
            self.config.key_secret.expose_secret().as_str(),
        )
    }

    /// Convert a decimal major-unit amount to paise.
    fn to_minor_units(amount: &BigDecimal) -> GatewayResult<u64> {
        let minor = (amount * BigDecimal::from(100))
            .with_scale_round(0, bigdecimal::rounding::RoundingMode::HalfUp);
        minor.to_u64().ok_or_else(|| GatewayError::Validation {
            message: format!("amount {} cannot be expressed in minor units", amount),
            field: Some("amount".to_string()),
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(raw: &JsonValue, what: &str) -> GatewayResult<T> {
        serde_json::from_value(raw.clone()).map_err(|e| GatewayError::Provider {
            provider: "razorpay".to_string(),
            message: format!("unexpected {} payload: {}", what, e),
            gateway_code: None,
            retryable: false,
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(&self, request: OrderRequest) -> GatewayResult<GatewayOrder> {
        request.validate()?;

        let body = serde_json::to_value(CreateOrderBody {
            amount: Self::to_minor_units(&request.amount)?,
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
            notes: request.notes.clone(),
        })
        .map_err(|e| GatewayError::Validation {
            message: format!("failed to encode order request: {}", e),
            field: None,
        })?;

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/orders"),
                Some(self.auth()),
                Some(&body),
            )
            .await?;

        let order: RazorpayOrderData = Self::decode(&raw, "order")?;
        info!(
            order_id = %order.id,
            receipt = %request.receipt,
            status = %order.status,
            "Razorpay order created"
        );

        Ok(GatewayOrder {
            order_id: order.id,
            raw,
        })
    }

    async fn capture_payment(&self, request: CaptureRequest) -> GatewayResult<GatewayCapture> {
        let body = serde_json::json!({
            "amount": Self::to_minor_units(&request.amount)?,
            "currency": request.currency,
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/payments/{}/capture", request.payment_id)),
                Some(self.auth()),
                Some(&body),
            )
            .await?;

        let payment: RazorpayPaymentData = Self::decode(&raw, "payment")?;
        info!(
            payment_id = %payment.id,
            status = %payment.status,
            "Razorpay payment captured"
        );

        Ok(GatewayCapture {
            payment_id: payment.id,
            status: payment.status,
            raw,
        })
    }

    async fn refund_payment(&self, request: RefundRequest) -> GatewayResult<GatewayRefund> {
        let amount = match &request.amount {
            Some(amount) => Some(Self::to_minor_units(amount)?),
            None => None,
        };
        let body = serde_json::to_value(RefundBody {
            amount,
            notes: request.notes.clone(),
        })
        .map_err(|e| GatewayError::Validation {
            message: format!("failed to encode refund request: {}", e),
            field: None,
        })?;

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/payments/{}/refund", request.payment_id)),
                Some(self.auth()),
                Some(&body),
            )
            .await?;

        let refund: RazorpayRefundData = Self::decode(&raw, "refund")?;
        info!(
            refund_id = %refund.id,
            payment_id = %request.payment_id,
            status = %refund.status,
            "Razorpay refund created"
        );

        Ok(GatewayRefund {
            refund_id: refund.id,
            status: refund.status,
            raw,
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> GatewayResult<WebhookVerification> {
        let valid = verify_hmac_sha256_hex(
            payload,
            self.config.webhook_secret.expose_secret(),
            signature,
        );
        Ok(WebhookVerification {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid razorpay webhook signature".to_string())
            },
        })
    }

    fn verify_payment_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> GatewayResult<WebhookVerification> {
        let payload = format!("{}|{}", order_id, payment_id);
        let expected = hmac_sha256_hex(
            payload.as_bytes(),
            self.config.key_secret.expose_secret(),
        );
        let valid = match expected {
            Some(expected) => secure_eq(expected.as_bytes(), signature.trim().as_bytes()),
            None => false,
        };
        Ok(WebhookVerification {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid razorpay payment signature".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookVerification {
                message: format!("invalid webhook JSON payload: {}", e),
            })?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let payment_entity = parsed
            .get("payload")
            .and_then(|v| v.get("payment"))
            .and_then(|v| v.get("entity"));
        let payment_reference = payment_entity
            .and_then(|v| v.get("id"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let order_reference = payment_entity
            .and_then(|v| v.get("order_id"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                parsed
                    .get("payload")
                    .and_then(|v| v.get("order"))
                    .and_then(|v| v.get("entity"))
                    .and_then(|v| v.get("id"))
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });

        Ok(GatewayWebhookEvent {
            provider: "razorpay".to_string(),
            event_type,
            order_reference,
            payment_reference,
            payload: parsed,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn name(&self) -> &'static str {
        "razorpay"
    }

    fn webhook_signature_header(&self) -> &'static str {
        "x-razorpay-signature"
    }
}

#[derive(Debug, Serialize)]
struct CreateOrderBody {
    amount: u64,
    currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<JsonValue>,
}

#[derive(Debug, Serialize)]
struct RefundBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrderData {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayPaymentData {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayRefundData {
    id: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn gateway() -> RazorpayGateway {
        RazorpayGateway::new(RazorpayConfig {
            key_id: "rzp_test_123".to_string(),
            key_secret: Secret::new("key_secret".to_string()),
            webhook_secret: Secret::new("whsec_test".to_string()),
            base_url: "https://api.razorpay.com/v1".to_string(),
            timeout_secs: 5,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn minor_unit_conversion() {
        let paise = RazorpayGateway::to_minor_units(&BigDecimal::from(500)).unwrap();
        assert_eq!(paise, 50_000);

        let paise =
            RazorpayGateway::to_minor_units(&BigDecimal::from_str("99.99").unwrap()).unwrap();
        assert_eq!(paise, 9_999);

        assert!(RazorpayGateway::to_minor_units(&BigDecimal::from(-10)).is_err());
    }

    #[test]
    fn webhook_signature_round_trip() {
        let gateway = gateway();
        let payload = br#"{"event":"payment.captured"}"#;
        let signature = hmac_sha256_hex(payload, "whsec_test").unwrap();

        let result = gateway
            .verify_webhook(payload, &signature)
            .expect("verification should not error");
        assert!(result.valid);

        let result = gateway
            .verify_webhook(payload, "tampered")
            .expect("verification should not error");
        assert!(!result.valid);
    }

    #[test]
    fn payment_signature_verification() {
        let gateway = gateway();
        let expected = hmac_sha256_hex(b"order_123|pay_456", "key_secret").unwrap();

        let result = gateway
            .verify_payment_signature("order_123", "pay_456", &expected)
            .expect("verification should not error");
        assert!(result.valid);

        let result = gateway
            .verify_payment_signature("order_123", "pay_456", "forged")
            .expect("verification should not error");
        assert!(!result.valid);
    }

    #[test]
    fn webhook_event_parsing_extracts_references() {
        let gateway = gateway();
        let payload = serde_json::json!({
            "entity": "event",
            "account_id": "acc_1",
            "event": "payment.captured",
            "contains": ["payment"],
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_456",
                        "order_id": "order_123",
                        "status": "captured",
                        "amount": 50000
                    }
                }
            },
            "created_at": 1755900000
        });

        let event = gateway
            .parse_webhook_event(payload.to_string().as_bytes())
            .expect("parse should succeed");
        assert_eq!(event.event_type, "payment.captured");
        assert_eq!(event.payment_reference.as_deref(), Some("pay_456"));
        assert_eq!(event.order_reference.as_deref(), Some("order_123"));
    }

    #[test]
    fn webhook_event_parsing_rejects_invalid_json() {
        let gateway = gateway();
        assert!(gateway.parse_webhook_event(b"not json").is_err());
    }
}
