//! Transaction model and payment lifecycle state machine
//!
//! One `Transaction` per logical payment intent. Status only ever moves
//! forward; refunds and audit events are embedded, append-only sequences.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Audit event names appended by ledger mutations
pub mod event_names {
    pub const PAYMENT_CREATED: &str = "payment.created";
    pub const PAYMENT_CAPTURED: &str = "payment.captured";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const REFUND_PROCESSED: &str = "refund.processed";
    pub const WEBHOOK_RECEIVED: &str = "webhook.received";
}

/// Payment lifecycle status.
///
/// `pending -> processing -> completed -> partially_refunded -> refunded`,
/// with `failed` reachable from the two pre-capture states. No transition
/// ever moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl TransactionStatus {
    /// Statuses this status may legally move to
    pub fn valid_transitions(&self) -> Vec<TransactionStatus> {
        match self {
            Self::Pending => vec![Self::Processing, Self::Completed, Self::Failed],
            Self::Processing => vec![Self::Completed, Self::Failed],
            Self::Completed => vec![Self::PartiallyRefunded, Self::Refunded],
            // Further partial refunds keep the status until fully refunded.
            Self::PartiallyRefunded => vec![Self::PartiallyRefunded, Self::Refunded],
            Self::Refunded => vec![],
            Self::Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Terminal statuses accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Refunded | Self::Failed)
    }

    /// Statuses from which a refund may be appended
    pub fn is_refundable(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyRefunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn all() -> [TransactionStatus; 6] {
        [
            Self::Pending,
            Self::Processing,
            Self::Completed,
            Self::Failed,
            Self::Refunded,
            Self::PartiallyRefunded,
        ]
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "partially_refunded" => Ok(Self::PartiallyRefunded),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-side identifiers and raw response payloads.
///
/// Raw payloads are stored for audit only and never parsed for business
/// logic beyond the identifiers captured here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayDetails {
    pub provider: String,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    /// Ordered raw provider payloads, one per gateway interaction
    pub raw: Vec<JsonValue>,
}

/// A single refund record in the transaction's refund sub-ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub refund_id: String,
    pub amount: BigDecimal,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub raw: JsonValue,
}

/// Append-only audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub event: String,
    pub at: DateTime<Utc>,
    pub data: JsonValue,
}

impl TransactionEvent {
    pub fn new(event: &str, data: JsonValue) -> Self {
        Self {
            event: event.to_string(),
            at: Utc::now(),
            data,
        }
    }
}

/// One transaction per logical payment intent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub user_id: Option<String>,
    pub plan_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub gateway: GatewayDetails,
    pub refunds: Vec<Refund>,
    pub events: Vec<TransactionEvent>,
    pub idempotency_key: String,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a fresh pending transaction with its creation audit event
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        transaction_id: Uuid,
        user_id: Option<String>,
        plan_id: String,
        amount: BigDecimal,
        currency: String,
        idempotency_key: String,
        metadata: JsonValue,
        provider: String,
        gateway_order_id: String,
        gateway_raw: JsonValue,
    ) -> Self {
        let now = Utc::now();
        let created_event = TransactionEvent::new(
            event_names::PAYMENT_CREATED,
            serde_json::json!({
                "planId": plan_id,
                "amount": amount.to_string(),
                "currency": currency,
                "provider": provider,
                "gatewayOrderId": gateway_order_id,
            }),
        );

        Self {
            transaction_id,
            user_id,
            plan_id,
            amount,
            currency,
            status: TransactionStatus::Pending,
            gateway: GatewayDetails {
                provider,
                order_id: Some(gateway_order_id),
                payment_id: None,
                raw: vec![gateway_raw],
            },
            refunds: Vec::new(),
            events: vec![created_event],
            idempotency_key,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sum of all refund amounts recorded so far
    pub fn refunded_total(&self) -> BigDecimal {
        self.refunds
            .iter()
            .fold(BigDecimal::zero(), |acc, r| acc + &r.amount)
    }

    /// Amount still available to refund
    pub fn refundable_remainder(&self) -> BigDecimal {
        &self.amount - self.refunded_total()
    }

    /// Look up an existing refund by its idempotency key
    pub fn refund_by_key(&self, key: &str) -> Option<&Refund> {
        self.refunds
            .iter()
            .find(|r| r.idempotency_key.as_deref() == Some(key))
    }
}
