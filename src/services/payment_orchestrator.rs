//! Payment orchestrator
//!
//! Stateless coordinator between the gateway adapters and the transaction
//! ledger. Creates provider orders, captures payments, issues refunds,
//! replays idempotent requests, and records verified webhooks. Holds no
//! state of its own; the ledger is the only system of record.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PaymentError;
use crate::gateways::error::{into_payment_error, GatewayError};
use crate::gateways::registry::GatewayRegistry;
use crate::gateways::types::{CaptureRequest, OrderRequest, RefundRequest};
use crate::ledger::store::{DuplicateField, LedgerError, StatusMutation, TransactionStore};
use crate::ledger::transaction::{
    event_names, Refund, Transaction, TransactionEvent, TransactionStatus,
};

/// What a caller wants paid, before any transaction exists
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub plan_id: String,
    pub user_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub metadata: JsonValue,
    /// Provider name; the registry default applies when absent.
    pub provider: Option<String>,
}

impl PaymentIntent {
    fn validate(&self) -> Result<(), PaymentError> {
        if self.plan_id.trim().is_empty() {
            return Err(PaymentError::validation_field("planId is required", "planId"));
        }
        if self.amount <= BigDecimal::from(0) {
            return Err(PaymentError::validation_field(
                "amount must be greater than zero",
                "amount",
            ));
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::validation_field(
                "currency is required",
                "currency",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentOutcome {
    pub transaction: Transaction,
    /// True when the idempotency key matched an earlier transaction and no
    /// gateway call was made.
    pub is_existing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapturePaymentOutcome {
    pub transaction: Transaction,
    /// True when the transaction was already captured and the call was a
    /// no-op.
    pub is_existing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundPaymentOutcome {
    pub transaction: Transaction,
    pub refund: Refund,
    pub is_existing: bool,
}

/// A webhook that passed signature verification
#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub provider: String,
    pub event_type: String,
    /// Transaction the event was attached to, when one matched.
    pub transaction_id: Option<Uuid>,
}

pub struct PaymentOrchestrator {
    ledger: Arc<dyn TransactionStore>,
    gateways: Arc<GatewayRegistry>,
}

impl PaymentOrchestrator {
    pub fn new(ledger: Arc<dyn TransactionStore>, gateways: Arc<GatewayRegistry>) -> Self {
        Self { ledger, gateways }
    }

    /// Create a provider order and a pending transaction, replaying the
    /// stored transaction when the idempotency key has been seen before.
    pub async fn create_payment(
        &self,
        intent: PaymentIntent,
        idempotency_key: String,
    ) -> Result<CreatePaymentOutcome, PaymentError> {
        intent.validate()?;
        if idempotency_key.trim().is_empty() {
            return Err(PaymentError::validation_field(
                "idempotency key must not be blank",
                "Idempotency-Key",
            ));
        }

        if let Some(existing) = self
            .ledger
            .find_by_idempotency_key(&idempotency_key)
            .await
            .map_err(PaymentError::from)?
        {
            info!(
                transaction_id = %existing.transaction_id,
                idempotency_key = %idempotency_key,
                "Replaying idempotent create"
            );
            return Ok(CreatePaymentOutcome {
                transaction: existing,
                is_existing: true,
            });
        }

        let gateway = self.gateways.resolve(intent.provider.as_deref())?;
        let transaction_id = Uuid::new_v4();

        let order = gateway
            .create_order(OrderRequest {
                amount: intent.amount.clone(),
                currency: intent.currency.clone(),
                receipt: transaction_id.to_string(),
                notes: Some(intent.metadata.clone()),
            })
            .await
            .map_err(|e| into_payment_error(gateway.name(), e))?;

        let transaction = Transaction::new_pending(
            transaction_id,
            intent.user_id,
            intent.plan_id,
            intent.amount,
            intent.currency,
            idempotency_key.clone(),
            intent.metadata,
            gateway.name().to_string(),
            order.order_id,
            order.raw,
        );

        match self.ledger.insert(transaction).await {
            Ok(inserted) => {
                info!(
                    transaction_id = %inserted.transaction_id,
                    provider = %inserted.gateway.provider,
                    amount = %inserted.amount,
                    "Payment transaction created"
                );
                Ok(CreatePaymentOutcome {
                    transaction: inserted,
                    is_existing: false,
                })
            }
            // Lost the race to a concurrent request with the same key; the
            // winner's transaction is the answer, not an error.
            Err(LedgerError::DuplicateKey {
                field: DuplicateField::IdempotencyKey,
            }) => {
                let winner = self
                    .ledger
                    .find_by_idempotency_key(&idempotency_key)
                    .await
                    .map_err(PaymentError::from)?
                    .ok_or_else(|| PaymentError::Storage {
                        message: "duplicate idempotency key with no stored transaction".to_string(),
                    })?;
                info!(
                    transaction_id = %winner.transaction_id,
                    idempotency_key = %idempotency_key,
                    "Create lost idempotency race, returning winner"
                );
                Ok(CreatePaymentOutcome {
                    transaction: winner,
                    is_existing: true,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Capture a pending payment. Already-captured transactions are
    /// returned unchanged with no gateway call.
    pub async fn capture_payment(
        &self,
        transaction_id: Uuid,
        gateway_payment_id: String,
    ) -> Result<CapturePaymentOutcome, PaymentError> {
        if gateway_payment_id.trim().is_empty() {
            return Err(PaymentError::validation_field(
                "gatewayPaymentId is required",
                "gatewayPaymentId",
            ));
        }

        let transaction = self
            .ledger
            .find_by_id(transaction_id)
            .await
            .map_err(PaymentError::from)?
            .ok_or_else(|| PaymentError::UnknownTransaction {
                transaction_id: transaction_id.to_string(),
            })?;

        if Self::already_captured(transaction.status) {
            info!(
                transaction_id = %transaction_id,
                status = %transaction.status,
                "Capture is a no-op, transaction already captured"
            );
            return Ok(CapturePaymentOutcome {
                transaction,
                is_existing: true,
            });
        }

        let gateway = self.gateways.get(&transaction.gateway.provider)?;
        let capture = gateway
            .capture_payment(CaptureRequest {
                payment_id: gateway_payment_id.clone(),
                amount: transaction.amount.clone(),
                currency: transaction.currency.clone(),
            })
            .await
            .map_err(|e| match e {
                // A decline is a terminal answer for this attempt; transport
                // failures keep their retryable mapping.
                GatewayError::Declined {
                    provider, message, ..
                } => PaymentError::CaptureFailed { provider, message },
                other => into_payment_error(gateway.name(), other),
            })?;

        let mutation = StatusMutation {
            to: TransactionStatus::Completed,
            gateway_payment_id: Some(capture.payment_id.clone()),
            gateway_raw: Some(capture.raw),
            event: TransactionEvent::new(
                event_names::PAYMENT_CAPTURED,
                serde_json::json!({
                    "gatewayPaymentId": capture.payment_id,
                    "gatewayStatus": capture.status,
                }),
            ),
        };

        match self.ledger.update(transaction_id, mutation).await {
            Ok(updated) => {
                info!(
                    transaction_id = %transaction_id,
                    provider = %updated.gateway.provider,
                    "Payment captured"
                );
                Ok(CapturePaymentOutcome {
                    transaction: updated,
                    is_existing: false,
                })
            }
            // A concurrent capture completed the transaction first.
            Err(LedgerError::InvalidTransition { from, .. }) if Self::already_captured(from) => {
                let current = self
                    .ledger
                    .find_by_id(transaction_id)
                    .await
                    .map_err(PaymentError::from)?
                    .ok_or_else(|| PaymentError::UnknownTransaction {
                        transaction_id: transaction_id.to_string(),
                    })?;
                Ok(CapturePaymentOutcome {
                    transaction: current,
                    is_existing: true,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Refund part or all of a captured payment, replaying by refund
    /// idempotency key.
    pub async fn refund_payment(
        &self,
        transaction_id: Uuid,
        amount: BigDecimal,
        reason: Option<String>,
        idempotency_key: String,
    ) -> Result<RefundPaymentOutcome, PaymentError> {
        if amount <= BigDecimal::from(0) {
            return Err(PaymentError::validation_field(
                "refund amount must be greater than zero",
                "amount",
            ));
        }

        let transaction = self
            .ledger
            .find_by_id(transaction_id)
            .await
            .map_err(PaymentError::from)?
            .ok_or_else(|| PaymentError::UnknownTransaction {
                transaction_id: transaction_id.to_string(),
            })?;

        if let Some(existing) = transaction.refund_by_key(&idempotency_key) {
            info!(
                transaction_id = %transaction_id,
                refund_id = %existing.refund_id,
                "Replaying idempotent refund"
            );
            return Ok(RefundPaymentOutcome {
                refund: existing.clone(),
                transaction,
                is_existing: true,
            });
        }

        // Reject before any gateway call; the ledger re-checks atomically.
        if !transaction.status.is_refundable() {
            let to = if amount == transaction.refundable_remainder() {
                TransactionStatus::Refunded
            } else {
                TransactionStatus::PartiallyRefunded
            };
            return Err(PaymentError::InvalidTransition {
                from: transaction.status.to_string(),
                to: to.to_string(),
            });
        }
        if amount > transaction.refundable_remainder() {
            return Err(PaymentError::RefundExceedsAmount {
                requested: amount.to_string(),
                refundable: transaction.refundable_remainder().to_string(),
            });
        }

        let gateway_payment_id = transaction.gateway.payment_id.clone().ok_or_else(|| {
            PaymentError::validation("transaction has no captured payment to refund")
        })?;

        let gateway = self.gateways.get(&transaction.gateway.provider)?;
        let gateway_refund = gateway
            .refund_payment(RefundRequest {
                payment_id: gateway_payment_id,
                amount: Some(amount.clone()),
                notes: reason.as_ref().map(|r| serde_json::json!({ "reason": r })),
            })
            .await
            .map_err(|e| into_payment_error(gateway.name(), e))?;

        let refund = Refund {
            refund_id: gateway_refund.refund_id,
            amount,
            reason,
            idempotency_key: Some(idempotency_key.clone()),
            processed_at: Utc::now(),
            raw: gateway_refund.raw,
        };

        match self
            .ledger
            .append_refund(transaction_id, refund.clone())
            .await
        {
            Ok(updated) => {
                info!(
                    transaction_id = %transaction_id,
                    refund_id = %refund.refund_id,
                    amount = %refund.amount,
                    status = %updated.status,
                    "Refund recorded"
                );
                Ok(RefundPaymentOutcome {
                    transaction: updated,
                    refund,
                    is_existing: false,
                })
            }
            // A concurrent replay of this key won the append.
            Err(LedgerError::DuplicateRefund { key }) => {
                let current = self
                    .ledger
                    .find_by_id(transaction_id)
                    .await
                    .map_err(PaymentError::from)?
                    .ok_or_else(|| PaymentError::UnknownTransaction {
                        transaction_id: transaction_id.to_string(),
                    })?;
                let existing = current.refund_by_key(&key).cloned().ok_or_else(|| {
                    PaymentError::Storage {
                        message: format!("duplicate refund key {} with no stored refund", key),
                    }
                })?;
                Ok(RefundPaymentOutcome {
                    refund: existing,
                    transaction: current,
                    is_existing: true,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Verify and record an inbound webhook.
    ///
    /// Webhook bodies never advance transaction status. A verified event is
    /// appended to the matching transaction's audit trail for later
    /// reconciliation; capture and refund calls remain the sole drivers of
    /// status transitions.
    pub async fn process_webhook(
        &self,
        provider: &str,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome, PaymentError> {
        let gateway = self.gateways.get(provider)?;

        let verification = gateway
            .verify_webhook(payload, signature)
            .map_err(|e| into_payment_error(gateway.name(), e))?;
        if !verification.valid {
            warn!(
                provider = %provider,
                reason = verification.reason.as_deref().unwrap_or("signature mismatch"),
                "Rejected webhook with invalid signature"
            );
            return Err(PaymentError::InvalidSignature {
                provider: provider.to_string(),
            });
        }

        let event = gateway
            .parse_webhook_event(payload)
            .map_err(|e| into_payment_error(gateway.name(), e))?;

        let matched = self
            .correlate(event.payment_reference.as_deref(), event.order_reference.as_deref())
            .await?;
        let transaction_id = match matched {
            Some(transaction) => {
                let audit = TransactionEvent::new(
                    event_names::WEBHOOK_RECEIVED,
                    serde_json::json!({
                        "provider": event.provider,
                        "eventType": event.event_type,
                        "payload": event.payload,
                    }),
                );
                let updated = self
                    .ledger
                    .append_event(transaction.transaction_id, audit)
                    .await
                    .map_err(PaymentError::from)?;
                info!(
                    provider = %provider,
                    event_type = %event.event_type,
                    transaction_id = %updated.transaction_id,
                    "Webhook recorded on transaction"
                );
                Some(updated.transaction_id)
            }
            None => {
                // Still acknowledged; reconciliation reports pick these up.
                info!(
                    provider = %provider,
                    event_type = %event.event_type,
                    "Webhook verified but matched no transaction"
                );
                None
            }
        };

        Ok(WebhookOutcome {
            provider: provider.to_string(),
            event_type: event.event_type,
            transaction_id,
        })
    }

    pub async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, PaymentError> {
        self.ledger
            .find_by_id(transaction_id)
            .await
            .map_err(PaymentError::from)?
            .ok_or_else(|| PaymentError::TransactionNotFound {
                transaction_id: transaction_id.to_string(),
            })
    }

    /// Most recent transactions for a user, newest first
    pub async fn list_transactions(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Transaction>, PaymentError> {
        self.ledger
            .list_by_user(user_id, limit)
            .await
            .map_err(PaymentError::from)
    }

    /// HTTP header carrying the named provider's webhook signature
    pub fn webhook_signature_header(&self, provider: &str) -> Result<&'static str, PaymentError> {
        Ok(self.gateways.get(provider)?.webhook_signature_header())
    }

    async fn correlate(
        &self,
        payment_reference: Option<&str>,
        order_reference: Option<&str>,
    ) -> Result<Option<Transaction>, PaymentError> {
        for reference in [payment_reference, order_reference].into_iter().flatten() {
            if let Some(transaction) = self
                .ledger
                .find_by_gateway_reference(reference)
                .await
                .map_err(PaymentError::from)?
            {
                return Ok(Some(transaction));
            }
        }
        Ok(None)
    }

    fn already_captured(status: TransactionStatus) -> bool {
        matches!(
            status,
            TransactionStatus::Completed
                | TransactionStatus::PartiallyRefunded
                | TransactionStatus::Refunded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::adapter::PaymentGateway;
    use crate::gateways::error::GatewayResult;
    use crate::gateways::types::{
        GatewayCapture, GatewayOrder, GatewayRefund, GatewayWebhookEvent, WebhookVerification,
    };
    use crate::ledger::memory::InMemoryLedger;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gateway double that counts calls and can decline captures
    struct CountingGateway {
        orders: AtomicUsize,
        captures: AtomicUsize,
        refunds: AtomicUsize,
        decline_capture: bool,
    }

    impl CountingGateway {
        fn new() -> Self {
            Self {
                orders: AtomicUsize::new(0),
                captures: AtomicUsize::new(0),
                refunds: AtomicUsize::new(0),
                decline_capture: false,
            }
        }

        fn declining() -> Self {
            Self {
                decline_capture: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for CountingGateway {
        async fn create_order(&self, request: OrderRequest) -> GatewayResult<GatewayOrder> {
            request.validate()?;
            let n = self.orders.fetch_add(1, Ordering::SeqCst);
            Ok(GatewayOrder {
                order_id: format!("order_{}", n),
                raw: serde_json::json!({"receipt": request.receipt}),
            })
        }

        async fn capture_payment(&self, request: CaptureRequest) -> GatewayResult<GatewayCapture> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            if self.decline_capture {
                return Err(GatewayError::Declined {
                    provider: "test".to_string(),
                    message: "card declined".to_string(),
                    gateway_code: Some("DECLINED".to_string()),
                });
            }
            Ok(GatewayCapture {
                payment_id: request.payment_id,
                status: "captured".to_string(),
                raw: serde_json::json!({"status": "captured"}),
            })
        }

        async fn refund_payment(&self, _request: RefundRequest) -> GatewayResult<GatewayRefund> {
            let n = self.refunds.fetch_add(1, Ordering::SeqCst);
            Ok(GatewayRefund {
                refund_id: format!("rfnd_{}", n),
                status: "processed".to_string(),
                raw: serde_json::json!({}),
            })
        }

        fn verify_webhook(
            &self,
            _payload: &[u8],
            signature: &str,
        ) -> GatewayResult<WebhookVerification> {
            Ok(WebhookVerification {
                valid: signature == "good",
                reason: None,
            })
        }

        fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
            let payload: JsonValue = serde_json::from_slice(payload).unwrap_or_default();
            Ok(GatewayWebhookEvent {
                provider: "test".to_string(),
                event_type: payload
                    .get("event")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                order_reference: payload
                    .get("order_id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                payment_reference: payload
                    .get("payment_id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                payload,
                received_at: Utc::now().to_rfc3339(),
            })
        }

        fn name(&self) -> &'static str {
            "test"
        }

        fn webhook_signature_header(&self) -> &'static str {
            "x-test-signature"
        }
    }

    fn orchestrator_with(gateway: Arc<CountingGateway>) -> PaymentOrchestrator {
        let mut registry = GatewayRegistry::new("test");
        registry.register(gateway);
        PaymentOrchestrator::new(Arc::new(InMemoryLedger::new()), Arc::new(registry))
    }

    fn intent(amount: i64) -> PaymentIntent {
        PaymentIntent {
            plan_id: "starter".to_string(),
            user_id: Some("user_1".to_string()),
            amount: BigDecimal::from(amount),
            currency: "INR".to_string(),
            metadata: serde_json::json!({}),
            provider: None,
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_per_key() {
        let gateway = Arc::new(CountingGateway::new());
        let orchestrator = orchestrator_with(Arc::clone(&gateway));

        let first = orchestrator
            .create_payment(intent(500), "key-1".to_string())
            .await
            .unwrap();
        let second = orchestrator
            .create_payment(intent(500), "key-1".to_string())
            .await
            .unwrap();

        assert!(!first.is_existing);
        assert!(second.is_existing);
        assert_eq!(
            first.transaction.transaction_id,
            second.transaction.transaction_id
        );
        assert_eq!(gateway.orders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_creates_with_one_key_store_one_transaction() {
        let gateway = Arc::new(CountingGateway::new());
        let orchestrator = Arc::new(orchestrator_with(Arc::clone(&gateway)));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    orchestrator
                        .create_payment(intent(500), "racy".to_string())
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        let mut fresh = 0;
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            if !outcome.is_existing {
                fresh += 1;
            }
            ids.push(outcome.transaction.transaction_id);
        }

        assert_eq!(fresh, 1);
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_invalid_intent_before_gateway_call() {
        let gateway = Arc::new(CountingGateway::new());
        let orchestrator = orchestrator_with(Arc::clone(&gateway));

        let err = orchestrator
            .create_payment(intent(0), "key-1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation { .. }));
        assert_eq!(gateway.orders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_capture_is_a_no_op_with_one_gateway_call() {
        let gateway = Arc::new(CountingGateway::new());
        let orchestrator = orchestrator_with(Arc::clone(&gateway));

        let created = orchestrator
            .create_payment(intent(500), "key-1".to_string())
            .await
            .unwrap();
        let id = created.transaction.transaction_id;

        let first = orchestrator
            .capture_payment(id, "pay_1".to_string())
            .await
            .unwrap();
        let second = orchestrator
            .capture_payment(id, "pay_1".to_string())
            .await
            .unwrap();

        assert!(!first.is_existing);
        assert!(second.is_existing);
        assert_eq!(first.transaction.status, TransactionStatus::Completed);
        assert_eq!(second.transaction.status, TransactionStatus::Completed);
        assert_eq!(gateway.captures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declined_capture_leaves_transaction_pending() {
        let gateway = Arc::new(CountingGateway::declining());
        let orchestrator = orchestrator_with(Arc::clone(&gateway));

        let created = orchestrator
            .create_payment(intent(500), "key-1".to_string())
            .await
            .unwrap();
        let id = created.transaction.transaction_id;

        let err = orchestrator
            .capture_payment(id, "pay_1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::CaptureFailed { .. }));

        let after = orchestrator.get_transaction(id).await.unwrap();
        assert_eq!(after.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn refunds_settle_status_and_replay_by_key() {
        let gateway = Arc::new(CountingGateway::new());
        let orchestrator = orchestrator_with(Arc::clone(&gateway));

        let created = orchestrator
            .create_payment(intent(500), "key-1".to_string())
            .await
            .unwrap();
        let id = created.transaction.transaction_id;
        orchestrator
            .capture_payment(id, "pay_1".to_string())
            .await
            .unwrap();

        let partial = orchestrator
            .refund_payment(id, BigDecimal::from(200), None, "r1".to_string())
            .await
            .unwrap();
        assert_eq!(
            partial.transaction.status,
            TransactionStatus::PartiallyRefunded
        );

        let replay = orchestrator
            .refund_payment(id, BigDecimal::from(200), None, "r1".to_string())
            .await
            .unwrap();
        assert!(replay.is_existing);
        assert_eq!(replay.refund.refund_id, partial.refund.refund_id);
        assert_eq!(gateway.refunds.load(Ordering::SeqCst), 1);

        let full = orchestrator
            .refund_payment(id, BigDecimal::from(300), None, "r2".to_string())
            .await
            .unwrap();
        assert_eq!(full.transaction.status, TransactionStatus::Refunded);
    }

    #[tokio::test]
    async fn refund_before_capture_is_an_invalid_transition() {
        let gateway = Arc::new(CountingGateway::new());
        let orchestrator = orchestrator_with(Arc::clone(&gateway));

        let created = orchestrator
            .create_payment(intent(500), "key-1".to_string())
            .await
            .unwrap();

        let err = orchestrator
            .refund_payment(
                created.transaction.transaction_id,
                BigDecimal::from(100),
                None,
                "r1".to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransition { .. }));
        assert_eq!(gateway.refunds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refund_over_remainder_is_rejected_without_gateway_call() {
        let gateway = Arc::new(CountingGateway::new());
        let orchestrator = orchestrator_with(Arc::clone(&gateway));

        let created = orchestrator
            .create_payment(intent(500), "key-1".to_string())
            .await
            .unwrap();
        let id = created.transaction.transaction_id;
        orchestrator
            .capture_payment(id, "pay_1".to_string())
            .await
            .unwrap();

        let err = orchestrator
            .refund_payment(id, BigDecimal::from(600), None, "r1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::RefundExceedsAmount { .. }));
        assert_eq!(gateway.refunds.load(Ordering::SeqCst), 0);

        let err = orchestrator
            .refund_payment(id, BigDecimal::from(0), None, "r2".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation { .. }));
    }

    #[tokio::test]
    async fn webhook_appends_event_without_touching_status() {
        let gateway = Arc::new(CountingGateway::new());
        let orchestrator = orchestrator_with(Arc::clone(&gateway));

        let created = orchestrator
            .create_payment(intent(500), "key-1".to_string())
            .await
            .unwrap();
        let id = created.transaction.transaction_id;
        let order_id = created.transaction.gateway.order_id.clone().unwrap();

        let payload =
            serde_json::json!({"event": "payment.captured", "order_id": order_id}).to_string();
        let outcome = orchestrator
            .process_webhook("test", payload.as_bytes(), "good")
            .await
            .unwrap();
        assert_eq!(outcome.transaction_id, Some(id));

        let after = orchestrator.get_transaction(id).await.unwrap();
        // The webhook claims a capture; the ledger does not believe it.
        assert_eq!(after.status, TransactionStatus::Pending);
        assert_eq!(
            after.events.last().unwrap().event,
            event_names::WEBHOOK_RECEIVED
        );
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_changes_nothing() {
        let gateway = Arc::new(CountingGateway::new());
        let orchestrator = orchestrator_with(Arc::clone(&gateway));

        let created = orchestrator
            .create_payment(intent(500), "key-1".to_string())
            .await
            .unwrap();
        let id = created.transaction.transaction_id;
        let events_before = created.transaction.events.len();

        let err = orchestrator
            .process_webhook("test", b"{\"event\":\"payment.captured\"}", "forged")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature { .. }));

        let after = orchestrator.get_transaction(id).await.unwrap();
        assert_eq!(after.events.len(), events_before);
    }

    #[tokio::test]
    async fn unmatched_webhook_is_acknowledged() {
        let gateway = Arc::new(CountingGateway::new());
        let orchestrator = orchestrator_with(Arc::clone(&gateway));

        let outcome = orchestrator
            .process_webhook(
                "test",
                br#"{"event": "payment.captured", "order_id": "order_elsewhere"}"#,
                "good",
            )
            .await
            .unwrap();
        assert!(outcome.transaction_id.is_none());
        assert_eq!(outcome.event_type, "payment.captured");
    }
}
