//! End-to-end payment flow tests against the axum router with an
//! in-memory ledger and a stub gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{body::Body, Router};
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use webhaze_payments::api::{router, AppState};
use webhaze_payments::gateways::{
    CaptureRequest, GatewayCapture, GatewayError, GatewayOrder, GatewayRefund, GatewayRegistry,
    GatewayResult, GatewayWebhookEvent, OrderRequest, PaymentGateway, RefundRequest,
    WebhookVerification,
};
use webhaze_payments::health::HealthChecker;
use webhaze_payments::ledger::{InMemoryLedger, TransactionStore};
use webhaze_payments::services::payment_orchestrator::PaymentOrchestrator;
use webhaze_payments::services::pricing::PlanCatalog;

const VALID_SIGNATURE: &str = "valid-signature";

/// Stub provider that fabricates gateway identifiers and counts calls
struct StubGateway {
    orders: AtomicUsize,
    captures: AtomicUsize,
    refunds: AtomicUsize,
}

impl StubGateway {
    fn new() -> Self {
        Self {
            orders: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
            refunds: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_order(&self, request: OrderRequest) -> GatewayResult<GatewayOrder> {
        request.validate()?;
        let n = self.orders.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayOrder {
            order_id: format!("order_stub_{}", n),
            raw: json!({"receipt": request.receipt}),
        })
    }

    async fn capture_payment(&self, request: CaptureRequest) -> GatewayResult<GatewayCapture> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayCapture {
            payment_id: request.payment_id,
            status: "captured".to_string(),
            raw: json!({}),
        })
    }

    async fn refund_payment(&self, request: RefundRequest) -> GatewayResult<GatewayRefund> {
        let n = self.refunds.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayRefund {
            refund_id: format!("rfnd_stub_{}", n),
            status: "processed".to_string(),
            raw: json!({"payment_id": request.payment_id}),
        })
    }

    fn verify_webhook(
        &self,
        _payload: &[u8],
        signature: &str,
    ) -> GatewayResult<WebhookVerification> {
        Ok(WebhookVerification {
            valid: signature == VALID_SIGNATURE,
            reason: None,
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
        let body: Value =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookVerification {
                message: format!("unparseable webhook body: {}", e),
            })?;
        Ok(GatewayWebhookEvent {
            provider: "stubpay".to_string(),
            event_type: body["event"].as_str().unwrap_or("unknown").to_string(),
            order_reference: body["order_id"].as_str().map(str::to_string),
            payment_reference: body["payment_id"].as_str().map(str::to_string),
            payload: body,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn name(&self) -> &'static str {
        "stubpay"
    }

    fn webhook_signature_header(&self) -> &'static str {
        "x-stubpay-signature"
    }
}

fn test_app() -> (Router, Arc<StubGateway>) {
    let ledger: Arc<dyn TransactionStore> = Arc::new(InMemoryLedger::new());
    let gateway = Arc::new(StubGateway::new());

    let mut registry = GatewayRegistry::new("stubpay");
    registry.register(gateway.clone());

    let orchestrator = Arc::new(PaymentOrchestrator::new(ledger.clone(), Arc::new(registry)));
    let app = router(AppState {
        orchestrator,
        catalog: Arc::new(PlanCatalog::builtin()),
        health_checker: HealthChecker::new(ledger),
    });
    (app, gateway)
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn create_body() -> Value {
    json!({
        "planId": "business",
        "userId": "user_1",
        "amount": "999.00",
        "currency": "INR"
    })
}

#[tokio::test]
async fn create_payment_returns_created_and_persists() {
    let (app, gateway) = test_app();

    let (status, body) = send_json(
        &app,
        "POST",
        "/payments/create",
        Some(create_body()),
        &[("idempotency-key", "key-1")],
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["isExisting"], false);
    assert_eq!(body["currency"], "INR");
    assert!(body["gatewayOrderId"].as_str().unwrap().starts_with("order_stub_"));
    assert_eq!(gateway.orders.load(Ordering::SeqCst), 1);

    let id = body["transactionId"].as_str().unwrap();
    let (status, body) = send_json(
        &app,
        "GET",
        &format!("/payments/transaction/{}", id),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "pending");
    assert_eq!(body["transaction"]["events"][0]["event"], "payment.created");
}

#[tokio::test]
async fn duplicate_idempotency_key_replays_without_new_order() {
    let (app, gateway) = test_app();

    let (first_status, first) = send_json(
        &app,
        "POST",
        "/payments/create",
        Some(create_body()),
        &[("idempotency-key", "dup-key")],
    )
    .await;
    let (second_status, second) = send_json(
        &app,
        "POST",
        "/payments/create",
        Some(create_body()),
        &[("idempotency-key", "dup-key")],
    )
    .await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first["transactionId"], second["transactionId"]);
    assert_eq!(second["isExisting"], true);
    // The replay must not touch the gateway again.
    assert_eq!(gateway.orders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_idempotency_key_creates_distinct_transactions() {
    let (app, _) = test_app();

    let (status_a, a) = send_json(&app, "POST", "/payments/create", Some(create_body()), &[]).await;
    let (status_b, b) = send_json(&app, "POST", "/payments/create", Some(create_body()), &[]).await;

    assert_eq!(status_a, StatusCode::CREATED);
    assert_eq!(status_b, StatusCode::CREATED);
    assert_ne!(a["transactionId"], b["transactionId"]);
}

#[tokio::test]
async fn create_rejects_non_positive_amount() {
    let (app, gateway) = test_app();

    let mut body = create_body();
    body["amount"] = json!("-5");
    let (status, response) = send_json(&app, "POST", "/payments/create", Some(body), &[]).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "VALIDATION_ERROR");
    assert_eq!(gateway.orders.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn capture_is_idempotent_and_never_double_charges() {
    let (app, gateway) = test_app();

    let (_, created) = send_json(
        &app,
        "POST",
        "/payments/create",
        Some(create_body()),
        &[("idempotency-key", "cap-key")],
    )
    .await;
    let id = created["transactionId"].as_str().unwrap();

    let capture_body = json!({"transactionId": id, "gatewayPaymentId": "pay_123"});
    let (status, first) = send_json(
        &app,
        "POST",
        "/payments/capture",
        Some(capture_body.clone()),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["transaction"]["status"], "completed");

    let (status, second) =
        send_json(&app, "POST", "/payments/capture", Some(capture_body), &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["transaction"]["status"], "completed");
    // Second call replays the stored outcome with no gateway capture.
    assert_eq!(gateway.captures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn capture_of_unknown_transaction_is_rejected() {
    let (app, _) = test_app();

    let body = json!({
        "transactionId": uuid::Uuid::new_v4().to_string(),
        "gatewayPaymentId": "pay_123"
    });
    let (status, response) = send_json(&app, "POST", "/payments/capture", Some(body), &[]).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "UNKNOWN_TRANSACTION");
}

#[tokio::test]
async fn refunds_never_exceed_captured_amount() {
    let (app, _) = test_app();

    let (_, created) = send_json(
        &app,
        "POST",
        "/payments/create",
        Some(create_body()),
        &[("idempotency-key", "refund-key")],
    )
    .await;
    let id = created["transactionId"].as_str().unwrap();
    send_json(
        &app,
        "POST",
        "/payments/capture",
        Some(json!({"transactionId": id, "gatewayPaymentId": "pay_900"})),
        &[],
    )
    .await;

    // Partial refund moves the status forward.
    let (status, partial) = send_json(
        &app,
        "POST",
        "/payments/refund",
        Some(json!({"transactionId": id, "amount": "400.00"})),
        &[("idempotency-key", "rf-1")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(partial["refund"]["status"], "partially_refunded");

    // A refund past the remainder is rejected.
    let (status, rejected) = send_json(
        &app,
        "POST",
        "/payments/refund",
        Some(json!({"transactionId": id, "amount": "600.00"})),
        &[("idempotency-key", "rf-2")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected["error"], "REFUND_EXCEEDS_AMOUNT");

    // Refunding exactly the remainder closes the transaction.
    let (status, full) = send_json(
        &app,
        "POST",
        "/payments/refund",
        Some(json!({"transactionId": id, "amount": "599.00"})),
        &[("idempotency-key", "rf-3")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(full["refund"]["status"], "refunded");
}

#[tokio::test]
async fn refund_replays_by_idempotency_key() {
    let (app, gateway) = test_app();

    let (_, created) = send_json(
        &app,
        "POST",
        "/payments/create",
        Some(create_body()),
        &[("idempotency-key", "rr-key")],
    )
    .await;
    let id = created["transactionId"].as_str().unwrap();
    send_json(
        &app,
        "POST",
        "/payments/capture",
        Some(json!({"transactionId": id, "gatewayPaymentId": "pay_901"})),
        &[],
    )
    .await;

    let refund_body = json!({"transactionId": id, "amount": "100.00", "reason": "requested"});
    let (_, first) = send_json(
        &app,
        "POST",
        "/payments/refund",
        Some(refund_body.clone()),
        &[("idempotency-key", "rf-same")],
    )
    .await;
    let (status, second) = send_json(
        &app,
        "POST",
        "/payments/refund",
        Some(refund_body),
        &[("idempotency-key", "rf-same")],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["refund"]["id"], second["refund"]["id"]);
    assert_eq!(gateway.refunds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refund_of_uncaptured_transaction_is_rejected() {
    let (app, gateway) = test_app();

    let (_, created) = send_json(
        &app,
        "POST",
        "/payments/create",
        Some(create_body()),
        &[("idempotency-key", "pend-key")],
    )
    .await;
    let id = created["transactionId"].as_str().unwrap();

    let (status, response) = send_json(
        &app,
        "POST",
        "/payments/refund",
        Some(json!({"transactionId": id, "amount": "100.00"})),
        &[("idempotency-key", "rf-x")],
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "INVALID_TRANSITION");
    assert_eq!(gateway.refunds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn webhook_records_event_without_advancing_status() {
    let (app, _) = test_app();

    let (_, created) = send_json(
        &app,
        "POST",
        "/payments/create",
        Some(create_body()),
        &[("idempotency-key", "wh-key")],
    )
    .await;
    let id = created["transactionId"].as_str().unwrap();
    let order_id = created["gatewayOrderId"].as_str().unwrap();

    let (status, response) = send_json(
        &app,
        "POST",
        "/payments/webhook/stubpay",
        Some(json!({"event": "payment.captured", "order_id": order_id})),
        &[("x-stubpay-signature", VALID_SIGNATURE)],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["success"], true);
    assert_eq!(response["eventType"], "payment.captured");

    // The webhook is audit trail only; status stays pending.
    let (_, fetched) = send_json(
        &app,
        "GET",
        &format!("/payments/transaction/{}", id),
        None,
        &[],
    )
    .await;
    assert_eq!(fetched["transaction"]["status"], "pending");
    let events = fetched["transaction"]["events"].as_array().unwrap();
    assert!(events.iter().any(|e| e["event"] == "webhook.received"));
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let (app, _) = test_app();

    let (status, response) = send_json(
        &app,
        "POST",
        "/payments/webhook/stubpay",
        Some(json!({"event": "payment.captured"})),
        &[("x-stubpay-signature", "forged")],
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn webhook_without_match_is_still_acknowledged() {
    let (app, _) = test_app();

    let (status, response) = send_json(
        &app,
        "POST",
        "/payments/webhook/stubpay",
        Some(json!({"event": "payment.captured", "order_id": "order_elsewhere"})),
        &[("x-stubpay-signature", VALID_SIGNATURE)],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["success"], true);
}

#[tokio::test]
async fn webhook_for_unknown_provider_is_rejected() {
    let (app, _) = test_app();

    let (status, response) = send_json(
        &app,
        "POST",
        "/payments/webhook/nopay",
        Some(json!({"event": "payment.captured"})),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "UNKNOWN_PROVIDER");
}

#[tokio::test]
async fn get_unknown_transaction_returns_404() {
    let (app, _) = test_app();

    let (status, response) = send_json(
        &app,
        "GET",
        &format!("/payments/transaction/{}", uuid::Uuid::new_v4()),
        None,
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "TRANSACTION_NOT_FOUND");
}

#[tokio::test]
async fn list_transactions_filters_by_user() {
    let (app, _) = test_app();

    send_json(
        &app,
        "POST",
        "/payments/create",
        Some(create_body()),
        &[("idempotency-key", "list-1")],
    )
    .await;
    let mut other = create_body();
    other["userId"] = json!("user_2");
    send_json(
        &app,
        "POST",
        "/payments/create",
        Some(other),
        &[("idempotency-key", "list-2")],
    )
    .await;

    let (status, body) = send_json(
        &app,
        "GET",
        "/payments/transactions?userId=user_1",
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let transactions = body["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["userId"], "user_1");
}

#[tokio::test]
async fn concurrent_creates_with_same_key_yield_one_transaction() {
    let (app, gateway) = test_app();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            send_json(
                &app,
                "POST",
                "/payments/create",
                Some(create_body()),
                &[("idempotency-key", "race-key")],
            )
            .await
        }));
    }

    let mut ids = Vec::new();
    let mut fresh = 0;
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert!(status == StatusCode::CREATED || status == StatusCode::OK);
        if status == StatusCode::CREATED {
            fresh += 1;
        }
        ids.push(body["transactionId"].as_str().unwrap().to_string());
    }

    assert_eq!(fresh, 1);
    assert_eq!(ids.iter().collect::<std::collections::HashSet<_>>().len(), 1);
    // Losers may have opened gateway orders before losing the insert race,
    // but exactly one transaction exists.
    assert!(gateway.orders.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn health_endpoint_reports_storage() {
    let (app, _) = test_app();

    let (status, body) = send_json(&app, "GET", "/health", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["storage"]["status"], "up");
}
