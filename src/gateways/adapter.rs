use crate::gateways::error::GatewayResult;
use crate::gateways::types::{
    CaptureRequest, GatewayCapture, GatewayOrder, GatewayRefund, GatewayWebhookEvent,
    OrderRequest, RefundRequest, WebhookVerification,
};
use async_trait::async_trait;

/// Seam between the orchestrator and a concrete payment gateway.
///
/// Implementations own the wire format, authentication, and signature
/// scheme of one provider. They hold no transaction state; the ledger is
/// the only system of record.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open an order with the gateway ahead of checkout.
    async fn create_order(&self, request: OrderRequest) -> GatewayResult<GatewayOrder>;

    /// Capture a previously authorized payment.
    async fn capture_payment(&self, request: CaptureRequest) -> GatewayResult<GatewayCapture>;

    /// Refund a captured payment, partially or in full.
    async fn refund_payment(&self, request: RefundRequest) -> GatewayResult<GatewayRefund>;

    /// Check a webhook body against its signature header.
    fn verify_webhook(&self, payload: &[u8], signature: &str)
        -> GatewayResult<WebhookVerification>;

    /// Check a checkout callback signature binding an order to a payment.
    /// Providers without a callback signature scheme accept unconditionally.
    fn verify_payment_signature(
        &self,
        _order_id: &str,
        _payment_id: &str,
        _signature: &str,
    ) -> GatewayResult<WebhookVerification> {
        Ok(WebhookVerification {
            valid: true,
            reason: None,
        })
    }

    /// Decode a verified webhook body into a correlatable event.
    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent>;

    fn name(&self) -> &'static str;

    /// HTTP header carrying this provider's webhook signature.
    fn webhook_signature_header(&self) -> &'static str;
}
