//! Business logic: payment orchestration and plan pricing

pub mod payment_orchestrator;
pub mod pricing;

pub use payment_orchestrator::{
    CapturePaymentOutcome, CreatePaymentOutcome, PaymentIntent, PaymentOrchestrator,
    RefundPaymentOutcome, WebhookOutcome,
};
pub use pricing::{BillingCycle, CatalogError, EmiOption, Plan, PlanCatalog, PricingBreakdown};
