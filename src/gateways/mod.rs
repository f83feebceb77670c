//! Payment gateway adapters.
//!
//! Each provider implements [`PaymentGateway`] behind the [`GatewayRegistry`];
//! the rest of the service never branches on provider identity.

pub mod adapter;
pub mod error;
pub mod providers;
pub mod registry;
pub mod types;
pub mod utils;

pub use adapter::PaymentGateway;
pub use error::{into_payment_error, GatewayError, GatewayResult};
pub use registry::GatewayRegistry;
pub use types::{
    CaptureRequest, GatewayCapture, GatewayOrder, GatewayRefund, GatewayWebhookEvent,
    OrderRequest, RefundRequest, WebhookVerification,
};
