use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors surfaced by payment gateway adapters.
///
/// Nothing here is retried automatically. Transport failures and gateway
/// 5xx responses are marked retryable so callers can decide; a declined
/// request never is.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Gateway request timed out: {message}")]
    Timeout { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerification { message: String },

    #[error("Declined by {provider}: {message}")]
    Declined {
        provider: String,
        message: String,
        gateway_code: Option<String>,
    },

    #[error("Gateway error: provider={provider}, message={message}")]
    Provider {
        provider: String,
        message: String,
        gateway_code: Option<String>,
        retryable: bool,
    },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Validation { .. } => false,
            GatewayError::Network { .. } => true,
            GatewayError::Timeout { .. } => true,
            GatewayError::RateLimit { .. } => true,
            GatewayError::WebhookVerification { .. } => false,
            GatewayError::Declined { .. } => false,
            GatewayError::Provider { retryable, .. } => *retryable,
        }
    }
}

/// Fold a gateway failure into the service error taxonomy.
///
/// The provider name travels with the error so responses can say which
/// gateway misbehaved. Capture rejections are handled separately by the
/// orchestrator before this conversion applies.
pub fn into_payment_error(provider: &str, err: GatewayError) -> crate::error::PaymentError {
    use crate::error::PaymentError;

    match err {
        GatewayError::Validation { message, field } => PaymentError::Validation { message, field },
        GatewayError::Network { message } => PaymentError::Gateway {
            provider: provider.to_string(),
            code: None,
            message,
            retryable: true,
        },
        GatewayError::Timeout { .. } => PaymentError::GatewayTimeout {
            provider: provider.to_string(),
        },
        GatewayError::RateLimit { message, .. } => PaymentError::Gateway {
            provider: provider.to_string(),
            code: Some("RATE_LIMITED".to_string()),
            message,
            retryable: true,
        },
        GatewayError::WebhookVerification { .. } => PaymentError::InvalidSignature {
            provider: provider.to_string(),
        },
        GatewayError::Declined {
            provider,
            message,
            gateway_code,
        } => PaymentError::Gateway {
            provider,
            code: gateway_code,
            message,
            retryable: false,
        },
        GatewayError::Provider {
            provider,
            message,
            gateway_code,
            retryable,
        } => PaymentError::Gateway {
            provider,
            code: gateway_code,
            message,
            retryable,
        },
    }
}
