use crate::config::GatewayConfig;
use crate::error::PaymentError;
use crate::gateways::adapter::PaymentGateway;
use crate::gateways::error::into_payment_error;
use crate::gateways::providers::RazorpayGateway;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Named gateway adapters resolved per request.
///
/// Adapters are constructed once at startup and shared; the registry only
/// hands out clones of the `Arc`. Callers that do not name a provider get
/// the configured default.
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn PaymentGateway>>,
    default_provider: String,
}

impl GatewayRegistry {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            gateways: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Build the registry from configuration, constructing every enabled
    /// adapter from its own environment.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, PaymentError> {
        let mut registry = Self::new(config.default_provider.clone());
        for name in &config.enabled_providers {
            match name.as_str() {
                "razorpay" => {
                    let gateway = RazorpayGateway::from_env()
                        .map_err(|e| into_payment_error("razorpay", e))?;
                    registry.register(Arc::new(gateway));
                }
                other => {
                    return Err(PaymentError::UnknownProvider {
                        provider: other.to_string(),
                    });
                }
            }
        }
        info!(
            providers = ?registry.provider_names(),
            default = %registry.default_provider,
            "Gateway registry initialized"
        );
        Ok(registry)
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.name().to_string(), gateway);
    }

    pub fn get(&self, provider: &str) -> Result<Arc<dyn PaymentGateway>, PaymentError> {
        self.gateways
            .get(provider)
            .cloned()
            .ok_or_else(|| PaymentError::UnknownProvider {
                provider: provider.to_string(),
            })
    }

    /// Resolve a provider by name, falling back to the default when the
    /// caller does not specify one.
    pub fn resolve(&self, provider: Option<&str>) -> Result<Arc<dyn PaymentGateway>, PaymentError> {
        match provider {
            Some(name) => self.get(name),
            None => self.get(&self.default_provider),
        }
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.gateways.keys().cloned().collect();
        names.sort();
        names
    }
}
