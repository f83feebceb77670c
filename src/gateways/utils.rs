use crate::gateways::error::{GatewayError, GatewayResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Thin JSON client for gateway REST APIs.
///
/// Requests are made exactly once. Failed payment operations must surface
/// to the caller rather than being replayed by the transport, so there is
/// no retry loop here.
#[derive(Clone)]
pub struct GatewayHttpClient {
    provider: &'static str,
    client: Client,
    timeout: Duration,
}

impl GatewayHttpClient {
    pub fn new(provider: &'static str, timeout: Duration) -> GatewayResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| GatewayError::Network {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            provider,
            client,
            timeout,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        basic_auth: Option<(&str, &str)>,
        body: Option<&JsonValue>,
    ) -> GatewayResult<T> {
        let mut request = self.client.request(method, url).timeout(self.timeout);

        if let Some((username, password)) = basic_auth {
            request = request.basic_auth(username, Some(password));
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout {
                    message: format!("request to {} timed out", self.provider),
                }
            } else {
                GatewayError::Network {
                    message: format!("gateway request failed: {}", e),
                }
            }
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            return serde_json::from_str::<T>(&text).map_err(|e| GatewayError::Provider {
                provider: self.provider.to_string(),
                message: format!("invalid gateway JSON response: {}", e),
                gateway_code: None,
                retryable: false,
            });
        }

        let (gateway_code, message) = extract_error_detail(&text, status.as_u16());

        if status.as_u16() == 429 {
            return Err(GatewayError::RateLimit {
                message,
                retry_after_seconds: None,
            });
        }

        if status.is_client_error() {
            warn!(
                provider = self.provider,
                status = %status,
                "Gateway declined request"
            );
            return Err(GatewayError::Declined {
                provider: self.provider.to_string(),
                message,
                gateway_code,
            });
        }

        Err(GatewayError::Provider {
            provider: self.provider.to_string(),
            message,
            gateway_code,
            retryable: status.is_server_error(),
        })
    }
}

/// Pull a code and human-readable description out of a gateway error body,
/// falling back to the raw text. Handles the common `{"error": {...}}`
/// envelope and flat `{"message": ...}` bodies.
fn extract_error_detail(body: &str, status: u16) -> (Option<String>, String) {
    if let Ok(parsed) = serde_json::from_str::<JsonValue>(body) {
        let error = parsed.get("error").unwrap_or(&parsed);
        let code = error
            .get("code")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let description = error
            .get("description")
            .or_else(|| error.get("message"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        if let Some(description) = description {
            return (code, description);
        }
    }
    (None, format!("HTTP {}: {}", status, body))
}

pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> Option<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    match hmac_sha256_hex(payload, secret) {
        Some(computed) => secure_eq(computed.as_bytes(), signature.trim().as_bytes()),
        None => false,
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
