//! Health check module
//! Provides health status for the service and its storage backend

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::ledger::store::TransactionStore;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// Health checker over the transaction store
#[derive(Clone)]
pub struct HealthChecker {
    ledger: Arc<dyn TransactionStore>,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(ledger: Arc<dyn TransactionStore>) -> Self {
        Self {
            ledger,
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// Probe the storage backend and report per-component status
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let backend = self.ledger.backend_name();

        let start = Instant::now();
        match timeout(self.probe_timeout, self.ledger.ping()).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed().as_millis();
                health_status
                    .checks
                    .insert("storage".to_string(), ComponentHealth::up(Some(elapsed)));
                info!(backend = backend, response_time_ms = elapsed, "Storage health check: OK");
            }
            Ok(Err(e)) => {
                health_status.status = HealthState::Unhealthy;
                health_status.checks.insert(
                    "storage".to_string(),
                    ComponentHealth::down(Some(e.to_string())),
                );
                error!(backend = backend, error = %e, "Storage health check failed");
            }
            Err(_) => {
                health_status.status = HealthState::Unhealthy;
                health_status.checks.insert(
                    "storage".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!(backend = backend, "Storage health check timed out");
            }
        }

        health_status
    }
}
