use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::signal;
use tracing::{error, info};

use webhaze_payments::api::{self, AppState};
use webhaze_payments::config::{AppConfig, StorageBackend};
use webhaze_payments::gateways::GatewayRegistry;
use webhaze_payments::health::HealthChecker;
use webhaze_payments::ledger::{init_pool, InMemoryLedger, PgLedger, TransactionStore};
use webhaze_payments::logging::init_tracing;
use webhaze_payments::services::payment_orchestrator::PaymentOrchestrator;
use webhaze_payments::services::pricing::PlanCatalog;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = ?config.storage.backend,
        "Starting WebHaze payment service"
    );

    let ledger: Arc<dyn TransactionStore> = match config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory transaction ledger");
            Arc::new(InMemoryLedger::new())
        }
        StorageBackend::Postgres => {
            let pool = init_pool(&config.storage).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                anyhow::anyhow!("database initialization failed: {}", e)
            })?;
            info!(
                max_connections = config.storage.max_connections,
                "Database connection pool initialized"
            );
            Arc::new(PgLedger::new(pool))
        }
    };

    let gateways = Arc::new(GatewayRegistry::from_config(&config.gateways).map_err(|e| {
        error!("Failed to initialize payment gateways: {}", e);
        anyhow::anyhow!("gateway initialization failed: {}", e)
    })?);
    info!(
        default_provider = %config.gateways.default_provider,
        providers = ?config.gateways.enabled_providers,
        "Payment gateways registered"
    );

    let catalog = Arc::new(PlanCatalog::from_config(&config.plans)?);
    let orchestrator = Arc::new(PaymentOrchestrator::new(ledger.clone(), gateways));
    let health_checker = HealthChecker::new(ledger);

    let app = api::router(AppState {
        orchestrator,
        catalog,
        health_checker,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
