//! Durable Postgres ledger backend
//!
//! Uniqueness, state-machine, and refund-conservation invariants are all
//! enforced inside single guarded SQL statements, so concurrent requests
//! racing on one idempotency key or one transaction id cannot interleave
//! between a check and a write.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use super::store::{DuplicateField, LedgerError, StatusMutation, TransactionStore};
use super::transaction::{
    event_names, GatewayDetails, Refund, Transaction, TransactionEvent, TransactionStatus,
};
use crate::config::StorageConfig;

const COLUMNS: &str = "transaction_id, user_id, plan_id, amount, currency, status, provider, \
                       gateway_order_id, gateway_payment_id, gateway_raw, refunds, events, \
                       idempotency_key, metadata, created_at, updated_at";

/// Initialize the connection pool and apply embedded migrations
pub async fn init_pool(config: &StorageConfig) -> Result<PgPool, LedgerError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Initializing database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            from_sqlx(e)
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| LedgerError::Backend(format!("migration failed: {}", e)))?;

    info!("Database pool initialized");
    Ok(pool)
}

fn from_sqlx(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(ref db_err) = err {
        // 23505: unique_violation
        if db_err.code().as_deref() == Some("23505") {
            let field = match db_err.constraint() {
                Some("transactions_pkey") => DuplicateField::TransactionId,
                _ => DuplicateField::IdempotencyKey,
            };
            return LedgerError::DuplicateKey { field };
        }
    }
    LedgerError::Backend(err.to_string())
}

/// Statuses from which a transition into `to` is legal, as stored strings
fn allowed_from_statuses(to: TransactionStatus) -> Vec<String> {
    TransactionStatus::all()
        .iter()
        .filter(|from| from.can_transition_to(to))
        .map(|from| from.as_str().to_string())
        .collect()
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    transaction_id: Uuid,
    user_id: Option<String>,
    plan_id: String,
    amount: BigDecimal,
    currency: String,
    status: String,
    provider: String,
    gateway_order_id: Option<String>,
    gateway_payment_id: Option<String>,
    gateway_raw: JsonValue,
    refunds: JsonValue,
    events: JsonValue,
    idempotency_key: String,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_transaction(self) -> Result<Transaction, LedgerError> {
        let status: TransactionStatus = self.status.parse().map_err(LedgerError::Backend)?;
        let raw: Vec<JsonValue> = serde_json::from_value(self.gateway_raw)
            .map_err(|e| LedgerError::Backend(format!("corrupt gateway_raw column: {}", e)))?;
        let refunds: Vec<Refund> = serde_json::from_value(self.refunds)
            .map_err(|e| LedgerError::Backend(format!("corrupt refunds column: {}", e)))?;
        let events: Vec<TransactionEvent> = serde_json::from_value(self.events)
            .map_err(|e| LedgerError::Backend(format!("corrupt events column: {}", e)))?;

        Ok(Transaction {
            transaction_id: self.transaction_id,
            user_id: self.user_id,
            plan_id: self.plan_id,
            amount: self.amount,
            currency: self.currency,
            status,
            gateway: GatewayDetails {
                provider: self.provider,
                order_id: self.gateway_order_id,
                payment_id: self.gateway_payment_id,
                raw,
            },
            refunds,
            events,
            idempotency_key: self.idempotency_key,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<JsonValue, LedgerError> {
    serde_json::to_value(value)
        .map_err(|e| LedgerError::Backend(format!("failed to encode {}: {}", what, e)))
}

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_row(&self, transaction_id: Uuid) -> Result<Option<Transaction>, LedgerError> {
        let query = format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1",
            COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.map(TransactionRow::into_transaction).transpose()
    }
}

#[async_trait]
impl TransactionStore for PgLedger {
    async fn insert(&self, transaction: Transaction) -> Result<Transaction, LedgerError> {
        let query = format!(
            "INSERT INTO transactions \
             (transaction_id, user_id, plan_id, amount, currency, status, provider, \
              gateway_order_id, gateway_payment_id, gateway_raw, refunds, refunded_total, \
              events, idempotency_key, metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {}",
            COLUMNS
        );

        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(transaction.transaction_id)
            .bind(&transaction.user_id)
            .bind(&transaction.plan_id)
            .bind(&transaction.amount)
            .bind(&transaction.currency)
            .bind(transaction.status.as_str())
            .bind(&transaction.gateway.provider)
            .bind(&transaction.gateway.order_id)
            .bind(&transaction.gateway.payment_id)
            .bind(to_json(&transaction.gateway.raw, "gateway_raw")?)
            .bind(to_json(&transaction.refunds, "refunds")?)
            .bind(transaction.refunded_total())
            .bind(to_json(&transaction.events, "events")?)
            .bind(&transaction.idempotency_key)
            .bind(&transaction.metadata)
            .bind(transaction.created_at)
            .bind(transaction.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(from_sqlx)?;

        row.into_transaction()
    }

    async fn find_by_id(&self, transaction_id: Uuid) -> Result<Option<Transaction>, LedgerError> {
        self.fetch_row(transaction_id).await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let query = format!(
            "SELECT {} FROM transactions WHERE idempotency_key = $1",
            COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.map(TransactionRow::into_transaction).transpose()
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let query = format!(
            "SELECT {} FROM transactions \
             WHERE gateway_order_id = $1 OR gateway_payment_id = $1 \
             LIMIT 1",
            COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.map(TransactionRow::into_transaction).transpose()
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let query = format!(
            "SELECT {} FROM transactions \
             WHERE user_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2",
            COLUMNS
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        rows.into_iter()
            .map(TransactionRow::into_transaction)
            .collect()
    }

    async fn update(
        &self,
        transaction_id: Uuid,
        mutation: StatusMutation,
    ) -> Result<Transaction, LedgerError> {
        // The status guard makes the transition atomic: a row is updated
        // only while its current status may legally move to the target.
        let query = format!(
            "UPDATE transactions \
             SET status = $2, \
                 gateway_payment_id = COALESCE($3, gateway_payment_id), \
                 gateway_raw = CASE WHEN $4::jsonb IS NULL THEN gateway_raw \
                                    ELSE gateway_raw || jsonb_build_array($4::jsonb) END, \
                 events = events || jsonb_build_array($5::jsonb), \
                 updated_at = NOW() \
             WHERE transaction_id = $1 AND status = ANY($6) \
             RETURNING {}",
            COLUMNS
        );

        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(transaction_id)
            .bind(mutation.to.as_str())
            .bind(&mutation.gateway_payment_id)
            .bind(&mutation.gateway_raw)
            .bind(to_json(&mutation.event, "event")?)
            .bind(allowed_from_statuses(mutation.to))
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;

        match row {
            Some(row) => row.into_transaction(),
            None => match self.fetch_row(transaction_id).await? {
                Some(current) => Err(LedgerError::InvalidTransition {
                    from: current.status,
                    to: mutation.to,
                }),
                None => Err(LedgerError::NotFound(transaction_id)),
            },
        }
    }

    async fn append_refund(
        &self,
        transaction_id: Uuid,
        refund: Refund,
    ) -> Result<Transaction, LedgerError> {
        let event = TransactionEvent::new(
            event_names::REFUND_PROCESSED,
            serde_json::json!({
                "refundId": refund.refund_id,
                "amount": refund.amount.to_string(),
                "reason": refund.reason,
            }),
        );

        // One statement enforces refundable status, conservation, and
        // per-refund idempotency, and settles the resulting status.
        let query = format!(
            "UPDATE transactions \
             SET refunds = refunds || jsonb_build_array($2::jsonb), \
                 refunded_total = refunded_total + $3, \
                 status = CASE WHEN refunded_total + $3 = amount THEN 'refunded' \
                               ELSE 'partially_refunded' END, \
                 events = events || jsonb_build_array($4::jsonb), \
                 updated_at = NOW() \
             WHERE transaction_id = $1 \
               AND status IN ('completed', 'partially_refunded') \
               AND refunded_total + $3 <= amount \
               AND ($5::text IS NULL OR NOT (refunds @> \
                    jsonb_build_array(jsonb_build_object('idempotencyKey', $5::text)))) \
             RETURNING {}",
            COLUMNS
        );

        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(transaction_id)
            .bind(to_json(&refund, "refund")?)
            .bind(&refund.amount)
            .bind(to_json(&event, "event")?)
            .bind(&refund.idempotency_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;

        if let Some(row) = row {
            return row.into_transaction();
        }

        // Guard failed; diagnose against the current row.
        let current = self
            .fetch_row(transaction_id)
            .await?
            .ok_or(LedgerError::NotFound(transaction_id))?;

        if let Some(key) = refund.idempotency_key.as_deref() {
            if current.refund_by_key(key).is_some() {
                return Err(LedgerError::DuplicateRefund {
                    key: key.to_string(),
                });
            }
        }
        if !current.status.is_refundable() {
            let to = if current.refunded_total() + &refund.amount == current.amount {
                TransactionStatus::Refunded
            } else {
                TransactionStatus::PartiallyRefunded
            };
            return Err(LedgerError::InvalidTransition {
                from: current.status,
                to,
            });
        }
        if current.refunded_total() + &refund.amount > current.amount {
            return Err(LedgerError::RefundExceedsAmount {
                requested: refund.amount,
                refundable: current.refundable_remainder(),
            });
        }
        Err(LedgerError::Backend(
            "refund conflicted with a concurrent update".to_string(),
        ))
    }

    async fn append_event(
        &self,
        transaction_id: Uuid,
        event: TransactionEvent,
    ) -> Result<Transaction, LedgerError> {
        let query = format!(
            "UPDATE transactions \
             SET events = events || jsonb_build_array($2::jsonb), updated_at = NOW() \
             WHERE transaction_id = $1 \
             RETURNING {}",
            COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(transaction_id)
            .bind(to_json(&event, "event")?)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;

        match row {
            Some(row) => row.into_transaction(),
            None => Err(LedgerError::NotFound(transaction_id)),
        }
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_from_statuses_mirror_the_state_machine() {
        let to_completed = allowed_from_statuses(TransactionStatus::Completed);
        assert!(to_completed.contains(&"pending".to_string()));
        assert!(to_completed.contains(&"processing".to_string()));
        assert!(!to_completed.contains(&"completed".to_string()));
        assert!(!to_completed.contains(&"refunded".to_string()));

        let to_pending = allowed_from_statuses(TransactionStatus::Pending);
        assert!(to_pending.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires database running
    async fn insert_and_capture_round_trip() {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/webhaze_test".to_string());
        let config = StorageConfig {
            backend: crate::config::StorageBackend::Postgres,
            database_url: url,
            max_connections: 5,
            min_connections: 1,
            connection_timeout_secs: 5,
        };
        let pool = init_pool(&config).await.expect("pool");
        let store = PgLedger::new(pool);

        let tx = Transaction::new_pending(
            Uuid::new_v4(),
            Some("user_pg".to_string()),
            "starter".to_string(),
            BigDecimal::from(500),
            "INR".to_string(),
            Uuid::new_v4().to_string(),
            serde_json::json!({}),
            "razorpay".to_string(),
            format!("order_{}", Uuid::new_v4()),
            serde_json::json!({}),
        );
        let inserted = store.insert(tx.clone()).await.expect("insert");
        assert_eq!(inserted.status, TransactionStatus::Pending);

        let captured = store
            .update(
                inserted.transaction_id,
                StatusMutation {
                    to: TransactionStatus::Completed,
                    gateway_payment_id: Some("pay_pg".to_string()),
                    gateway_raw: None,
                    event: TransactionEvent::new(
                        event_names::PAYMENT_CAPTURED,
                        serde_json::json!({}),
                    ),
                },
            )
            .await
            .expect("capture");
        assert_eq!(captured.status, TransactionStatus::Completed);
        assert_eq!(captured.events.len(), 2);
    }
}
