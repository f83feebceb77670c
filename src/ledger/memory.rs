//! In-memory ledger backend
//!
//! Backs tests and local development. A single `RwLock` write guard covers
//! every mutation, so the insert-or-fail uniqueness check, the state-machine
//! guard, and refund conservation are each atomic exactly like the durable
//! backend's single-statement updates.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{DuplicateField, LedgerError, StatusMutation, TransactionStore};
use super::transaction::{event_names, Refund, Transaction, TransactionEvent, TransactionStatus};

#[derive(Default)]
pub struct InMemoryLedger {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    transactions: HashMap<Uuid, Transaction>,
    by_idempotency_key: HashMap<String, Uuid>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryLedger {
    async fn insert(&self, transaction: Transaction) -> Result<Transaction, LedgerError> {
        let mut inner = self.inner.write().await;

        if inner.transactions.contains_key(&transaction.transaction_id) {
            return Err(LedgerError::DuplicateKey {
                field: DuplicateField::TransactionId,
            });
        }
        if inner
            .by_idempotency_key
            .contains_key(&transaction.idempotency_key)
        {
            return Err(LedgerError::DuplicateKey {
                field: DuplicateField::IdempotencyKey,
            });
        }

        inner
            .by_idempotency_key
            .insert(transaction.idempotency_key.clone(), transaction.transaction_id);
        inner
            .transactions
            .insert(transaction.transaction_id, transaction.clone());
        Ok(transaction)
    }

    async fn find_by_id(&self, transaction_id: Uuid) -> Result<Option<Transaction>, LedgerError> {
        let inner = self.inner.read().await;
        Ok(inner.transactions.get(&transaction_id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_idempotency_key
            .get(key)
            .and_then(|id| inner.transactions.get(id))
            .cloned())
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .values()
            .find(|tx| {
                tx.gateway.order_id.as_deref() == Some(reference)
                    || tx.gateway.payment_id.as_deref() == Some(reference)
            })
            .cloned())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let inner = self.inner.read().await;
        let mut matches: Vec<Transaction> = inner
            .transactions
            .values()
            .filter(|tx| tx.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn update(
        &self,
        transaction_id: Uuid,
        mutation: StatusMutation,
    ) -> Result<Transaction, LedgerError> {
        let mut inner = self.inner.write().await;
        let tx = inner
            .transactions
            .get_mut(&transaction_id)
            .ok_or(LedgerError::NotFound(transaction_id))?;

        if !tx.status.can_transition_to(mutation.to) {
            return Err(LedgerError::InvalidTransition {
                from: tx.status,
                to: mutation.to,
            });
        }

        tx.status = mutation.to;
        if let Some(payment_id) = mutation.gateway_payment_id {
            tx.gateway.payment_id = Some(payment_id);
        }
        if let Some(raw) = mutation.gateway_raw {
            tx.gateway.raw.push(raw);
        }
        tx.events.push(mutation.event);
        tx.updated_at = Utc::now();
        Ok(tx.clone())
    }

    async fn append_refund(
        &self,
        transaction_id: Uuid,
        refund: Refund,
    ) -> Result<Transaction, LedgerError> {
        let mut inner = self.inner.write().await;
        let tx = inner
            .transactions
            .get_mut(&transaction_id)
            .ok_or(LedgerError::NotFound(transaction_id))?;

        if let Some(key) = refund.idempotency_key.as_deref() {
            if tx.refund_by_key(key).is_some() {
                return Err(LedgerError::DuplicateRefund {
                    key: key.to_string(),
                });
            }
        }

        let new_total = tx.refunded_total() + &refund.amount;
        let next_status = if new_total == tx.amount {
            TransactionStatus::Refunded
        } else {
            TransactionStatus::PartiallyRefunded
        };

        if !tx.status.is_refundable() {
            return Err(LedgerError::InvalidTransition {
                from: tx.status,
                to: next_status,
            });
        }
        if new_total > tx.amount {
            return Err(LedgerError::RefundExceedsAmount {
                requested: refund.amount.clone(),
                refundable: tx.refundable_remainder(),
            });
        }

        tx.events.push(TransactionEvent::new(
            event_names::REFUND_PROCESSED,
            serde_json::json!({
                "refundId": refund.refund_id,
                "amount": refund.amount.to_string(),
                "reason": refund.reason,
            }),
        ));
        tx.refunds.push(refund);
        tx.status = next_status;
        tx.updated_at = Utc::now();
        Ok(tx.clone())
    }

    async fn append_event(
        &self,
        transaction_id: Uuid,
        event: TransactionEvent,
    ) -> Result<Transaction, LedgerError> {
        let mut inner = self.inner.write().await;
        let tx = inner
            .transactions
            .get_mut(&transaction_id)
            .ok_or(LedgerError::NotFound(transaction_id))?;

        tx.events.push(event);
        tx.updated_at = Utc::now();
        Ok(tx.clone())
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
