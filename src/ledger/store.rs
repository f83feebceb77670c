//! Storage capability interface for the transaction ledger
//!
//! Two implementations exist: an in-memory map for tests and local
//! development, and a durable Postgres store. The backend is selected once
//! at startup; nothing else in the service branches on storage identity.
//!
//! Every mutation is atomic with respect to the ledger invariants: the
//! idempotency-key uniqueness on insert, the forward-only state machine on
//! update, and refund conservation on append_refund.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use super::transaction::{Transaction, TransactionEvent, TransactionStatus};
use crate::error::PaymentError;

/// Which unique key an insert collided on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateField {
    TransactionId,
    IdempotencyKey,
}

impl DuplicateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionId => "transaction_id",
            Self::IdempotencyKey => "idempotency_key",
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("duplicate key: {}", field.as_str())]
    DuplicateKey { field: DuplicateField },

    #[error("transaction not found: {0}")]
    NotFound(Uuid),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("refund of {requested} exceeds refundable remainder {refundable}")]
    RefundExceedsAmount {
        requested: BigDecimal,
        refundable: BigDecimal,
    },

    #[error("refund idempotency key already recorded: {key}")]
    DuplicateRefund { key: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<LedgerError> for PaymentError {
    fn from(err: LedgerError) -> Self {
        match err {
            // Duplicate keys are resolved internally by re-fetching; one
            // reaching this conversion means the resolution was skipped.
            LedgerError::DuplicateKey { field } => PaymentError::Storage {
                message: format!("unresolved duplicate key on {}", field.as_str()),
            },
            LedgerError::DuplicateRefund { key } => PaymentError::Storage {
                message: format!("unresolved duplicate refund key {}", key),
            },
            LedgerError::NotFound(id) => PaymentError::UnknownTransaction {
                transaction_id: id.to_string(),
            },
            LedgerError::InvalidTransition { from, to } => PaymentError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            LedgerError::RefundExceedsAmount {
                requested,
                refundable,
            } => PaymentError::RefundExceedsAmount {
                requested: requested.to_string(),
                refundable: refundable.to_string(),
            },
            LedgerError::Backend(message) => PaymentError::Storage { message },
        }
    }
}

/// A status transition applied as one atomic ledger mutation, together with
/// the identifiers and audit event the transition carries.
#[derive(Debug, Clone)]
pub struct StatusMutation {
    pub to: TransactionStatus,
    /// Provider payment id learned during capture, if any
    pub gateway_payment_id: Option<String>,
    /// Raw provider payload appended to the gateway audit trail, if any
    pub gateway_raw: Option<JsonValue>,
    /// Audit event appended in the same mutation
    pub event: TransactionEvent,
}

/// Durable record of payment lifecycle state
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new transaction. Fails with `DuplicateKey` if the
    /// transaction id or the idempotency key already exists; the insert and
    /// the uniqueness check are a single atomic operation.
    async fn insert(&self, transaction: Transaction) -> Result<Transaction, LedgerError>;

    async fn find_by_id(&self, transaction_id: Uuid) -> Result<Option<Transaction>, LedgerError>;

    async fn find_by_idempotency_key(&self, key: &str)
        -> Result<Option<Transaction>, LedgerError>;

    /// Look up by provider-side order or payment identifier (webhook
    /// reconciliation path).
    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// Most recent transactions for a user, newest first
    async fn list_by_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Transaction>, LedgerError>;

    /// Apply a status transition atomically, rejecting `InvalidTransition`
    /// when the mutation would violate the state machine or move backward.
    async fn update(
        &self,
        transaction_id: Uuid,
        mutation: StatusMutation,
    ) -> Result<Transaction, LedgerError>;

    /// Append a refund and recompute status (`refunded` when cumulative
    /// refunds equal the amount, else `partially_refunded`), atomically.
    /// Rejects `RefundExceedsAmount` when conservation would break and
    /// `DuplicateRefund` when the refund idempotency key is already present.
    async fn append_refund(
        &self,
        transaction_id: Uuid,
        refund: super::transaction::Refund,
    ) -> Result<Transaction, LedgerError>;

    /// Append an audit event without touching status (webhook trail)
    async fn append_event(
        &self,
        transaction_id: Uuid,
        event: TransactionEvent,
    ) -> Result<Transaction, LedgerError>;

    /// Cheap reachability probe for health reporting
    async fn ping(&self) -> Result<(), LedgerError>;

    /// Human-readable backend name for health/startup logs
    fn backend_name(&self) -> &'static str;
}
