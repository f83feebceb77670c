//! Transaction ledger: the system of record for payment transactions.
//!
//! The [`TransactionStore`] trait is the storage seam; [`InMemoryLedger`]
//! backs tests and single-node deployments, [`PgLedger`] is the durable
//! backend. Both enforce the same invariants: unique transaction ids and
//! idempotency keys, forward-only status transitions, and refund totals
//! that never exceed the captured amount.

pub mod memory;
pub mod postgres;
pub mod store;
pub mod transaction;

pub use memory::InMemoryLedger;
pub use postgres::{init_pool, PgLedger};
pub use store::{DuplicateField, LedgerError, StatusMutation, TransactionStore};
pub use transaction::{
    event_names, GatewayDetails, Refund, Transaction, TransactionEvent, TransactionStatus,
};
