//! Relational store boundary
//!
//! The orchestrators are written against these traits only. A backend
//! provides:
//! - versioned reads and conditional writes ([`VersionedStore`])
//! - a single multi-row exclusive-lock read over a [`LockSet`]
//! - transactions at a selectable [`IsolationLevel`]
//! - append-only inserts for transfer and audit rows
//!
//! # Rollback contract
//!
//! Dropping a [`StoreTransaction`] without calling `commit` MUST roll it back
//! and release every lock it holds. [`TransactionScope`] relies on this for
//! cancellation safety.

pub mod dialect;
pub mod lock_order;
#[cfg(feature = "memory-store")]
pub mod memory;
pub mod postgres;
pub mod scope;
pub mod versioned;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

use crate::account::Account;
use crate::core_types::{AccountId, ProductId, TransferId};
use crate::inventory::{InventoryAudit, NewInventoryAudit, Product};
use crate::transfer::{NewTransfer, Transfer, TransferStatus};

pub use dialect::{Backend, StoreAdapter, adapter_for};
pub use lock_order::LockSet;
#[cfg(feature = "memory-store")]
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use scope::TransactionScope;
pub use versioned::{ExpectedVersion, Version, Versioned, VersionedRecord, WriteOutcome};

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadCommitted,
    Serializable,
}

impl IsolationLevel {
    /// SQL keyword form
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// Backend faults, classified so callers can tell lock trouble from outages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Lock wait timed out: {0}")]
    LockTimeout(String),

    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Row not found: {0}")]
    RowNotFound(String),

    #[error("Invalid row data: {0}")]
    Decode(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Stable code for logs and API payloads
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::LockTimeout(_) => "LOCK_TIMEOUT",
            StoreError::Deadlock(_) => "DEADLOCK",
            StoreError::SerializationFailure(_) => "SERIALIZATION_FAILURE",
            StoreError::Constraint(_) => "CONSTRAINT_VIOLATION",
            StoreError::RowNotFound(_) => "ROW_NOT_FOUND",
            StoreError::Decode(_) => "INVALID_ROW",
            StoreError::Unavailable(_) => "STORE_UNAVAILABLE",
            StoreError::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// Conditional-write access to one record type inside a transaction.
#[async_trait]
pub trait VersionedStore<R: VersionedRecord>: Send {
    /// Read the row and the version it is currently at.
    async fn read(&mut self, id: i64) -> Result<Option<Versioned<R>>, StoreError>;

    /// Write `record` only if the stored version still equals `expected`.
    ///
    /// On success the stored version is replaced by a new, greater token.
    async fn write_if_version(
        &mut self,
        record: &R,
        expected: Version,
    ) -> Result<WriteOutcome, StoreError>;
}

/// An open backend transaction.
#[async_trait]
pub trait StoreTransaction: VersionedStore<Account> + VersionedStore<Product> + Send {
    /// Isolation level this transaction was opened at
    fn isolation(&self) -> IsolationLevel;

    /// Insert a new account at [`Version::INITIAL`]
    async fn insert_account(
        &mut self,
        balance: Decimal,
        is_active: bool,
    ) -> Result<Versioned<Account>, StoreError>;

    /// Lock every account in `ids` with a single request, in set order, and
    /// return the locked rows. Missing ids are simply absent from the result.
    async fn lock_accounts(
        &mut self,
        ids: &LockSet<AccountId>,
    ) -> Result<Vec<Versioned<Account>>, StoreError>;

    /// Overwrite the balance of an account this transaction has locked.
    ///
    /// No version check: the row lock already excludes other writers. The
    /// version still advances so optimistic readers notice the change.
    async fn overwrite_balance(
        &mut self,
        id: AccountId,
        balance: Decimal,
    ) -> Result<Version, StoreError>;

    /// Insert a transfer row in `Pending` state
    async fn insert_transfer(&mut self, transfer: &NewTransfer) -> Result<Transfer, StoreError>;

    /// Move a pending transfer to a terminal state
    async fn finish_transfer(
        &mut self,
        id: TransferId,
        status: TransferStatus,
        failure_reason: Option<&str>,
    ) -> Result<Transfer, StoreError>;

    async fn get_transfer(&mut self, id: TransferId) -> Result<Option<Transfer>, StoreError>;

    /// Insert a new product at [`Version::INITIAL`]
    async fn insert_product(
        &mut self,
        name: &str,
        stock: i64,
    ) -> Result<Versioned<Product>, StoreError>;

    /// Append one audit row
    async fn append_audit(
        &mut self,
        entry: &NewInventoryAudit,
    ) -> Result<InventoryAudit, StoreError>;

    /// Audit rows of a product, oldest first
    async fn audit_trail(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<InventoryAudit>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Connection-level handle: opens transactions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend this store talks to
    fn backend(&self) -> Backend;

    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_sql() {
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::Serializable.to_string(), "SERIALIZABLE");
    }

    #[test]
    fn test_store_error_codes() {
        assert_eq!(StoreError::Deadlock("x".into()).code(), "DEADLOCK");
        assert_eq!(StoreError::LockTimeout("x".into()).code(), "LOCK_TIMEOUT");
        assert_eq!(
            StoreError::Unavailable("pool closed".into()).to_string(),
            "Store unavailable: pool closed"
        );
    }
}
