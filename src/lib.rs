//! Contended Ledger - mutations under contention
//!
//! Account transfers and inventory adjustments against a shared relational
//! store while many callers race for the same rows. Two strategies side by
//! side:
//! - optimistic: version tokens, conditional writes, conflicts reported
//! - pessimistic: one ordered multi-row lock read under serializable isolation
//!
//! # Modules
//!
//! - [`core_types`] - Id aliases
//! - [`store`] - Store traits, version tokens, lock ordering, SQL dialects, backends
//! - [`account`] - Account rows
//! - [`transfer`] - Transfer rows and the [`TransferOrchestrator`]
//! - [`inventory`] - Products, audit trail and the [`StockOrchestrator`]
//! - [`error`] - [`CoreError`] and [`ValidationError`]
//! - [`retry`] - Caller-side conflict retry
//! - [`config`] / [`logging`] / [`db`] - Process plumbing

// Core types - must be first!
pub mod core_types;

pub mod error;
pub mod store;

// Domain
pub mod account;
pub mod inventory;
pub mod transfer;

pub mod retry;

// Process plumbing
pub mod config;
pub mod db;
pub mod logging;

// Convenient re-exports at crate root
pub use account::Account;
pub use core_types::{AccountId, AuditId, ProductId, TransferId};
pub use error::{CoreError, CoreResult, ValidationError};
pub use inventory::{AuditKind, InventoryAudit, Product, StockOrchestrator, StockReceipt};
pub use retry::{RetryPolicy, with_conflict_retry};
#[cfg(feature = "memory-store")]
pub use store::MemoryStore;
pub use store::{
    Backend, ExpectedVersion, IsolationLevel, LockSet, PgStore, Store, StoreError, Version,
    Versioned,
};
pub use transfer::{Transfer, TransferOrchestrator, TransferReceipt, TransferStatus, TransferStrategy};
