//! Core types used throughout the system
//!
//! Row identities are plain type aliases over the BIGINT primary keys the
//! store hands out. They are stable for the lifetime of a row.

/// Account ID - primary key of `accounts_tb`.
///
/// # Usage:
/// - Identity for balance reads, locks and conditional writes
/// - Ordering key for [`crate::store::LockSet`]
pub type AccountId = i64;

/// Product ID - primary key of `products_tb`
pub type ProductId = i64;

/// Transfer ID - primary key of `transfers_tb`
pub type TransferId = i64;

/// Audit ID - primary key of `inventory_audit_tb`, ascending in append order
pub type AuditId = i64;
