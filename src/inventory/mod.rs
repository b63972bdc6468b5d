//! Inventory
//!
//! Products with a non-negative stock count, adjusted optimistically.
//!
//! # Invariants
//!
//! 1. **Non-negative stock**: an adjustment that would take stock below zero
//!    is rejected and leaves the row untouched
//! 2. **One audit row per mutation**: `new_stock = previous_stock + delta`,
//!    written in the same transaction as the stock change
//! 3. **Append-only trail**: audit rows are never updated or deleted

pub mod models;
pub mod orchestrator;


pub use models::{AuditKind, InventoryAudit, NewInventoryAudit, Product, StockReceipt};
pub use orchestrator::StockOrchestrator;
