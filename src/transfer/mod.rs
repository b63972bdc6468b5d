//! Balance transfers
//!
//! Moves funds between two accounts under one of two strategies:
//!
//! | Strategy | Isolation | Mechanism | Contention outcome |
//! |---|---|---|---|
//! | Optimistic | READ COMMITTED | version check at write | one winner, others `ConcurrencyConflict` |
//! | Pessimistic | SERIALIZABLE | ordered row locks | callers queue, all commit |
//!
//! # Safety Invariants
//!
//! 1. **Conservation**: a completed transfer debits and credits the same
//!    amount in one transaction
//! 2. **Non-negative balances**: funds are checked on the row state the
//!    write is conditioned on (optimistic) or locked (pessimistic)
//! 3. **Ascending lock order**: multi-row locks and writes always follow
//!    [`crate::store::LockSet`] order
//! 4. **One terminal state**: a transfer row leaves `PENDING` once

pub mod orchestrator;
pub mod state;
pub mod types;

#[cfg(all(test, feature = "memory-store"))]
mod integration_tests;

pub use orchestrator::TransferOrchestrator;
pub use state::TransferStatus;
pub use types::{BalanceSnapshot, NewTransfer, Transfer, TransferReceipt, TransferStrategy};
