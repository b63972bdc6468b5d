//! Transaction scope
//!
//! Wraps one backend transaction. Every exit path ends in exactly one of:
//! - `commit` (explicit, or `complete` with `Ok`)
//! - `rollback` (explicit, or `complete` with `Err`)
//! - drop, which rolls back through the store's drop contract
//!
//! The drop path covers cancellation: if the future driving an operation is
//! dropped mid-flight, the scope goes with it and nothing is committed.

use std::time::Instant;
use tracing::{debug, error, warn};

use super::{IsolationLevel, Store, StoreError, StoreTransaction};
use crate::error::CoreResult;

pub struct TransactionScope {
    tx: Option<Box<dyn StoreTransaction>>,
    isolation: IsolationLevel,
    operation: &'static str,
    opened_at: Instant,
}

impl TransactionScope {
    /// Open a transaction at `isolation` for `operation` (used in logs)
    pub async fn begin(
        store: &dyn Store,
        isolation: IsolationLevel,
        operation: &'static str,
    ) -> Result<Self, StoreError> {
        let tx = store.begin(isolation).await.inspect_err(|e| {
            error!(operation = operation, error = %e, "Failed to open transaction");
        })?;
        debug!(operation = operation, isolation = %isolation, "Transaction scope opened");
        Ok(Self {
            tx: Some(tx),
            isolation,
            operation,
            opened_at: Instant::now(),
        })
    }

    /// The open transaction
    pub fn tx(&mut self) -> &mut dyn StoreTransaction {
        // Only `commit`/`rollback` take the transaction, and both consume the scope.
        self.tx
            .as_deref_mut()
            .expect("transaction is present until the scope is consumed")
    }

    #[inline]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub async fn commit(mut self) -> Result<(), StoreError> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        match tx.commit().await {
            Ok(()) => {
                debug!(
                    operation = self.operation,
                    elapsed_us = self.opened_at.elapsed().as_micros() as u64,
                    "Transaction committed"
                );
                Ok(())
            }
            Err(e) => {
                error!(operation = self.operation, error = %e, "Commit failed");
                Err(e)
            }
        }
    }

    /// Roll back. A failing rollback is logged, not returned: the backend
    /// discards the transaction either way once the connection drops it.
    pub async fn rollback(mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        match tx.rollback().await {
            Ok(()) => debug!(
                operation = self.operation,
                elapsed_us = self.opened_at.elapsed().as_micros() as u64,
                "Transaction rolled back"
            ),
            Err(e) => warn!(operation = self.operation, error = %e, "Rollback failed"),
        }
    }

    /// Commit on `Ok`, roll back on `Err`, then hand the result back.
    pub async fn complete<T>(self, result: CoreResult<T>) -> CoreResult<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(
                operation = self.operation,
                "Transaction scope dropped while open - rolling back"
            );
        }
    }
}
