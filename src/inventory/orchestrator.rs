//! Stock Orchestrator
//!
//! Applies inventory deltas with optimistic concurrency. A successful
//! adjustment writes the new stock and appends exactly one audit row in the
//! same transaction; any failure rolls both back.

use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::models::{AuditKind, InventoryAudit, NewInventoryAudit, Product, StockReceipt};
use crate::core_types::ProductId;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::store::{
    ExpectedVersion, IsolationLevel, Store, StoreTransaction, TransactionScope, Versioned,
    VersionedStore, WriteOutcome,
};

pub struct StockOrchestrator {
    store: Arc<dyn Store>,
}

impl StockOrchestrator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a product with `initial_stock` units (must not be negative)
    #[instrument(skip(self))]
    pub async fn create_product(
        &self,
        name: &str,
        initial_stock: i64,
    ) -> CoreResult<Versioned<Product>> {
        if initial_stock < 0 {
            return Err(ValidationError::NegativeStock.into());
        }

        let mut scope = TransactionScope::begin(
            self.store.as_ref(),
            IsolationLevel::ReadCommitted,
            "create_product",
        )
        .await?;
        let result = scope
            .tx()
            .insert_product(name, initial_stock)
            .await
            .map_err(CoreError::from);
        let product = scope.complete(result).await?;

        info!(
            product_id = product.record.id,
            stock = product.record.stock,
            "Product created"
        );
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: ProductId) -> CoreResult<Versioned<Product>> {
        let mut scope = TransactionScope::begin(
            self.store.as_ref(),
            IsolationLevel::ReadCommitted,
            "get_product",
        )
        .await?;
        let result = read_product(scope.tx(), product_id).await;
        scope.complete(result).await
    }

    /// Apply `delta` to a product's stock.
    ///
    /// `expected` is the version the caller last saw; `ExpectedVersion::Any`
    /// uses the version read inside this transaction.
    #[instrument(skip(self))]
    pub async fn adjust_stock(
        &self,
        product_id: ProductId,
        delta: i64,
        kind: AuditKind,
        expected: ExpectedVersion,
    ) -> CoreResult<StockReceipt> {
        if delta == 0 {
            return Err(ValidationError::ZeroDelta.into());
        }

        let mut scope = TransactionScope::begin(
            self.store.as_ref(),
            IsolationLevel::ReadCommitted,
            "adjust_stock",
        )
        .await?;
        let result = apply_adjustment(scope.tx(), product_id, delta, kind, expected).await;

        match scope.complete(result).await {
            Ok(receipt) => {
                info!(
                    product_id = product_id,
                    delta = delta,
                    previous_stock = receipt.previous_stock,
                    new_stock = receipt.new_stock,
                    version = %receipt.version,
                    "Stock adjusted"
                );
                Ok(receipt)
            }
            Err(e @ CoreError::TransactionFailure(_)) => {
                error!(product_id = product_id, error = %e, "Stock adjustment failed");
                Err(e)
            }
            Err(e) => {
                warn!(
                    product_id = product_id,
                    delta = delta,
                    code = e.code(),
                    "Stock adjustment rejected: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// Audit rows of a product, oldest first
    #[instrument(skip(self))]
    pub async fn audit_trail(&self, product_id: ProductId) -> CoreResult<Vec<InventoryAudit>> {
        let mut scope = TransactionScope::begin(
            self.store.as_ref(),
            IsolationLevel::ReadCommitted,
            "audit_trail",
        )
        .await?;
        let result = load_trail(scope.tx(), product_id).await;
        scope.complete(result).await
    }
}

async fn read_product(
    tx: &mut dyn StoreTransaction,
    product_id: ProductId,
) -> CoreResult<Versioned<Product>> {
    VersionedStore::<Product>::read(tx, product_id)
        .await?
        .ok_or(CoreError::ProductNotFound(product_id))
}

async fn load_trail(
    tx: &mut dyn StoreTransaction,
    product_id: ProductId,
) -> CoreResult<Vec<InventoryAudit>> {
    read_product(&mut *tx, product_id).await?;
    Ok(tx.audit_trail(product_id).await?)
}

async fn apply_adjustment(
    tx: &mut dyn StoreTransaction,
    product_id: ProductId,
    delta: i64,
    kind: AuditKind,
    expected: ExpectedVersion,
) -> CoreResult<StockReceipt> {
    let current = read_product(&mut *tx, product_id).await?;
    let previous_stock = current.record.stock;

    let new_stock = current
        .record
        .stock_after(delta)
        .ok_or(CoreError::InsufficientStock {
            product_id,
            available: previous_stock,
            delta,
        })?;

    let mut updated = current.record.clone();
    updated.stock = new_stock;
    let token = expected.resolve(current.version);

    let version = match VersionedStore::<Product>::write_if_version(&mut *tx, &updated, token)
        .await?
    {
        WriteOutcome::Written(version) => version,
        WriteOutcome::Conflict => return Err(CoreError::conflict::<Product>(product_id)),
    };

    let audit = tx
        .append_audit(&NewInventoryAudit {
            product_id,
            delta,
            previous_stock,
            new_stock,
            kind,
        })
        .await?;

    Ok(StockReceipt {
        product_id,
        previous_stock,
        new_stock,
        version,
        audit,
    })
}
