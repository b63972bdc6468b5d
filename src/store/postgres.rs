//! PostgreSQL store
//!
//! Conditional writes are `UPDATE ... WHERE id = $n AND version = $m
//! RETURNING version`: no returned row means the token was stale. Under READ
//! COMMITTED a concurrent writer blocks on the row lock, then re-evaluates
//! the predicate against the committed row, so exactly one of two racing
//! writers matches.
//!
//! Locking reads come from the configured [`StoreAdapter`], which also
//! decides how a requested isolation level is rendered. With the PostgreSQL
//! dialect a `Serializable` scope runs at READ COMMITTED and is serialized by
//! its `FOR UPDATE` row locks (see [`PostgresDialect`]).
//!
//! ## Error Mapping
//!
//! | SQLSTATE / sqlx error | StoreError |
//! |---|---|
//! | `40P01` deadlock_detected | `Deadlock` |
//! | `55P03` lock_not_available | `LockTimeout` |
//! | `40001` serialization_failure | `SerializationFailure` |
//! | `23xxx` integrity violations | `Constraint` |
//! | PoolTimedOut / PoolClosed / Io / Tls | `Unavailable` |
//! | column/decode errors | `Decode` |
//! | anything else | `Database` |

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::dialect::{PostgresDialect, StoreAdapter};
use super::{
    Backend, IsolationLevel, LockSet, Store, StoreError, StoreTransaction, Version, Versioned,
    VersionedStore, WriteOutcome,
};
use crate::account::Account;
use crate::core_types::{AccountId, ProductId, TransferId};
use crate::inventory::{AuditKind, InventoryAudit, NewInventoryAudit, Product};
use crate::transfer::{NewTransfer, Transfer, TransferStatus, TransferStrategy};

const ACCOUNTS_TABLE: &str = "accounts_tb";
const ACCOUNT_COLUMNS: &[&str] = &["id", "balance", "is_active", "version"];

const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, strategy, status, \
                                failure_reason, created_at, completed_at";

const AUDIT_COLUMNS: &str = "id, product_id, delta, previous_stock, new_stock, kind, created_at";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();
                match db_err.code().as_deref() {
                    Some("40P01") => StoreError::Deadlock(msg),
                    Some("55P03") => StoreError::LockTimeout(msg),
                    Some("40001") => StoreError::SerializationFailure(msg),
                    Some(code) if code.starts_with("23") => StoreError::Constraint(msg),
                    _ => StoreError::Database(msg),
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Unavailable(e.to_string()),
            sqlx::Error::RowNotFound => StoreError::RowNotFound(e.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => StoreError::Decode(e.to_string()),
            _ => StoreError::Database(e.to_string()),
        }
    }
}

/// Store backed by a PostgreSQL connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    adapter: Arc<dyn StoreAdapter>,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self::with_adapter(pool, Arc::new(PostgresDialect), lock_timeout)
    }

    pub fn with_adapter(
        pool: PgPool,
        adapter: Arc<dyn StoreAdapter>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            adapter,
            lock_timeout,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Must run before the first query of the transaction takes a snapshot.
        let effective = self.adapter.effective_isolation(isolation);
        debug!(
            requested = %isolation,
            effective = %effective,
            adapter = self.adapter.name(),
            "Transaction begin"
        );
        sqlx::query(&self.adapter.isolation_statement(isolation))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&self.adapter.lock_timeout_statement(self.lock_timeout))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgTransaction {
            tx,
            adapter: self.adapter.clone(),
            isolation,
        }))
    }
}

/// Open PostgreSQL transaction.
///
/// Dropping the inner `sqlx::Transaction` without commit queues a ROLLBACK on
/// the connection before it returns to the pool.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    adapter: Arc<dyn StoreAdapter>,
    isolation: IsolationLevel,
}

fn row_to_account(row: &PgRow) -> Result<Versioned<Account>, StoreError> {
    Ok(Versioned::new(
        Account {
            id: row.try_get("id")?,
            balance: row.try_get("balance")?,
            is_active: row.try_get("is_active")?,
        },
        Version::from_raw(row.try_get("version")?),
    ))
}

fn row_to_product(row: &PgRow) -> Result<Versioned<Product>, StoreError> {
    Ok(Versioned::new(
        Product {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            stock: row.try_get("stock")?,
        },
        Version::from_raw(row.try_get("version")?),
    ))
}

fn row_to_transfer(row: &PgRow) -> Result<Transfer, StoreError> {
    let status_id: i16 = row.try_get("status")?;
    let status = TransferStatus::from_id(status_id)
        .ok_or_else(|| StoreError::Decode(format!("Invalid transfer status: {}", status_id)))?;

    let strategy_id: i16 = row.try_get("strategy")?;
    let strategy = TransferStrategy::from_id(strategy_id)
        .ok_or_else(|| StoreError::Decode(format!("Invalid strategy: {}", strategy_id)))?;

    Ok(Transfer {
        id: row.try_get("id")?,
        from_account_id: row.try_get("from_account_id")?,
        to_account_id: row.try_get("to_account_id")?,
        amount: row.try_get("amount")?,
        strategy,
        status,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn row_to_audit(row: &PgRow) -> Result<InventoryAudit, StoreError> {
    let kind_id: i16 = row.try_get("kind")?;
    let kind = AuditKind::from_id(kind_id)
        .ok_or_else(|| StoreError::Decode(format!("Invalid audit kind: {}", kind_id)))?;

    Ok(InventoryAudit {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        delta: row.try_get("delta")?,
        previous_stock: row.try_get("previous_stock")?,
        new_stock: row.try_get("new_stock")?,
        kind,
        created_at: row.try_get("created_at")?,
    })
}

fn returned_version(row: Option<PgRow>) -> Result<WriteOutcome, StoreError> {
    match row {
        Some(row) => Ok(WriteOutcome::Written(Version::from_raw(
            row.try_get("version")?,
        ))),
        None => Ok(WriteOutcome::Conflict),
    }
}

#[async_trait]
impl VersionedStore<Account> for PgTransaction {
    async fn read(&mut self, id: i64) -> Result<Option<Versioned<Account>>, StoreError> {
        let row = sqlx::query(
            "SELECT id, balance, is_active, version FROM accounts_tb WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn write_if_version(
        &mut self,
        record: &Account,
        expected: Version,
    ) -> Result<WriteOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE accounts_tb
            SET balance = $1, is_active = $2, version = version + 1, updated_at = NOW()
            WHERE id = $3 AND version = $4
            RETURNING version
            "#,
        )
        .bind(record.balance)
        .bind(record.is_active)
        .bind(record.id)
        .bind(expected.as_raw())
        .fetch_optional(&mut *self.tx)
        .await?;

        returned_version(row)
    }
}

#[async_trait]
impl VersionedStore<Product> for PgTransaction {
    async fn read(&mut self, id: i64) -> Result<Option<Versioned<Product>>, StoreError> {
        let row = sqlx::query("SELECT id, name, stock, version FROM products_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn write_if_version(
        &mut self,
        record: &Product,
        expected: Version,
    ) -> Result<WriteOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE products_tb
            SET name = $1, stock = $2, version = version + 1, updated_at = NOW()
            WHERE id = $3 AND version = $4
            RETURNING version
            "#,
        )
        .bind(&record.name)
        .bind(record.stock)
        .bind(record.id)
        .bind(expected.as_raw())
        .fetch_optional(&mut *self.tx)
        .await?;

        returned_version(row)
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    async fn insert_account(
        &mut self,
        balance: Decimal,
        is_active: bool,
    ) -> Result<Versioned<Account>, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts_tb (balance, is_active, version)
            VALUES ($1, $2, $3)
            RETURNING id, balance, is_active, version
            "#,
        )
        .bind(balance)
        .bind(is_active)
        .bind(Version::INITIAL.as_raw())
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_account(&row)
    }

    async fn lock_accounts(
        &mut self,
        ids: &LockSet<AccountId>,
    ) -> Result<Vec<Versioned<Account>>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let predicate = self.adapter.key_in_predicate("id", 1, ids.len());
        let sql = self.adapter.lock_statement_for(
            ACCOUNTS_TABLE,
            ACCOUNT_COLUMNS,
            &predicate,
            "id ASC",
        );
        debug!(sql = %sql, ids = ?ids.keys(), "Locking accounts");

        let mut query = sqlx::query(&sql);
        for id in ids.keys() {
            query = query.bind(*id);
        }
        let rows = query.fetch_all(&mut *self.tx).await?;

        rows.iter().map(row_to_account).collect()
    }

    async fn overwrite_balance(
        &mut self,
        id: AccountId,
        balance: Decimal,
    ) -> Result<Version, StoreError> {
        let version = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE accounts_tb
            SET balance = $1, version = version + 1, updated_at = NOW()
            WHERE id = $2
            RETURNING version
            "#,
        )
        .bind(balance)
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::RowNotFound(format!("account {}", id)))?;

        Ok(Version::from_raw(version))
    }

    async fn insert_transfer(&mut self, transfer: &NewTransfer) -> Result<Transfer, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO transfers_tb
                (from_account_id, to_account_id, amount, strategy, status, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING {}
            "#,
            TRANSFER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(transfer.from_account_id)
            .bind(transfer.to_account_id)
            .bind(transfer.amount)
            .bind(transfer.strategy.id())
            .bind(TransferStatus::Pending.id())
            .fetch_one(&mut *self.tx)
            .await?;

        row_to_transfer(&row)
    }

    async fn finish_transfer(
        &mut self,
        id: TransferId,
        status: TransferStatus,
        failure_reason: Option<&str>,
    ) -> Result<Transfer, StoreError> {
        // CAS on status: only a Pending row may move to a terminal state
        let sql = format!(
            r#"
            UPDATE transfers_tb
            SET status = $1, failure_reason = $2, completed_at = NOW()
            WHERE id = $3 AND status = $4
            RETURNING {}
            "#,
            TRANSFER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(status.id())
            .bind(failure_reason)
            .bind(id)
            .bind(TransferStatus::Pending.id())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| {
                StoreError::Constraint(format!("transfer {} is not pending", id))
            })?;

        row_to_transfer(&row)
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        let sql = format!("SELECT {} FROM transfers_tb WHERE id = $1", TRANSFER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn insert_product(
        &mut self,
        name: &str,
        stock: i64,
    ) -> Result<Versioned<Product>, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO products_tb (name, stock, version)
            VALUES ($1, $2, $3)
            RETURNING id, name, stock, version
            "#,
        )
        .bind(name)
        .bind(stock)
        .bind(Version::INITIAL.as_raw())
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_product(&row)
    }

    async fn append_audit(
        &mut self,
        entry: &NewInventoryAudit,
    ) -> Result<InventoryAudit, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO inventory_audit_tb
                (product_id, delta, previous_stock, new_stock, kind, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING {}
            "#,
            AUDIT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(entry.product_id)
            .bind(entry.delta)
            .bind(entry.previous_stock)
            .bind(entry.new_stock)
            .bind(entry.kind.id())
            .fetch_one(&mut *self.tx)
            .await?;

        row_to_audit(&row)
    }

    async fn audit_trail(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<InventoryAudit>, StoreError> {
        let sql = format!(
            "SELECT {} FROM inventory_audit_tb WHERE product_id = $1 ORDER BY id ASC",
            AUDIT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(product_id)
            .fetch_all(&mut *self.tx)
            .await?;

        rows.iter().map(row_to_audit).collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
