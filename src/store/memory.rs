//! In-process store
//!
//! A store that behaves like a row-locking relational backend, for tests and
//! local demos:
//! - exclusive row locks (one tokio mutex per row) held until commit/rollback,
//!   with a bounded wait that reports [`StoreError::LockTimeout`]
//! - read-committed visibility: a transaction sees committed rows plus its
//!   own pending writes
//! - conditional writes take the row lock, then compare versions against the
//!   latest committed state
//! - commit applies pending writes atomically; rollback or drop discards them
//!
//! Primary keys come from sequences that are not rolled back, like SQL
//! sequences.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Barrier, Mutex as RowMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{
    Backend, IsolationLevel, LockSet, Store, StoreError, StoreTransaction, Version, Versioned,
    VersionedRecord, VersionedStore, WriteOutcome,
};
use crate::account::Account;
use crate::core_types::{AccountId, AuditId, ProductId, TransferId};
use crate::inventory::{InventoryAudit, NewInventoryAudit, Product};
use crate::transfer::{NewTransfer, Transfer, TransferStatus};

/// Default bound on a single lock wait
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Table {
    Accounts,
    Products,
}

type RowKey = (Table, i64);

#[derive(Debug, Default)]
pub(crate) struct Tables {
    accounts: BTreeMap<AccountId, Versioned<Account>>,
    products: BTreeMap<ProductId, Versioned<Product>>,
    transfers: BTreeMap<TransferId, Transfer>,
    audits: BTreeMap<AuditId, InventoryAudit>,
}

impl Tables {
    fn apply(&mut self, pending: Tables) {
        self.accounts.extend(pending.accounts);
        self.products.extend(pending.products);
        self.transfers.extend(pending.transfers);
        self.audits.extend(pending.audits);
    }
}

/// Record types stored in a versioned table
pub(crate) trait MemoryRecord: VersionedRecord {
    const TABLE: Table;
    fn rows(tables: &Tables) -> &BTreeMap<i64, Versioned<Self>>;
    fn rows_mut(tables: &mut Tables) -> &mut BTreeMap<i64, Versioned<Self>>;
}

impl MemoryRecord for Account {
    const TABLE: Table = Table::Accounts;

    fn rows(tables: &Tables) -> &BTreeMap<i64, Versioned<Self>> {
        &tables.accounts
    }

    fn rows_mut(tables: &mut Tables) -> &mut BTreeMap<i64, Versioned<Self>> {
        &mut tables.accounts
    }
}

impl MemoryRecord for Product {
    const TABLE: Table = Table::Products;

    fn rows(tables: &Tables) -> &BTreeMap<i64, Versioned<Self>> {
        &tables.products
    }

    fn rows_mut(tables: &mut Tables) -> &mut BTreeMap<i64, Versioned<Self>> {
        &mut tables.products
    }
}

struct Shared {
    committed: Mutex<Tables>,
    row_locks: DashMap<RowKey, Arc<RowMutex<()>>>,
    next_account_id: AtomicI64,
    next_product_id: AtomicI64,
    next_transfer_id: AtomicI64,
    next_audit_id: AtomicI64,
    lock_timeout: Duration,
    write_gate: Mutex<Option<Arc<Barrier>>>,
}

/// In-process store handle. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                committed: Mutex::new(Tables::default()),
                row_locks: DashMap::new(),
                next_account_id: AtomicI64::new(1),
                next_product_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                next_audit_id: AtomicI64::new(1),
                lock_timeout,
                write_gate: Mutex::new(None),
            }),
        }
    }

    /// Make every transaction wait on `gate` right before its first
    /// conditional write. Lets a test line up N readers before any writer
    /// runs. `None` removes the gate.
    pub fn set_write_gate(&self, gate: Option<Arc<Barrier>>) {
        *self.shared.write_gate.lock().unwrap() = gate;
    }

    /// Committed accounts, ascending by id
    pub fn committed_accounts(&self) -> Vec<Versioned<Account>> {
        let committed = self.shared.committed.lock().unwrap();
        committed.accounts.values().cloned().collect()
    }

    /// Committed transfers, ascending by id
    pub fn committed_transfers(&self) -> Vec<Transfer> {
        let committed = self.shared.committed.lock().unwrap();
        committed.transfers.values().cloned().collect()
    }

    /// Committed audit rows, ascending by id
    pub fn committed_audits(&self) -> Vec<InventoryAudit> {
        let committed = self.shared.committed.lock().unwrap();
        committed.audits.values().cloned().collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            shared: self.shared.clone(),
            isolation,
            pending: Tables::default(),
            held: HashMap::new(),
            gate_passed: false,
        }))
    }
}

/// Open transaction on a [`MemoryStore`].
///
/// Dropping it discards pending writes and releases every held row lock.
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    isolation: IsolationLevel,
    pending: Tables,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    gate_passed: bool,
}

impl MemoryTransaction {
    /// Acquire the exclusive lock on a row (re-entrant within the transaction)
    async fn acquire(&mut self, key: RowKey) -> Result<(), StoreError> {
        if self.held.contains_key(&key) {
            return Ok(());
        }
        let row_lock = self
            .shared
            .row_locks
            .entry(key)
            .or_insert_with(|| Arc::new(RowMutex::new(())))
            .value()
            .clone();
        match tokio::time::timeout(self.shared.lock_timeout, row_lock.lock_owned()).await {
            Ok(guard) => {
                self.held.insert(key, guard);
                Ok(())
            }
            Err(_) => {
                warn!(table = ?key.0, id = key.1, "Lock wait timed out");
                Err(StoreError::LockTimeout(format!(
                    "{:?} row {} not lockable within {:?}",
                    key.0, key.1, self.shared.lock_timeout
                )))
            }
        }
    }

    async fn pass_write_gate(&mut self) {
        if self.gate_passed {
            return;
        }
        self.gate_passed = true;
        let gate = self.shared.write_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.wait().await;
        }
    }

    /// Latest visible version of a row: own pending write, else committed
    fn current<R: MemoryRecord>(&self, id: i64) -> Option<Versioned<R>> {
        if let Some(row) = R::rows(&self.pending).get(&id) {
            return Some(row.clone());
        }
        let committed = self.shared.committed.lock().unwrap();
        R::rows(&committed).get(&id).cloned()
    }

    fn current_transfer(&self, id: TransferId) -> Option<Transfer> {
        if let Some(t) = self.pending.transfers.get(&id) {
            return Some(t.clone());
        }
        let committed = self.shared.committed.lock().unwrap();
        committed.transfers.get(&id).cloned()
    }
}

#[async_trait]
impl<R: MemoryRecord> VersionedStore<R> for MemoryTransaction {
    async fn read(&mut self, id: i64) -> Result<Option<Versioned<R>>, StoreError> {
        Ok(self.current::<R>(id))
    }

    async fn write_if_version(
        &mut self,
        record: &R,
        expected: Version,
    ) -> Result<WriteOutcome, StoreError> {
        self.pass_write_gate().await;
        let id = record.id();
        self.acquire((R::TABLE, id)).await?;

        match self.current::<R>(id) {
            Some(current) if current.version == expected => {
                let next = current.version.next();
                R::rows_mut(&mut self.pending).insert(id, Versioned::new(record.clone(), next));
                Ok(WriteOutcome::Written(next))
            }
            current => {
                debug!(
                    entity = R::ENTITY,
                    id = id,
                    expected = %expected,
                    actual = ?current.map(|c| c.version),
                    "Conditional write rejected"
                );
                Ok(WriteOutcome::Conflict)
            }
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    async fn insert_account(
        &mut self,
        balance: Decimal,
        is_active: bool,
    ) -> Result<Versioned<Account>, StoreError> {
        let id = self.shared.next_account_id.fetch_add(1, Ordering::SeqCst);
        let row = Versioned::new(
            Account {
                id,
                balance,
                is_active,
            },
            Version::INITIAL,
        );
        self.pending.accounts.insert(id, row.clone());
        Ok(row)
    }

    async fn lock_accounts(
        &mut self,
        ids: &LockSet<AccountId>,
    ) -> Result<Vec<Versioned<Account>>, StoreError> {
        for id in ids.keys() {
            self.acquire((Table::Accounts, *id)).await?;
        }
        Ok(ids
            .keys()
            .iter()
            .filter_map(|id| self.current::<Account>(*id))
            .collect())
    }

    async fn overwrite_balance(
        &mut self,
        id: AccountId,
        balance: Decimal,
    ) -> Result<Version, StoreError> {
        self.acquire((Table::Accounts, id)).await?;
        let mut row = self
            .current::<Account>(id)
            .ok_or_else(|| StoreError::RowNotFound(format!("account {}", id)))?;
        row.record.balance = balance;
        row.version = row.version.next();
        let version = row.version;
        self.pending.accounts.insert(id, row);
        Ok(version)
    }

    async fn insert_transfer(&mut self, transfer: &NewTransfer) -> Result<Transfer, StoreError> {
        let id = self.shared.next_transfer_id.fetch_add(1, Ordering::SeqCst);
        let row = Transfer {
            id,
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount,
            strategy: transfer.strategy,
            status: TransferStatus::Pending,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.pending.transfers.insert(id, row.clone());
        Ok(row)
    }

    async fn finish_transfer(
        &mut self,
        id: TransferId,
        status: TransferStatus,
        failure_reason: Option<&str>,
    ) -> Result<Transfer, StoreError> {
        let mut row = self
            .current_transfer(id)
            .ok_or_else(|| StoreError::RowNotFound(format!("transfer {}", id)))?;
        if !row.status.can_transition_to(status) {
            return Err(StoreError::Constraint(format!(
                "transfer {} cannot move {} -> {}",
                id, row.status, status
            )));
        }
        row.status = status;
        row.failure_reason = failure_reason.map(str::to_string);
        row.completed_at = Some(Utc::now());
        self.pending.transfers.insert(id, row.clone());
        Ok(row)
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        Ok(self.current_transfer(id))
    }

    async fn insert_product(
        &mut self,
        name: &str,
        stock: i64,
    ) -> Result<Versioned<Product>, StoreError> {
        let id = self.shared.next_product_id.fetch_add(1, Ordering::SeqCst);
        let row = Versioned::new(
            Product {
                id,
                name: name.to_string(),
                stock,
            },
            Version::INITIAL,
        );
        self.pending.products.insert(id, row.clone());
        Ok(row)
    }

    async fn append_audit(
        &mut self,
        entry: &NewInventoryAudit,
    ) -> Result<InventoryAudit, StoreError> {
        let id = self.shared.next_audit_id.fetch_add(1, Ordering::SeqCst);
        let row = InventoryAudit {
            id,
            product_id: entry.product_id,
            delta: entry.delta,
            previous_stock: entry.previous_stock,
            new_stock: entry.new_stock,
            kind: entry.kind,
            created_at: Utc::now(),
        };
        self.pending.audits.insert(id, row.clone());
        Ok(row)
    }

    async fn audit_trail(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<InventoryAudit>, StoreError> {
        let mut rows: BTreeMap<AuditId, InventoryAudit> = {
            let committed = self.shared.committed.lock().unwrap();
            committed
                .audits
                .values()
                .filter(|a| a.product_id == product_id)
                .map(|a| (a.id, a.clone()))
                .collect()
        };
        rows.extend(
            self.pending
                .audits
                .values()
                .filter(|a| a.product_id == product_id)
                .map(|a| (a.id, a.clone())),
        );
        Ok(rows.into_values().collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            shared,
            pending,
            held,
            ..
        } = *self;
        {
            let mut committed = shared.committed.lock().unwrap();
            committed.apply(pending);
        }
        // Locks go only after the writes are visible.
        drop(held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_account(store: &MemoryStore, balance: i64) -> Versioned<Account> {
        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        let row = tx
            .insert_account(Decimal::from(balance), true)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        row
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let seeded = seed_account(&store, 100).await;

        let mut writer = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        let mut updated = seeded.record.clone();
        updated.balance = Decimal::from(50);
        let outcome =
            VersionedStore::<Account>::write_if_version(writer.as_mut(), &updated, seeded.version)
                .await
                .unwrap();
        assert!(matches!(outcome, WriteOutcome::Written(v) if v > seeded.version));

        let mut reader = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        let seen: Versioned<Account> = VersionedStore::<Account>::read(reader.as_mut(), seeded.record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.record.balance, Decimal::from(100));
        assert_eq!(seen.version, seeded.version);

        writer.commit().await.unwrap();
        let seen: Versioned<Account> = VersionedStore::<Account>::read(reader.as_mut(), seeded.record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.record.balance, Decimal::from(50));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts_and_leaves_row_unchanged() {
        let store = MemoryStore::new();
        let seeded = seed_account(&store, 100).await;

        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        let mut updated = seeded.record.clone();
        updated.balance = Decimal::from(80);
        VersionedStore::<Account>::write_if_version(tx.as_mut(), &updated, seeded.version)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        updated.balance = Decimal::from(1);
        let outcome =
            VersionedStore::<Account>::write_if_version(tx.as_mut(), &updated, seeded.version)
                .await
                .unwrap();
        assert!(outcome.is_conflict());
        tx.commit().await.unwrap();

        let accounts = store.committed_accounts();
        assert_eq!(accounts[0].record.balance, Decimal::from(80));
        assert_eq!(accounts[0].version, seeded.version.next());
    }

    #[tokio::test]
    async fn test_lock_wait_times_out() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let seeded = seed_account(&store, 10).await;
        let set = LockSet::order([seeded.record.id]);

        let mut holder = store.begin(IsolationLevel::Serializable).await.unwrap();
        holder.lock_accounts(&set).await.unwrap();

        let mut waiter = store.begin(IsolationLevel::Serializable).await.unwrap();
        let err = waiter.lock_accounts(&set).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));

        holder.rollback().await.unwrap();
        let locked = waiter.lock_accounts(&set).await.unwrap();
        assert_eq!(locked.len(), 1);
    }

    #[tokio::test]
    async fn test_lock_accounts_skips_missing_rows() {
        let store = MemoryStore::new();
        let seeded = seed_account(&store, 10).await;

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        let locked = tx
            .lock_accounts(&LockSet::order([seeded.record.id, 999]))
            .await
            .unwrap();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].record.id, seeded.record.id);
    }

    #[tokio::test]
    async fn test_finish_transfer_rejects_second_terminal_state() {
        let store = MemoryStore::new();
        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        let t = tx
            .insert_transfer(&NewTransfer {
                from_account_id: 1,
                to_account_id: 2,
                amount: Decimal::from(5),
                strategy: crate::transfer::TransferStrategy::Optimistic,
            })
            .await
            .unwrap();
        tx.finish_transfer(t.id, TransferStatus::Completed, None)
            .await
            .unwrap();
        let err = tx
            .finish_transfer(t.id, TransferStatus::Failed, Some("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }
}
