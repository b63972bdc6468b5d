//! Integration Tests for transfers
//!
//! Both strategies against the in-process store, including contention and
//! cancellation scenarios. No database needed.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;

use super::orchestrator::TransferOrchestrator;
use super::state::TransferStatus;
use super::types::TransferStrategy;
use crate::core_types::AccountId;
use crate::error::{CoreError, ValidationError};
use crate::store::{
    Backend, ExpectedVersion, IsolationLevel, LockSet, MemoryStore, Store, StoreError,
    StoreTransaction, TransactionScope,
};

struct TestHarness {
    store: MemoryStore,
    orchestrator: Arc<TransferOrchestrator>,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    fn with_store(store: MemoryStore) -> Self {
        let orchestrator = Arc::new(TransferOrchestrator::new(Arc::new(store.clone())));
        Self {
            store,
            orchestrator,
        }
    }

    async fn open(&self, balance: i64) -> AccountId {
        self.open_with(Decimal::from(balance)).await
    }

    async fn open_with(&self, balance: Decimal) -> AccountId {
        self.orchestrator
            .create_account(balance)
            .await
            .unwrap()
            .record
            .id
    }

    async fn balance(&self, id: AccountId) -> Decimal {
        self.orchestrator.get_account(id).await.unwrap().record.balance
    }

    fn total(&self) -> Decimal {
        self.store
            .committed_accounts()
            .iter()
            .map(|a| a.record.balance)
            .sum()
    }

    fn transfers_with(&self, status: TransferStatus) -> usize {
        self.store
            .committed_transfers()
            .iter()
            .filter(|t| t.status == status)
            .count()
    }
}

/// Store whose every `begin` fails as if the database were down
#[derive(Default)]
struct OfflineStore {
    begins: AtomicUsize,
}

#[async_trait]
impl Store for OfflineStore {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn begin(
        &self,
        _isolation: IsolationLevel,
    ) -> Result<Box<dyn StoreTransaction>, StoreError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

const STRATEGIES: [TransferStrategy; 2] =
    [TransferStrategy::Optimistic, TransferStrategy::Pessimistic];

// ========================================================================
// Happy Path Tests
// ========================================================================

/// A=1000, B=500, transfer 200 → A=800, B=700
#[tokio::test]
async fn test_transfer_moves_funds() {
    for strategy in STRATEGIES {
        let h = TestHarness::new();
        let a = h.open(1000).await;
        let b = h.open(500).await;
        let before_a = h.orchestrator.get_account(a).await.unwrap();

        let receipt = h
            .orchestrator
            .transfer(a, b, Decimal::from(200), strategy)
            .await
            .unwrap();

        assert_eq!(receipt.from.balance, Decimal::from(800));
        assert_eq!(receipt.to.balance, Decimal::from(700));
        assert!(receipt.from.version > before_a.version);
        assert_eq!(receipt.transfer.status, TransferStatus::Completed);
        assert_eq!(receipt.transfer.strategy, strategy);
        assert!(receipt.transfer.completed_at.is_some());

        assert_eq!(h.balance(a).await, Decimal::from(800));
        assert_eq!(h.balance(b).await, Decimal::from(700));
        assert_eq!(h.total(), Decimal::from(1500));

        let stored = h.orchestrator.get_transfer(receipt.transfer.id).await.unwrap();
        assert_eq!(stored, receipt.transfer);
    }
}

#[tokio::test]
async fn test_transfer_whole_balance() {
    let h = TestHarness::new();
    let a = h.open(75).await;
    let b = h.open(0).await;

    h.orchestrator
        .transfer(a, b, Decimal::from(75), TransferStrategy::Pessimistic)
        .await
        .unwrap();
    assert_eq!(h.balance(a).await, Decimal::ZERO);
    assert_eq!(h.balance(b).await, Decimal::from(75));
}

// ========================================================================
// Rejection Tests
// ========================================================================

#[tokio::test]
async fn test_input_validation_leaves_no_row() {
    let h = TestHarness::new();
    let a = h.open(100).await;
    let b = h.open(100).await;

    for strategy in STRATEGIES {
        assert_eq!(
            h.orchestrator
                .transfer(a, a, Decimal::from(1), strategy)
                .await
                .unwrap_err(),
            CoreError::Validation(ValidationError::SameAccount)
        );
        assert_eq!(
            h.orchestrator
                .transfer(a, b, Decimal::ZERO, strategy)
                .await
                .unwrap_err(),
            CoreError::Validation(ValidationError::InvalidAmount)
        );
        assert_eq!(
            h.orchestrator
                .transfer(a, b, Decimal::from(-5), strategy)
                .await
                .unwrap_err(),
            CoreError::Validation(ValidationError::InvalidAmount)
        );
    }
    assert!(h.store.committed_transfers().is_empty());
}

#[tokio::test]
async fn test_missing_account_leaves_no_row() {
    let h = TestHarness::new();
    let a = h.open(100).await;

    for strategy in STRATEGIES {
        let err = h
            .orchestrator
            .transfer(a, 999, Decimal::from(1), strategy)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::AccountNotFound(999));
    }
    assert!(h.store.committed_transfers().is_empty());
    assert_eq!(h.balance(a).await, Decimal::from(100));
}

#[tokio::test]
async fn test_insufficient_funds_records_failed_row() {
    for strategy in STRATEGIES {
        let h = TestHarness::new();
        let a = h.open(100).await;
        let b = h.open(0).await;

        let err = h
            .orchestrator
            .transfer(a, b, Decimal::from(150), strategy)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientFunds { account_id, .. } if account_id == a));
        assert!(!err.is_retryable());

        assert_eq!(h.balance(a).await, Decimal::from(100));
        assert_eq!(h.balance(b).await, Decimal::ZERO);

        let transfers = h.store.committed_transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].status, TransferStatus::Failed);
        assert!(
            transfers[0]
                .failure_reason
                .as_deref()
                .unwrap()
                .contains("Insufficient funds")
        );
    }
}

/// Credit past `Decimal::MAX` is a typed rejection, not a panic
#[tokio::test]
async fn test_balance_overflow_rejected() {
    let h = TestHarness::new();
    let a = h.open_with(Decimal::MAX).await;
    let b = h.open_with(Decimal::MAX).await;

    for strategy in STRATEGIES {
        let err = h
            .orchestrator
            .transfer(a, b, Decimal::ONE, strategy)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::BalanceOverflow(b));
        assert!(err.is_business_rejection());
        assert!(!err.is_retryable());
    }

    assert_eq!(h.balance(a).await, Decimal::MAX);
    assert_eq!(h.balance(b).await, Decimal::MAX);
    assert_eq!(h.transfers_with(TransferStatus::Failed), 2);
    assert_eq!(h.transfers_with(TransferStatus::Completed), 0);
}

#[tokio::test]
async fn test_unavailable_backend_records_nothing() {
    let store = Arc::new(OfflineStore::default());
    let orchestrator = TransferOrchestrator::new(store.clone());

    for strategy in STRATEGIES {
        let err = orchestrator
            .transfer(1, 2, Decimal::from(10), strategy)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::TransactionFailure(StoreError::Unavailable(_))
        ));
        assert_eq!(err.http_status(), 503);
    }
    // One begin per call: no second scope was opened to record a Failed row
    assert_eq!(store.begins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_inactive_account_rejected() {
    let h = TestHarness::new();
    let a = h.open(100).await;
    let b = h.open(100).await;

    let deactivated = h
        .orchestrator
        .deactivate_account(b, ExpectedVersion::Any)
        .await
        .unwrap();
    assert!(!deactivated.record.is_active);

    for strategy in STRATEGIES {
        let err = h
            .orchestrator
            .transfer(a, b, Decimal::from(10), strategy)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::InactiveAccount(b));
    }
    assert_eq!(h.transfers_with(TransferStatus::Failed), 2);
    assert_eq!(h.total(), Decimal::from(200));
}

#[tokio::test]
async fn test_stale_token_rejected_after_transfer() {
    let h = TestHarness::new();
    let a = h.open(100).await;
    let b = h.open(100).await;
    let seen = h.orchestrator.get_account(a).await.unwrap();

    h.orchestrator
        .transfer(a, b, Decimal::from(1), TransferStrategy::Pessimistic)
        .await
        .unwrap();

    let err = h
        .orchestrator
        .deactivate_account(a, ExpectedVersion::Exact(seen.version))
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::ConcurrencyConflict { entity: "account", id: a });
    assert!(h.orchestrator.get_account(a).await.unwrap().record.is_active);
}

#[tokio::test]
async fn test_get_transfer_not_found() {
    let h = TestHarness::new();
    assert_eq!(
        h.orchestrator.get_transfer(42).await.unwrap_err(),
        CoreError::TransferNotFound(42)
    );
}

#[tokio::test]
async fn test_negative_initial_balance_rejected() {
    let h = TestHarness::new();
    assert_eq!(
        h.orchestrator
            .create_account(Decimal::new(-1, 2))
            .await
            .unwrap_err(),
        CoreError::Validation(ValidationError::NegativeBalance)
    );
}

// ========================================================================
// Contention Tests
// ========================================================================

/// N optimistic transfers all read before any writes: one commits
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_optimistic_race_single_winner() {
    const N: usize = 6;
    let h = TestHarness::new();
    let a = h.open(1000).await;
    let b = h.open(0).await;

    h.store.set_write_gate(Some(Arc::new(Barrier::new(N))));

    let mut handles = Vec::with_capacity(N);
    for _ in 0..N {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .transfer(a, b, Decimal::from(10), TransferStrategy::Optimistic)
                .await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) if e.is_retryable() => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    h.store.set_write_gate(None);

    assert_eq!(wins, 1);
    assert_eq!(conflicts, N - 1);
    assert_eq!(h.balance(a).await, Decimal::from(990));
    assert_eq!(h.balance(b).await, Decimal::from(10));
    assert_eq!(h.transfers_with(TransferStatus::Completed), 1);
    assert_eq!(h.transfers_with(TransferStatus::Failed), N - 1);
}

/// Overlapping pessimistic transfers queue and all commit
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pessimistic_serializes() {
    const N: i64 = 20;
    let h = TestHarness::new();
    let a = h.open(1000).await;
    let b = h.open(500).await;

    let mut handles = Vec::new();
    for _ in 0..N {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .transfer(a, b, Decimal::from(10), TransferStrategy::Pessimistic)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.balance(a).await, Decimal::from(1000 - 10 * N));
    assert_eq!(h.balance(b).await, Decimal::from(500 + 10 * N));
    assert_eq!(h.transfers_with(TransferStatus::Completed), N as usize);
}

/// Opposing A→B / B→A transfers never deadlock
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposing_transfers_no_deadlock() {
    let h = TestHarness::new();
    let a = h.open(1000).await;
    let b = h.open(1000).await;

    let mut handles = Vec::new();
    for i in 0..40 {
        let orchestrator = h.orchestrator.clone();
        let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
        handles.push(tokio::spawn(async move {
            orchestrator
                .transfer(from, to, Decimal::from(5), TransferStrategy::Pessimistic)
                .await
        }));
    }

    let all = async {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(10), all)
        .await
        .expect("opposing transfers deadlocked");

    assert_eq!(h.balance(a).await, Decimal::from(1000));
    assert_eq!(h.balance(b).await, Decimal::from(1000));
    assert_eq!(h.total(), Decimal::from(2000));
}

/// Funds for exactly half the contenders: balance never goes negative
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_contended_overdraw_never_negative() {
    let h = TestHarness::new();
    let a = h.open(50).await;
    let b = h.open(0).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .transfer(a, b, Decimal::from(10), TransferStrategy::Pessimistic)
                .await
        }));
    }

    let mut ok = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(CoreError::InsufficientFunds { .. }) => insufficient += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(ok, 5);
    assert_eq!(insufficient, 5);
    assert_eq!(h.balance(a).await, Decimal::ZERO);
    assert_eq!(h.balance(b).await, Decimal::from(50));
}

#[tokio::test]
async fn test_lock_wait_timeout_is_transaction_failure() {
    let h = TestHarness::with_store(MemoryStore::with_lock_timeout(Duration::from_millis(50)));
    let a = h.open(100).await;
    let b = h.open(100).await;

    let mut holder = TransactionScope::begin(&h.store, IsolationLevel::Serializable, "holder")
        .await
        .unwrap();
    holder.tx().lock_accounts(&LockSet::order([a])).await.unwrap();

    let err = h
        .orchestrator
        .transfer(a, b, Decimal::from(1), TransferStrategy::Pessimistic)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::TransactionFailure(StoreError::LockTimeout(_))
    ));
    assert!(!err.is_retryable());
    holder.rollback().await;

    assert_eq!(h.balance(a).await, Decimal::from(100));
    assert_eq!(h.transfers_with(TransferStatus::Failed), 1);
}

/// A lock wait that fails before the accounts were seen leaves no row when
/// one of them does not exist
#[tokio::test]
async fn test_lock_timeout_on_missing_account_records_nothing() {
    let h = TestHarness::with_store(MemoryStore::with_lock_timeout(Duration::from_millis(50)));
    let a = h.open(100).await;

    let mut holder = TransactionScope::begin(&h.store, IsolationLevel::Serializable, "holder")
        .await
        .unwrap();
    holder
        .tx()
        .lock_accounts(&LockSet::order([a, 999]))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .transfer(a, 999, Decimal::from(1), TransferStrategy::Pessimistic)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::TransactionFailure(StoreError::LockTimeout(_))
    ));
    holder.rollback().await;

    assert!(h.store.committed_transfers().is_empty());
    assert_eq!(h.balance(a).await, Decimal::from(100));
}

/// Dropping an in-flight transfer commits nothing and releases its locks
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_transfer_rolls_back() {
    let h = TestHarness::new();
    let a = h.open(100).await;
    let b = h.open(100).await;

    let mut holder = TransactionScope::begin(&h.store, IsolationLevel::Serializable, "holder")
        .await
        .unwrap();
    holder
        .tx()
        .lock_accounts(&LockSet::order([b]))
        .await
        .unwrap();

    let orchestrator = h.orchestrator.clone();
    let task = tokio::spawn(async move {
        orchestrator
            .transfer(a, b, Decimal::from(30), TransferStrategy::Pessimistic)
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    holder.rollback().await;

    assert_eq!(h.balance(a).await, Decimal::from(100));
    assert_eq!(h.balance(b).await, Decimal::from(100));
    assert!(h.store.committed_transfers().is_empty());

    // Locks taken by the cancelled transfer are gone
    tokio::time::timeout(
        Duration::from_secs(1),
        h.orchestrator
            .transfer(a, b, Decimal::from(30), TransferStrategy::Pessimistic),
    )
    .await
    .expect("locks leaked by cancelled transfer")
    .unwrap();
    assert_eq!(h.balance(b).await, Decimal::from(130));
}
