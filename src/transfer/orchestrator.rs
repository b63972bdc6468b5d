//! Transfer Orchestrator
//!
//! Moves balance between two accounts under either concurrency strategy and
//! owns the account lifecycle (create, read, deactivate).
//!
//! # Transfer record rule
//!
//! Every call that passes input validation and finds both accounts leaves
//! exactly one transfer row:
//! - `Completed`, written in the same transaction as the balance moves
//! - `Failed` with a reason, written in a separate short transaction after
//!   the main one rolled back (best effort)
//!
//! A backend outage gets no `Failed` row, and neither does a failure raised
//! before the accounts were seen if one of them turns out not to exist.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::state::TransferStatus;
use super::types::{BalanceSnapshot, NewTransfer, Transfer, TransferReceipt, TransferStrategy};
use crate::account::Account;
use crate::core_types::{AccountId, TransferId};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::store::{
    ExpectedVersion, IsolationLevel, LockSet, Store, StoreError, StoreTransaction,
    TransactionScope, Versioned, VersionedStore, WriteOutcome,
};

pub struct TransferOrchestrator {
    store: Arc<dyn Store>,
}

impl TransferOrchestrator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Open an active account holding `initial_balance`
    #[instrument(skip(self))]
    pub async fn create_account(&self, initial_balance: Decimal) -> CoreResult<Versioned<Account>> {
        if initial_balance < Decimal::ZERO {
            return Err(ValidationError::NegativeBalance.into());
        }

        let mut scope = TransactionScope::begin(
            self.store.as_ref(),
            IsolationLevel::ReadCommitted,
            "create_account",
        )
        .await?;
        let result = scope
            .tx()
            .insert_account(initial_balance, true)
            .await
            .map_err(CoreError::from);
        let account = scope.complete(result).await?;

        info!(
            account_id = account.record.id,
            balance = %account.record.balance,
            "Account created"
        );
        Ok(account)
    }

    #[instrument(skip(self))]
    pub async fn get_account(&self, account_id: AccountId) -> CoreResult<Versioned<Account>> {
        let mut scope = TransactionScope::begin(
            self.store.as_ref(),
            IsolationLevel::ReadCommitted,
            "get_account",
        )
        .await?;
        let result = read_account(scope.tx(), account_id).await;
        scope.complete(result).await
    }

    /// Clear `is_active` with a conditional write
    #[instrument(skip(self))]
    pub async fn deactivate_account(
        &self,
        account_id: AccountId,
        expected: ExpectedVersion,
    ) -> CoreResult<Versioned<Account>> {
        let mut scope = TransactionScope::begin(
            self.store.as_ref(),
            IsolationLevel::ReadCommitted,
            "deactivate_account",
        )
        .await?;
        let result = deactivate(scope.tx(), account_id, expected).await;
        let account = scope.complete(result).await?;

        info!(account_id = account_id, version = %account.version, "Account deactivated");
        Ok(account)
    }

    #[instrument(skip(self))]
    pub async fn get_transfer(&self, transfer_id: TransferId) -> CoreResult<Transfer> {
        let mut scope = TransactionScope::begin(
            self.store.as_ref(),
            IsolationLevel::ReadCommitted,
            "get_transfer",
        )
        .await?;
        let result = scope
            .tx()
            .get_transfer(transfer_id)
            .await
            .map_err(CoreError::from)
            .and_then(|t| t.ok_or(CoreError::TransferNotFound(transfer_id)));
        scope.complete(result).await
    }

    /// Move `amount` from one account to another.
    ///
    /// `Optimistic` fails with a retryable `ConcurrencyConflict` if either
    /// account changed since it was read. `Pessimistic` locks both rows and
    /// waits; lock trouble surfaces as `TransactionFailure`.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        strategy: TransferStrategy,
    ) -> CoreResult<TransferReceipt> {
        if from == to {
            return Err(ValidationError::SameAccount.into());
        }
        if amount <= Decimal::ZERO {
            return Err(ValidationError::InvalidAmount.into());
        }

        let request = NewTransfer {
            from_account_id: from,
            to_account_id: to,
            amount,
            strategy,
        };

        let result = match strategy {
            TransferStrategy::Optimistic => self.transfer_optimistic(&request).await,
            TransferStrategy::Pessimistic => self.transfer_pessimistic(&request).await,
        };

        match result {
            Ok(receipt) => {
                info!(
                    transfer_id = receipt.transfer.id,
                    from = from,
                    to = to,
                    amount = %amount,
                    strategy = %strategy,
                    "Transfer completed"
                );
                Ok(receipt)
            }
            Err(e) => {
                match &e {
                    CoreError::TransactionFailure(store_err) => {
                        error!(from = from, to = to, code = store_err.code(), error = %e, "Transfer failed")
                    }
                    CoreError::ConcurrencyConflict { entity, id } => {
                        warn!(entity = *entity, id = *id, strategy = %strategy, "Transfer conflict")
                    }
                    _ => warn!(from = from, to = to, code = e.code(), "Transfer rejected: {}", e),
                }
                if records_failure(&e) {
                    self.record_failed(&request, &e).await;
                }
                Err(e)
            }
        }
    }

    async fn transfer_optimistic(&self, request: &NewTransfer) -> CoreResult<TransferReceipt> {
        let mut scope = TransactionScope::begin(
            self.store.as_ref(),
            IsolationLevel::ReadCommitted,
            "transfer_optimistic",
        )
        .await?;
        let result = run_optimistic(scope.tx(), request).await;
        scope.complete(result).await
    }

    async fn transfer_pessimistic(&self, request: &NewTransfer) -> CoreResult<TransferReceipt> {
        let mut scope = TransactionScope::begin(
            self.store.as_ref(),
            IsolationLevel::Serializable,
            "transfer_pessimistic",
        )
        .await?;
        let result = run_pessimistic(scope.tx(), request).await;
        scope.complete(result).await
    }

    /// Persist a `Failed` row for a transfer whose main transaction rolled
    /// back. Errors here are logged; the caller still gets the original error.
    async fn record_failed(&self, request: &NewTransfer, cause: &CoreError) {
        let reason = cause.to_string();
        match self.try_record_failed(request, &reason).await {
            Ok(Some(transfer)) => info!(
                transfer_id = transfer.id,
                reason = %reason,
                "Failed transfer recorded"
            ),
            Ok(None) => debug!(
                from = request.from_account_id,
                to = request.to_account_id,
                "Account missing, failed transfer not recorded"
            ),
            Err(e) => error!(
                from = request.from_account_id,
                to = request.to_account_id,
                error = %e,
                "Could not record failed transfer"
            ),
        }
    }

    async fn try_record_failed(
        &self,
        request: &NewTransfer,
        reason: &str,
    ) -> CoreResult<Option<Transfer>> {
        let mut scope = TransactionScope::begin(
            self.store.as_ref(),
            IsolationLevel::ReadCommitted,
            "record_failed_transfer",
        )
        .await?;
        let result = insert_failed(scope.tx(), request, reason).await;
        scope.complete(result).await
    }
}

/// Whether a failed transfer may leave a `Failed` row. The row itself is
/// only written once both accounts are confirmed to exist.
fn records_failure(e: &CoreError) -> bool {
    !matches!(
        e,
        CoreError::Validation(_)
            | CoreError::AccountNotFound(_)
            | CoreError::TransactionFailure(StoreError::Unavailable(_))
    )
}

async fn read_account(
    tx: &mut dyn StoreTransaction,
    account_id: AccountId,
) -> CoreResult<Versioned<Account>> {
    VersionedStore::<Account>::read(tx, account_id)
        .await?
        .ok_or(CoreError::AccountNotFound(account_id))
}

async fn deactivate(
    tx: &mut dyn StoreTransaction,
    account_id: AccountId,
    expected: ExpectedVersion,
) -> CoreResult<Versioned<Account>> {
    let current = read_account(&mut *tx, account_id).await?;
    let mut updated = current.record.clone();
    updated.is_active = false;

    let token = expected.resolve(current.version);
    match VersionedStore::<Account>::write_if_version(&mut *tx, &updated, token).await? {
        WriteOutcome::Written(version) => Ok(Versioned::new(updated, version)),
        WriteOutcome::Conflict => Err(CoreError::conflict::<Account>(account_id)),
    }
}

/// Business checks shared by both strategies. Yields the balances after the
/// move as `(from, to)`.
fn settle(from: &Account, to: &Account, amount: Decimal) -> CoreResult<(Decimal, Decimal)> {
    if !from.is_active {
        return Err(CoreError::InactiveAccount(from.id));
    }
    if !to.is_active {
        return Err(CoreError::InactiveAccount(to.id));
    }
    if !from.can_debit(amount) {
        return Err(CoreError::InsufficientFunds {
            account_id: from.id,
            available: from.balance,
            requested: amount,
        });
    }
    let from_balance = from
        .balance
        .checked_sub(amount)
        .ok_or(CoreError::BalanceOverflow(from.id))?;
    let to_balance = to
        .balance
        .checked_add(amount)
        .ok_or(CoreError::BalanceOverflow(to.id))?;
    Ok((from_balance, to_balance))
}

async fn run_optimistic(
    tx: &mut dyn StoreTransaction,
    request: &NewTransfer,
) -> CoreResult<TransferReceipt> {
    let from = read_account(&mut *tx, request.from_account_id).await?;
    let to = read_account(&mut *tx, request.to_account_id).await?;
    let (from_balance, to_balance) = settle(&from.record, &to.record, request.amount)?;

    let pending = tx.insert_transfer(request).await?;

    let mut debited = from.record.clone();
    debited.balance = from_balance;
    let mut credited = to.record.clone();
    credited.balance = to_balance;

    // Write in lock order so two opposing transfers queue on the same row first
    let mut from_version = from.version;
    let mut to_version = to.version;
    for &id in LockSet::order([from.record.id, to.record.id]).keys() {
        let (record, slot) = if id == from.record.id {
            (&debited, &mut from_version)
        } else {
            (&credited, &mut to_version)
        };
        match VersionedStore::<Account>::write_if_version(&mut *tx, record, *slot).await? {
            WriteOutcome::Written(version) => *slot = version,
            WriteOutcome::Conflict => return Err(CoreError::conflict::<Account>(id)),
        }
    }

    let transfer = tx
        .finish_transfer(pending.id, TransferStatus::Completed, None)
        .await?;

    Ok(TransferReceipt {
        transfer,
        from: BalanceSnapshot {
            account_id: debited.id,
            balance: debited.balance,
            version: from_version,
        },
        to: BalanceSnapshot {
            account_id: credited.id,
            balance: credited.balance,
            version: to_version,
        },
    })
}

async fn run_pessimistic(
    tx: &mut dyn StoreTransaction,
    request: &NewTransfer,
) -> CoreResult<TransferReceipt> {
    let lock_set = LockSet::order([request.from_account_id, request.to_account_id]);
    let locked = tx.lock_accounts(&lock_set).await?;

    let find = |id: AccountId| {
        locked
            .iter()
            .find(|a| a.record.id == id)
            .map(|a| a.record.clone())
            .ok_or(CoreError::AccountNotFound(id))
    };
    let from = find(request.from_account_id)?;
    let to = find(request.to_account_id)?;

    // Re-checked on the locked snapshot; nobody else can change these rows now
    let (from_balance, to_balance) = settle(&from, &to, request.amount)?;

    let from_version = tx.overwrite_balance(from.id, from_balance).await?;
    let to_version = tx.overwrite_balance(to.id, to_balance).await?;

    let pending = tx.insert_transfer(request).await?;
    let transfer = tx
        .finish_transfer(pending.id, TransferStatus::Completed, None)
        .await?;

    Ok(TransferReceipt {
        transfer,
        from: BalanceSnapshot {
            account_id: from.id,
            balance: from_balance,
            version: from_version,
        },
        to: BalanceSnapshot {
            account_id: to.id,
            balance: to_balance,
            version: to_version,
        },
    })
}

async fn insert_failed(
    tx: &mut dyn StoreTransaction,
    request: &NewTransfer,
    reason: &str,
) -> CoreResult<Option<Transfer>> {
    for id in [request.from_account_id, request.to_account_id] {
        if VersionedStore::<Account>::read(&mut *tx, id).await?.is_none() {
            return Ok(None);
        }
    }
    let pending = tx.insert_transfer(request).await?;
    let failed = tx
        .finish_transfer(pending.id, TransferStatus::Failed, Some(reason))
        .await?;
    Ok(Some(failed))
}
