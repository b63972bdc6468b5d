//! Contended Ledger - contention demo
//!
//! Loads `config/<env>.yaml`, builds the configured store, then races
//! optimistic and pessimistic transfers plus stock sales over a handful of
//! hot rows and logs what happened.
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────┐
//! │  Config  │───▶│    Store     │───▶│ Orchestrator │───▶│ Summary  │
//! │  (YAML)  │    │ (pg/memory)  │    │  (N tasks)   │    │  (JSON)  │
//! └──────────┘    └──────────────┘    └──────────────┘    └──────────┘
//! ```

use anyhow::{Context, bail};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use contended_ledger::config::{AppConfig, DatabaseConfig};
use contended_ledger::db::Database;
use contended_ledger::logging::init_logging;
use contended_ledger::store::adapter_for;
use contended_ledger::{
    AccountId, AuditKind, Backend, CoreError, CoreResult, ExpectedVersion, PgStore, RetryPolicy,
    StockOrchestrator, Store, TransferOrchestrator, TransferStrategy, with_conflict_retry,
};

const ACCOUNTS: usize = 4;
const OPENING_BALANCE: i64 = 1_000;
const TRANSFERS_PER_STRATEGY: usize = 50;
const SALES: usize = 40;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

async fn build_store(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config.backend {
        Backend::Postgres => {
            let db = Database::connect(config)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.health_check().await.context("Health check failed")?;
            if config.bootstrap_schema {
                db.bootstrap_schema().await.context("Schema bootstrap failed")?;
            }
            Ok(Arc::new(PgStore::with_adapter(
                db.pool().clone(),
                adapter_for(config.backend),
                config.lock_timeout(),
            )))
        }
        #[cfg(feature = "memory-store")]
        Backend::Memory => Ok(Arc::new(contended_ledger::MemoryStore::with_lock_timeout(
            config.lock_timeout(),
        ))),
        other => bail!("backend `{}` is not available in this build", other),
    }
}

#[derive(Debug, Default, Serialize)]
struct Tally {
    completed: usize,
    conflicts: usize,
    rejected: usize,
    failed: usize,
}

impl Tally {
    fn record<T>(&mut self, result: &CoreResult<T>) {
        match result {
            Ok(_) => self.completed += 1,
            Err(CoreError::ConcurrencyConflict { .. }) => self.conflicts += 1,
            Err(CoreError::TransactionFailure(_)) => self.failed += 1,
            Err(_) => self.rejected += 1,
        }
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    backend: Backend,
    optimistic: Tally,
    pessimistic: Tally,
    sales: Tally,
    total_balance: Decimal,
    expected_total: Decimal,
    final_stock: i64,
    audit_rows: usize,
    elapsed_ms: u64,
}

async fn run_transfers(
    transfers: &Arc<TransferOrchestrator>,
    accounts: &[AccountId],
    strategy: TransferStrategy,
) -> Tally {
    let policy = RetryPolicy::new(8, Duration::from_millis(2));
    let tasks = (0..TRANSFERS_PER_STRATEGY).map(|i| {
        let transfers = transfers.clone();
        let from = accounts[i % accounts.len()];
        let to = accounts[(i + 1) % accounts.len()];
        let amount = Decimal::from(5 + (i % 7) as i64);
        tokio::spawn(async move {
            with_conflict_retry(policy, || transfers.transfer(from, to, amount, strategy)).await
        })
    });

    let mut tally = Tally::default();
    for joined in join_all(tasks).await {
        match joined {
            Ok(result) => tally.record(&result),
            Err(e) => {
                tracing::error!(error = %e, "Transfer task panicked");
                tally.failed += 1;
            }
        }
    }
    tally
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _guard = init_logging(&config)?;

    info!(env = %env, backend = %config.database.backend, "Starting contention demo");

    let store = build_store(&config.database).await?;
    let transfers = Arc::new(TransferOrchestrator::new(store.clone()));
    let stock = Arc::new(StockOrchestrator::new(store.clone()));
    let started = Instant::now();

    // === Accounts ===
    let mut accounts = Vec::with_capacity(ACCOUNTS);
    for _ in 0..ACCOUNTS {
        let account = transfers
            .create_account(Decimal::from(OPENING_BALANCE))
            .await?;
        accounts.push(account.record.id);
    }

    let optimistic = run_transfers(&transfers, &accounts, TransferStrategy::Optimistic).await;
    let pessimistic = run_transfers(&transfers, &accounts, TransferStrategy::Pessimistic).await;

    let mut total_balance = Decimal::ZERO;
    for id in &accounts {
        total_balance += transfers.get_account(*id).await?.record.balance;
    }

    // === Inventory ===
    let product = stock.create_product("demo-widget", 100).await?;
    let product_id = product.record.id;
    let policy = RetryPolicy::new(16, Duration::from_millis(1));
    let sales = (0..SALES).map(|_| {
        let stock = stock.clone();
        tokio::spawn(async move {
            with_conflict_retry(policy, || {
                stock.adjust_stock(product_id, -3, AuditKind::Sale, ExpectedVersion::Any)
            })
            .await
        })
    });
    let mut sales_tally = Tally::default();
    for joined in join_all(sales).await {
        match joined {
            Ok(result) => sales_tally.record(&result),
            Err(_) => sales_tally.failed += 1,
        }
    }

    let summary = Summary {
        backend: store.backend(),
        optimistic,
        pessimistic,
        sales: sales_tally,
        total_balance,
        expected_total: Decimal::from(OPENING_BALANCE * ACCOUNTS as i64),
        final_stock: stock.get_product(product_id).await?.record.stock,
        audit_rows: stock.audit_trail(product_id).await?.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    if summary.total_balance != summary.expected_total {
        bail!(
            "balance not conserved: {} != {}",
            summary.total_balance,
            summary.expected_total
        );
    }

    info!(
        optimistic_completed = summary.optimistic.completed,
        optimistic_conflicts = summary.optimistic.conflicts,
        pessimistic_completed = summary.pessimistic.completed,
        final_stock = summary.final_stock,
        audit_rows = summary.audit_rows,
        "Contention demo finished"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
