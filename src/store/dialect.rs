//! Store adapters (SQL dialects)
//!
//! The syntax for "select these rows and hold an exclusive lock until end of
//! transaction" differs per backend: PostgreSQL and MySQL append a locking
//! clause, SQL Server uses table hints. Orchestrators never see this text;
//! the store asks its adapter for it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::IsolationLevel;

/// Relational backend a deployment talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    SqlServer,
    MySql,
    /// In-process store (feature `memory-store`)
    Memory,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::SqlServer => "sqlserver",
            Backend::MySql => "mysql",
            Backend::Memory => "memory",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Backend::Postgres),
            "sqlserver" | "mssql" => Ok(Backend::SqlServer),
            "mysql" => Ok(Backend::MySql),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

/// Capability: exclusive row locks for update, expressed in backend SQL.
pub trait StoreAdapter: Send + Sync + fmt::Debug {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// Bind placeholder for the 1-based parameter `index`
    fn placeholder(&self, index: usize) -> String;

    /// Query that reads `columns` of the rows matching `predicate`, ordered by
    /// `order_by`, holding an exclusive lock on each until end of transaction.
    fn lock_statement_for(
        &self,
        table: &str,
        columns: &[&str],
        predicate: &str,
        order_by: &str,
    ) -> String;

    /// Statement bounding how long a lock wait may block
    fn lock_timeout_statement(&self, timeout: Duration) -> String;

    /// Level the backend actually runs for a requested one.
    ///
    /// Callers ask for `Serializable` when every row they touch is taken with
    /// [`StoreAdapter::lock_statement_for`]. A backend whose serializable
    /// level is lock-based runs it as asked.
    fn effective_isolation(&self, requested: IsolationLevel) -> IsolationLevel {
        requested
    }

    /// Statement selecting the isolation level of the current transaction
    fn isolation_statement(&self, level: IsolationLevel) -> String {
        format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            self.effective_isolation(level).as_sql()
        )
    }

    /// `column IN (p1, p2, ...)` for `count` parameters starting at `first`
    fn key_in_predicate(&self, column: &str, first: usize, count: usize) -> String {
        let params: Vec<String> = (first..first + count)
            .map(|i| self.placeholder(i))
            .collect();
        format!("{} IN ({})", column, params.join(", "))
    }
}

/// PostgreSQL: `FOR UPDATE` locking clause, `$n` placeholders.
///
/// PostgreSQL's SERIALIZABLE is snapshot based: a transaction queued behind
/// `FOR UPDATE` still holds the snapshot it took before the wait, and fails
/// with 40001 once the holder commits a change to that row. Serializable
/// scopes therefore run at READ COMMITTED, where the lock read returns the
/// latest committed row after the wait. The row locks serialize the writers,
/// the same guarantee SQL Server gets from `HOLDLOCK`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl StoreAdapter for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn lock_statement_for(
        &self,
        table: &str,
        columns: &[&str],
        predicate: &str,
        order_by: &str,
    ) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} FOR UPDATE",
            columns.join(", "),
            table,
            predicate,
            order_by
        )
    }

    fn lock_timeout_statement(&self, timeout: Duration) -> String {
        format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis())
    }

    fn effective_isolation(&self, requested: IsolationLevel) -> IsolationLevel {
        match requested {
            IsolationLevel::Serializable => IsolationLevel::ReadCommitted,
            other => other,
        }
    }
}

/// SQL Server: `UPDLOCK, ROWLOCK, HOLDLOCK` table hints, `@pN` placeholders
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlServerDialect;

impl StoreAdapter for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn lock_statement_for(
        &self,
        table: &str,
        columns: &[&str],
        predicate: &str,
        order_by: &str,
    ) -> String {
        format!(
            "SELECT {} FROM {} WITH (UPDLOCK, ROWLOCK, HOLDLOCK) WHERE {} ORDER BY {}",
            columns.join(", "),
            table,
            predicate,
            order_by
        )
    }

    fn lock_timeout_statement(&self, timeout: Duration) -> String {
        format!("SET LOCK_TIMEOUT {}", timeout.as_millis())
    }
}

/// MySQL (InnoDB): `FOR UPDATE` locking clause, `?` placeholders
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDialect;

impl StoreAdapter for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn lock_statement_for(
        &self,
        table: &str,
        columns: &[&str],
        predicate: &str,
        order_by: &str,
    ) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} FOR UPDATE",
            columns.join(", "),
            table,
            predicate,
            order_by
        )
    }

    fn lock_timeout_statement(&self, timeout: Duration) -> String {
        // innodb_lock_wait_timeout has whole-second granularity
        let secs = timeout.as_secs().max(1);
        format!("SET SESSION innodb_lock_wait_timeout = {}", secs)
    }
}

/// Select the adapter for a backend, once, at startup.
///
/// The in-process store takes locks directly and speaks the PostgreSQL
/// dialect for diagnostics only.
pub fn adapter_for(backend: Backend) -> Arc<dyn StoreAdapter> {
    match backend {
        Backend::Postgres | Backend::Memory => Arc::new(PostgresDialect),
        Backend::SqlServer => Arc::new(SqlServerDialect),
        Backend::MySql => Arc::new(MySqlDialect),
    }
}
