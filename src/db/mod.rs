//! Database connection management

pub mod schema;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;

/// PostgreSQL database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a connection pool sized from `config`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| sqlx::Error::Configuration("database.url is not set".into()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "PostgreSQL connection pool established"
        );
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn bootstrap_schema(&self) -> Result<(), sqlx::Error> {
        bootstrap_schema(&self.pool).await
    }
}

/// Create the ledger tables if they do not exist
pub async fn bootstrap_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in schema::STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!(statements = schema::STATEMENTS.len(), "Schema bootstrapped");
    Ok(())
}
