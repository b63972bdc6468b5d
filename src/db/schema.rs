//! Idempotent DDL for the PostgreSQL backend
//!
//! Every statement is `IF NOT EXISTS`, so bootstrapping an existing database
//! is a no-op. Migrations proper are handled outside this crate.

pub const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts_tb (
        id          BIGSERIAL PRIMARY KEY,
        balance     NUMERIC(30, 8) NOT NULL CHECK (balance >= 0),
        is_active   BOOLEAN NOT NULL DEFAULT TRUE,
        version     BIGINT NOT NULL DEFAULT 1,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products_tb (
        id          BIGSERIAL PRIMARY KEY,
        name        TEXT NOT NULL,
        stock       BIGINT NOT NULL CHECK (stock >= 0),
        version     BIGINT NOT NULL DEFAULT 1,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transfers_tb (
        id               BIGSERIAL PRIMARY KEY,
        from_account_id  BIGINT NOT NULL REFERENCES accounts_tb (id),
        to_account_id    BIGINT NOT NULL REFERENCES accounts_tb (id),
        amount           NUMERIC(30, 8) NOT NULL CHECK (amount > 0),
        strategy         SMALLINT NOT NULL,
        status           SMALLINT NOT NULL DEFAULT 0,
        failure_reason   TEXT,
        created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        completed_at     TIMESTAMPTZ,
        CHECK (from_account_id <> to_account_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory_audit_tb (
        id              BIGSERIAL PRIMARY KEY,
        product_id      BIGINT NOT NULL REFERENCES products_tb (id),
        delta           BIGINT NOT NULL CHECK (delta <> 0),
        previous_stock  BIGINT NOT NULL,
        new_stock       BIGINT NOT NULL CHECK (new_stock >= 0),
        kind            SMALLINT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK (new_stock = previous_stock + delta)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers_tb (from_account_id)",
    "CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers_tb (to_account_id)",
    "CREATE INDEX IF NOT EXISTS idx_inventory_audit_product ON inventory_audit_tb (product_id, id)",
];
