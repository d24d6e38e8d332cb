//! Schema creation for the ledger and warehouse databases.
//!
//! Every statement is `IF NOT EXISTS`, so `billcast init` can be run any
//! number of times.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let ledger = db::connect(&config.ledger.path).await?;
    migrate_ledger(&ledger).await?;
    ledger.close().await;

    let warehouse = db::connect(&config.warehouse.path).await?;
    migrate_warehouse(&warehouse).await?;
    warehouse.close().await;

    Ok(())
}

/// Source-of-record tables.
pub async fn migrate_ledger(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            name TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // amount is a decimal string; date is RFC 3339 UTC
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity TEXT NOT NULL,
            type TEXT NOT NULL,
            amount TEXT NOT NULL,
            category TEXT NOT NULL,
            date TEXT NOT NULL,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_entity_date ON transactions(entity, date)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Analytical store tables.
pub async fn migrate_warehouse(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            entity TEXT NOT NULL,
            type TEXT NOT NULL,
            amount REAL NOT NULL,
            category TEXT NOT NULL,
            date TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            ledger_ts TEXT NOT NULL,
            ledger_id INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS monthly_category_expenses (
            entity TEXT NOT NULL,
            category TEXT NOT NULL,
            month_index INTEGER NOT NULL,
            monthly_expense REAL NOT NULL,
            PRIMARY KEY (entity, category, month_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS models (
            name TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            started_at INTEGER,
            trained_at INTEGER,
            params_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_expenses_entity_date ON expenses(entity, date)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_expenses_entity_ledger \
         ON expenses(entity, ledger_ts, ledger_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
