//! Source-of-record transaction store.
//!
//! The ledger owns every transaction an entity has recorded. The forecast
//! engine only reads from it, through [`TransactionSource`]; the CLI writes
//! to it with `billcast ledger add`.
//!
//! Amounts are kept as decimal strings exactly as entered. Dates are stored
//! as RFC 3339 UTC strings with whole seconds and a `Z` suffix, so they
//! compare correctly as text and the first ten characters are the UTC
//! calendar day.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};

use billcast_core::models::{SyncWatermark, Transaction};

use crate::config::Config;
use crate::db;

/// Read access to the ledger.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn entity_exists(&self, entity: &str) -> Result<bool>;

    /// Transactions of `entity` positioned strictly after `after` in
    /// `(date, id)` order, oldest first. `None` returns all of them.
    async fn transactions_after(
        &self,
        entity: &str,
        after: Option<SyncWatermark>,
    ) -> Result<Vec<Transaction>>;
}

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(config: &Config) -> Result<Self> {
        Ok(Self::new(db::connect(&config.ledger.path).await?))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn add_entity(&self, id: &str, name: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO entities (id, name) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET name = COALESCE(excluded.name, entities.name)",
        )
        .bind(id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_transaction(&self, txn: &Transaction) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO transactions (entity, type, amount, category, date, description) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&txn.entity)
        .bind(&txn.kind)
        .bind(&txn.amount)
        .bind(&txn.category)
        .bind(ledger_timestamp(&txn.date))
        .bind(&txn.description)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl TransactionSource for SqliteLedger {
    async fn entity_exists(&self, entity: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM entities WHERE id = ?")
            .bind(entity)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn transactions_after(
        &self,
        entity: &str,
        after: Option<SyncWatermark>,
    ) -> Result<Vec<Transaction>> {
        let after_ts = after.map(|w| ledger_timestamp(&w.date));
        let after_id = after.map(|w| w.id);
        let rows = sqlx::query(
            "SELECT id, entity, type, amount, category, date, description FROM transactions \
             WHERE entity = ? AND (? IS NULL OR date > ? OR (date = ? AND id > ?)) \
             ORDER BY date, id",
        )
        .bind(entity)
        .bind(after_ts.clone())
        .bind(after_ts.clone())
        .bind(after_ts)
        .bind(after_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw_date: String = row.get("date");
            let date = match DateTime::parse_from_rfc3339(&raw_date) {
                Ok(d) => d.with_timezone(&Utc),
                Err(e) => {
                    log::warn!("Skipping ledger row with invalid date {:?}: {}", raw_date, e);
                    continue;
                }
            };
            out.push(Transaction {
                id: Some(row.get("id")),
                entity: row.get("entity"),
                kind: row.get("type"),
                amount: row.get("amount"),
                category: row.get("category"),
                date,
                description: row.get("description"),
            });
        }
        Ok(out)
    }
}

/// Stored text form of a ledger date.
pub fn ledger_timestamp(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
pub fn parse_ledger_date(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD or RFC 3339", s))
}

/// `billcast ledger add-entity`
pub async fn run_add_entity(config: &Config, id: &str, name: Option<&str>) -> Result<()> {
    let ledger = SqliteLedger::open(config).await?;
    ledger.add_entity(id, name).await?;
    ledger.close().await;
    println!("entity {} saved", id);
    Ok(())
}

/// `billcast ledger add`
pub async fn run_add_transaction(config: &Config, txn: Transaction) -> Result<()> {
    let amount: f64 = txn
        .amount
        .trim()
        .parse()
        .with_context(|| format!("Invalid amount '{}'", txn.amount))?;
    if !amount.is_finite() {
        anyhow::bail!("Invalid amount '{}'", txn.amount);
    }

    let ledger = SqliteLedger::open(config).await?;
    if !ledger.entity_exists(&txn.entity).await? {
        ledger.add_entity(&txn.entity, None).await?;
    }
    let id = ledger.add_transaction(&txn).await?;
    ledger.close().await;

    println!(
        "transaction {} saved: {} {} {} on {}",
        id,
        txn.kind,
        txn.amount,
        txn.category,
        txn.date.format("%Y-%m-%d")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_ledger;

    async fn ledger() -> SqliteLedger {
        let pool = db::connect_memory().await.unwrap();
        migrate_ledger(&pool).await.unwrap();
        SqliteLedger::new(pool)
    }

    fn txn(entity: &str, amount: &str, date: &str) -> Transaction {
        Transaction {
            id: None,
            entity: entity.to_string(),
            kind: "EXPENSE".to_string(),
            amount: amount.to_string(),
            category: "Food".to_string(),
            date: parse_ledger_date(date).unwrap(),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_transactions_after_position() {
        let ledger = ledger().await;
        ledger.add_transaction(&txn("e1", "10", "2024-01-01")).await.unwrap();
        let id = ledger
            .add_transaction(&txn("e1", "20", "2024-01-02T18:30:00Z"))
            .await
            .unwrap();
        ledger.add_transaction(&txn("e1", "30", "2024-01-03")).await.unwrap();
        ledger.add_transaction(&txn("e2", "40", "2024-01-05")).await.unwrap();

        let all = ledger.transactions_after("e1", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].id, Some(id));

        let watermark = SyncWatermark {
            date: parse_ledger_date("2024-01-02T18:30:00Z").unwrap(),
            id,
        };
        let newer = ledger.transactions_after("e1", Some(watermark)).await.unwrap();
        let amounts: Vec<&str> = newer.iter().map(|t| t.amount.as_str()).collect();
        assert_eq!(amounts, vec!["30"]);
    }

    #[tokio::test]
    async fn test_transactions_after_same_timestamp_uses_id() {
        let ledger = ledger().await;
        let first = ledger.add_transaction(&txn("e1", "10", "2024-03-05")).await.unwrap();
        // recorded later, same date-only day
        ledger.add_transaction(&txn("e1", "15", "2024-03-05")).await.unwrap();
        ledger
            .add_transaction(&txn("e1", "25", "2024-03-05T18:00:00Z"))
            .await
            .unwrap();

        let watermark = SyncWatermark {
            date: parse_ledger_date("2024-03-05").unwrap(),
            id: first,
        };
        let newer = ledger.transactions_after("e1", Some(watermark)).await.unwrap();
        let amounts: Vec<&str> = newer.iter().map(|t| t.amount.as_str()).collect();
        assert_eq!(amounts, vec!["15", "25"]);
    }

    #[tokio::test]
    async fn test_entity_exists() {
        let ledger = ledger().await;
        assert!(!ledger.entity_exists("e1").await.unwrap());
        ledger.add_entity("e1", Some("Asha")).await.unwrap();
        ledger.add_entity("e1", None).await.unwrap();
        assert!(ledger.entity_exists("e1").await.unwrap());
    }

    #[test]
    fn test_parse_ledger_date() {
        assert_eq!(
            parse_ledger_date("2022-01-15").unwrap().to_rfc3339(),
            "2022-01-15T00:00:00+00:00"
        );
        assert_eq!(
            parse_ledger_date("2022-01-15T23:30:00+05:30")
                .unwrap()
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            "2022-01-15 18:00"
        );
        assert!(parse_ledger_date("15/01/2022").is_err());
    }
}
