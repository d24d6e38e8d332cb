//! Sync-and-forecast engine.
//!
//! One forecast request runs two phases for one entity:
//!
//! 1. **Sync.** Read the entity's watermark (latest synced ledger position)
//!    from the warehouse, pull every ledger transaction after it, coerce
//!    the rows to the warehouse shape and append them. An insertion
//!    failure is logged and does not block the forecast; failing to read
//!    the watermark or the ledger does.
//! 2. **Train and predict.** Rebuild the monthly aggregate, retrain the
//!    model, and predict every month of the window for each category the
//!    entity has spent in. A training conflict (another request is already
//!    training) is logged and the previously trained model is used.
//!
//! Running sync twice with no new ledger activity inserts nothing the
//! second time.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

use billcast_core::calendar::{first_day, forecast_window, last_day};
use billcast_core::models::{ForecastReport, SyncWatermark, Transaction, WarehouseRow};

use crate::config::{Config, ForecastConfig};
use crate::error::WarehouseError;
use crate::ledger::{SqliteLedger, TransactionSource};
use crate::warehouse::{SqliteWarehouse, Warehouse};

/// Error message for a forecast against an entity the ledger doesn't know.
pub const UNKNOWN_ENTITY: &str = "User not found in database";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub watermark: Option<SyncWatermark>,
    /// Ledger rows newer than the watermark.
    pub fetched: usize,
    /// Rows dropped because their amount is not a number.
    pub skipped: usize,
    pub inserted: u64,
    /// Set when the append failed; the forecast still runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_error: Option<String>,
}

pub struct SyncForecastEngine {
    ledger: Arc<dyn TransactionSource>,
    warehouse: Arc<dyn Warehouse>,
    settings: ForecastConfig,
}

impl SyncForecastEngine {
    pub fn new(
        ledger: Arc<dyn TransactionSource>,
        warehouse: Arc<dyn Warehouse>,
        settings: ForecastConfig,
    ) -> Self {
        Self {
            ledger,
            warehouse,
            settings,
        }
    }

    pub async fn entity_exists(&self, entity: &str) -> Result<bool> {
        self.ledger.entity_exists(entity).await
    }

    pub async fn sync_entity(&self, entity: &str) -> Result<SyncReport> {
        let watermark = self
            .warehouse
            .watermark(entity)
            .await
            .context("Failed to read the sync watermark")?;

        let transactions = self
            .ledger
            .transactions_after(entity, watermark)
            .await
            .context("Failed to read ledger transactions")?;

        let mut report = SyncReport {
            watermark,
            fetched: transactions.len(),
            ..SyncReport::default()
        };
        if transactions.is_empty() {
            log::debug!("No new transactions for {}", entity);
            return Ok(report);
        }

        let rows: Vec<WarehouseRow> = transactions
            .iter()
            .filter_map(|txn| match to_warehouse_row(txn) {
                Ok(row) => Some(row),
                Err(reason) => {
                    log::warn!("Skipping transaction {:?} for {}: {}", txn.id, entity, reason);
                    None
                }
            })
            .collect();
        report.skipped = transactions.len() - rows.len();

        match self.warehouse.append_rows(&rows).await {
            Ok(n) => {
                report.inserted = n;
                log::info!("Synced {} transactions for {}", n, entity);
            }
            Err(e) => {
                log::warn!("Failed to append transactions for {}: {}", entity, e);
                report.insert_error = Some(e.to_string());
            }
        }
        Ok(report)
    }

    pub async fn train_and_predict(&self, entity: &str, today: NaiveDate) -> Result<ForecastReport> {
        let model = self.settings.model.as_str();
        self.warehouse
            .rebuild_monthly_aggregate(&self.settings.expense_type)
            .await
            .context("Failed to rebuild the monthly aggregate")?;

        match self.warehouse.train_model(model).await {
            Ok(summary) => log::info!("Trained {} on {} rows", summary.model, summary.samples),
            Err(e) if e.is_training_conflict() => {
                log::warn!("{}; predicting with the previous model", e);
            }
            Err(WarehouseError::EmptyTrainingSet { .. }) => {
                log::info!("Nothing to train on yet");
                return Ok(ForecastReport::default());
            }
            Err(e) => return Err(e.into()),
        }

        let window = forecast_window(today, self.settings.months_back, self.settings.months_ahead);
        let mut predictions: Vec<_> = self
            .warehouse
            .predict(model, entity, window.clone())
            .await?
            .into_iter()
            .filter(|p| p.predicted_value.is_finite() && p.predicted_value > 0.0)
            .collect();
        predictions.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then(a.month_index.cmp(&b.month_index))
        });

        let transactions = match (first_day(*window.start()), last_day(*window.end())) {
            (Some(from), Some(to)) => {
                self.warehouse
                    .expense_points(entity, &self.settings.expense_type, from, to)
                    .await?
            }
            _ => Vec::new(),
        };

        Ok(ForecastReport {
            predictions,
            transactions,
        })
    }

    /// Sync, then forecast.
    pub async fn run(&self, entity: &str, today: NaiveDate) -> Result<ForecastReport> {
        self.sync_entity(entity).await?;
        self.train_and_predict(entity, today).await
    }
}

fn to_warehouse_row(txn: &Transaction) -> std::result::Result<WarehouseRow, String> {
    let amount = match txn.amount.trim().parse::<f64>() {
        Ok(a) if a.is_finite() => a,
        _ => return Err(format!("amount {:?} is not a number", txn.amount)),
    };
    let ledger_id = txn.id.ok_or("no ledger id")?;
    Ok(WarehouseRow {
        entity: txn.entity.clone(),
        kind: txn.kind.clone(),
        amount,
        category: txn.category.clone(),
        date: txn.date.date_naive(),
        description: txn.description.clone().unwrap_or_default(),
        ledger_ts: txn.date,
        ledger_id,
    })
}

/// `billcast forecast`
pub async fn run_forecast(config: &Config, entity: &str, sync_only: bool) -> Result<()> {
    let ledger = Arc::new(SqliteLedger::open(config).await?);
    let warehouse = Arc::new(SqliteWarehouse::open(config).await?);
    let engine = SyncForecastEngine::new(
        ledger.clone(),
        warehouse.clone(),
        config.forecast.clone(),
    );

    if !engine.entity_exists(entity).await? {
        anyhow::bail!("{}: {}", UNKNOWN_ENTITY, entity);
    }

    let output = if sync_only {
        serde_json::to_string_pretty(&engine.sync_entity(entity).await?)?
    } else {
        let today = chrono::Local::now().date_naive();
        serde_json::to_string_pretty(&engine.run(entity, today).await?)?
    };
    println!("{}", output);

    ledger.close().await;
    warehouse.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::ledger::parse_ledger_date;
    use crate::migrate::{migrate_ledger, migrate_warehouse};
    use crate::warehouse::TrainingSummary;
    use billcast_core::models::{PredictionRow, TransactionPoint};
    use std::ops::RangeInclusive;

    async fn stores() -> (Arc<SqliteLedger>, Arc<SqliteWarehouse>) {
        let ledger_pool = db::connect_memory().await.unwrap();
        migrate_ledger(&ledger_pool).await.unwrap();
        let warehouse_pool = db::connect_memory().await.unwrap();
        migrate_warehouse(&warehouse_pool).await.unwrap();
        (
            Arc::new(SqliteLedger::new(ledger_pool)),
            Arc::new(SqliteWarehouse::new(warehouse_pool, 600)),
        )
    }

    fn txn(kind: &str, amount: &str, category: &str, date: &str) -> Transaction {
        Transaction {
            id: None,
            entity: "e1".to_string(),
            kind: kind.to_string(),
            amount: amount.to_string(),
            category: category.to_string(),
            date: parse_ledger_date(date).unwrap(),
            description: None,
        }
    }

    fn engine(ledger: Arc<SqliteLedger>, warehouse: Arc<dyn Warehouse>) -> SyncForecastEngine {
        SyncForecastEngine::new(ledger, warehouse, ForecastConfig::default())
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (ledger, warehouse) = stores().await;
        ledger.add_entity("e1", None).await.unwrap();
        ledger
            .add_transaction(&txn("EXPENSE", "120.50", "Food", "2022-01-15"))
            .await
            .unwrap();
        ledger
            .add_transaction(&txn("INCOME", "3000", "Salary", "2022-01-31"))
            .await
            .unwrap();
        let engine = engine(ledger.clone(), warehouse.clone());

        let first = engine.sync_entity("e1").await.unwrap();
        assert_eq!(first.watermark, None);
        assert_eq!(first.inserted, 2);

        let second = engine.sync_entity("e1").await.unwrap();
        let watermark = second.watermark.expect("watermark after first sync");
        assert_eq!(watermark.date, parse_ledger_date("2022-01-31").unwrap());
        assert_eq!(second.fetched, 0);
        assert_eq!(second.inserted, 0);
        assert_eq!(warehouse.expense_count("e1").await.unwrap(), 2);

        ledger
            .add_transaction(&txn("EXPENSE", "40", "Food", "2022-02-02"))
            .await
            .unwrap();
        let third = engine.sync_entity("e1").await.unwrap();
        assert_eq!(third.inserted, 1);
        assert_eq!(warehouse.expense_count("e1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_non_numeric_amount_is_skipped() {
        let (ledger, warehouse) = stores().await;
        ledger
            .add_transaction(&txn("EXPENSE", "lots", "Food", "2022-01-15"))
            .await
            .unwrap();
        ledger
            .add_transaction(&txn("EXPENSE", "12", "Food", "2022-01-16"))
            .await
            .unwrap();
        let report = engine(ledger, warehouse).sync_entity("e1").await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn test_single_expense_forecast() {
        let (ledger, warehouse) = stores().await;
        ledger.add_entity("e1", None).await.unwrap();
        ledger
            .add_transaction(&txn("EXPENSE", "500", "Food", "2022-01-15"))
            .await
            .unwrap();

        let report = engine(ledger, warehouse)
            .run("e1", day(2022, 3, 10))
            .await
            .unwrap();

        let january = report
            .predictions
            .iter()
            .find(|p| p.category == "Food" && p.month_index == 24265)
            .expect("prediction for January 2022");
        assert!(january.predicted_value > 0.0);
        assert!(report.predictions.iter().all(|p| p.predicted_value > 0.0));
        assert_eq!(report.transactions.len(), 1);
        assert_eq!(report.transactions[0].date, day(2022, 1, 15));
        assert_eq!(report.transactions[0].amount, 500.0);
    }

    #[tokio::test]
    async fn test_predictions_sorted_by_category_then_month() {
        let (ledger, warehouse) = stores().await;
        for (amount, category, date) in [
            ("300", "Rent", "2022-01-03"),
            ("80", "Food", "2022-01-10"),
            ("320", "Rent", "2022-02-03"),
            ("90", "Food", "2022-02-10"),
        ] {
            ledger
                .add_transaction(&txn("EXPENSE", amount, category, date))
                .await
                .unwrap();
        }
        let report = engine(ledger, warehouse)
            .run("e1", day(2022, 2, 20))
            .await
            .unwrap();
        let keys: Vec<(String, i64)> = report
            .predictions
            .iter()
            .map(|p| (p.category.clone(), p.month_index))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(keys.iter().any(|(c, _)| c == "Food"));
        assert!(keys.iter().any(|(c, _)| c == "Rent"));
    }

    #[tokio::test]
    async fn test_no_history_is_empty_forecast() {
        let (ledger, warehouse) = stores().await;
        ledger.add_entity("e1", None).await.unwrap();
        let report = engine(ledger, warehouse)
            .run("e1", day(2022, 3, 10))
            .await
            .unwrap();
        assert!(report.predictions.is_empty());
        assert!(report.transactions.is_empty());
    }

    /// Delegates to SQLite but always reports a held training lock, and can
    /// be told to fail every append.
    struct ContendedWarehouse {
        inner: Arc<SqliteWarehouse>,
        fail_append: bool,
    }

    #[async_trait::async_trait]
    impl Warehouse for ContendedWarehouse {
        async fn watermark(&self, entity: &str) -> Result<Option<SyncWatermark>, WarehouseError> {
            self.inner.watermark(entity).await
        }

        async fn append_rows(&self, rows: &[WarehouseRow]) -> Result<u64, WarehouseError> {
            if self.fail_append {
                return Err(WarehouseError::Database(sqlx::Error::PoolClosed));
            }
            self.inner.append_rows(rows).await
        }

        async fn rebuild_monthly_aggregate(&self, t: &str) -> Result<u64, WarehouseError> {
            self.inner.rebuild_monthly_aggregate(t).await
        }

        async fn train_model(&self, model: &str) -> Result<TrainingSummary, WarehouseError> {
            Err(WarehouseError::TrainingConflict {
                model: model.to_string(),
            })
        }

        async fn predict(
            &self,
            model: &str,
            entity: &str,
            months: RangeInclusive<i64>,
        ) -> Result<Vec<PredictionRow>, WarehouseError> {
            self.inner.predict(model, entity, months).await
        }

        async fn expense_points(
            &self,
            entity: &str,
            expense_type: &str,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<TransactionPoint>, WarehouseError> {
            self.inner.expense_points(entity, expense_type, from, to).await
        }
    }

    #[tokio::test]
    async fn test_training_conflict_uses_previous_model() {
        let (ledger, warehouse) = stores().await;
        ledger
            .add_transaction(&txn("EXPENSE", "500", "Food", "2022-01-15"))
            .await
            .unwrap();
        engine(ledger.clone(), warehouse.clone())
            .run("e1", day(2022, 3, 10))
            .await
            .unwrap();

        ledger
            .add_transaction(&txn("EXPENSE", "700", "Food", "2022-02-15"))
            .await
            .unwrap();
        let contended = Arc::new(ContendedWarehouse {
            inner: warehouse.clone(),
            fail_append: false,
        });
        let report = engine(ledger, contended)
            .run("e1", day(2022, 3, 10))
            .await
            .unwrap();
        assert!(!report.predictions.is_empty());
        assert_eq!(report.transactions.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_failure_does_not_block_forecast() {
        let (ledger, warehouse) = stores().await;
        ledger
            .add_transaction(&txn("EXPENSE", "500", "Food", "2022-01-15"))
            .await
            .unwrap();
        engine(ledger.clone(), warehouse.clone())
            .run("e1", day(2022, 3, 10))
            .await
            .unwrap();

        ledger
            .add_transaction(&txn("EXPENSE", "900", "Food", "2022-02-15"))
            .await
            .unwrap();
        let failing = Arc::new(ContendedWarehouse {
            inner: warehouse.clone(),
            fail_append: true,
        });
        let engine = engine(ledger, failing);
        let sync = engine.sync_entity("e1").await.unwrap();
        assert_eq!(sync.fetched, 1);
        assert_eq!(sync.inserted, 0);
        assert!(sync.insert_error.is_some());

        let report = engine.run("e1", day(2022, 3, 10)).await.unwrap();
        assert!(!report.predictions.is_empty());
        // stale data: only the first transaction reached the warehouse
        assert_eq!(report.transactions.len(), 1);
    }

    #[tokio::test]
    async fn test_same_day_transaction_after_sync_is_synced() {
        let (ledger, warehouse) = stores().await;
        ledger.add_entity("e1", None).await.unwrap();
        ledger
            .add_transaction(&txn("EXPENSE", "100", "Food", "2024-03-05T09:00:00Z"))
            .await
            .unwrap();
        let engine = engine(ledger.clone(), warehouse.clone());
        assert_eq!(engine.sync_entity("e1").await.unwrap().inserted, 1);

        // recorded after the sync, on the watermark's day
        ledger
            .add_transaction(&txn("EXPENSE", "40", "Food", "2024-03-05T18:00:00Z"))
            .await
            .unwrap();
        ledger
            .add_transaction(&txn("EXPENSE", "25", "Food", "2024-03-05T09:00:00Z"))
            .await
            .unwrap();
        let second = engine.sync_entity("e1").await.unwrap();
        assert_eq!(second.fetched, 2);
        assert_eq!(second.inserted, 2);
        assert_eq!(warehouse.expense_count("e1").await.unwrap(), 3);

        let third = engine.sync_entity("e1").await.unwrap();
        assert_eq!(third.fetched, 0);
        assert_eq!(warehouse.expense_count("e1").await.unwrap(), 3);
    }

    #[test]
    fn test_to_warehouse_row() {
        let mut t = txn("EXPENSE", " 12.5 ", "Food", "2022-01-31T23:30:00Z");
        assert!(to_warehouse_row(&t).unwrap_err().contains("ledger id"));

        t.id = Some(4);
        let row = to_warehouse_row(&t).unwrap();
        assert_eq!(row.amount, 12.5);
        assert_eq!(row.date, day(2022, 1, 31));
        assert_eq!(row.ledger_ts, t.date);
        assert_eq!(row.ledger_id, 4);

        t.amount = "NaN".to_string();
        assert!(to_warehouse_row(&t).is_err());
    }
}
