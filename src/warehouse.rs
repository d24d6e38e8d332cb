//! Analytical store.
//!
//! The [`Warehouse`] trait is what the forecast engine needs from an
//! analytical backend: a watermark query, append-only row insertion, an
//! aggregate rebuild, and model train/predict verbs. [`SqliteWarehouse`]
//! implements it on SQLite with the in-crate [`LinearModel`].
//!
//! # Tables
//!
//! | Table | Contents |
//! |-------|----------|
//! | `expenses` | append-only synced rows, `date` as `YYYY-MM-DD`, plus the ledger position each row came from |
//! | `monthly_category_expenses` | derived; rebuilt on every forecast |
//! | `models` | one row per model: status, lock timestamp, parameters |
//!
//! # Training lock
//!
//! Training first flips the model row to `status = 'training'` with a
//! single conditional upsert. The upsert only succeeds when the row is not
//! already training, or its lock is older than the configured lock age. A
//! refused upsert is reported as [`WarehouseError::TrainingConflict`]; the
//! previous parameters stay in place and remain usable for prediction.
//! Once acquired, the lock is always released: `ready` on success, `empty`
//! or `failed` otherwise.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use std::ops::RangeInclusive;

use billcast_core::models::{PredictionRow, SyncWatermark, TransactionPoint, WarehouseRow};

use crate::config::Config;
use crate::db;
use crate::error::WarehouseError;
use crate::ledger::ledger_timestamp;
use crate::regression::{LinearModel, TrainingRow, DEFAULT_RIDGE};

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub model: String,
    pub samples: usize,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Latest ledger position among the entity's synced rows.
    async fn watermark(&self, entity: &str) -> Result<Option<SyncWatermark>, WarehouseError>;

    /// Append rows; returns how many were written.
    async fn append_rows(&self, rows: &[WarehouseRow]) -> Result<u64, WarehouseError>;

    /// Recompute the monthly aggregate: per (entity, category, month index),
    /// the sum of amounts whose type is `expense_type`.
    async fn rebuild_monthly_aggregate(&self, expense_type: &str) -> Result<u64, WarehouseError>;

    async fn train_model(&self, model: &str) -> Result<TrainingSummary, WarehouseError>;

    /// Predicted monthly value for every category the entity has in the
    /// aggregate, for every month in `months`.
    async fn predict(
        &self,
        model: &str,
        entity: &str,
        months: RangeInclusive<i64>,
    ) -> Result<Vec<PredictionRow>, WarehouseError>;

    async fn expense_points(
        &self,
        entity: &str,
        expense_type: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TransactionPoint>, WarehouseError>;
}

pub struct SqliteWarehouse {
    pool: SqlitePool,
    lock_secs: i64,
}

impl SqliteWarehouse {
    pub fn new(pool: SqlitePool, lock_secs: i64) -> Self {
        Self { pool, lock_secs }
    }

    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.warehouse.path).await?;
        Ok(Self::new(pool, config.forecast.training_lock_secs))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn expense_count(&self, entity: &str) -> Result<i64, WarehouseError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM expenses WHERE entity = ?")
            .bind(entity)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn acquire_training_lock(&self, model: &str) -> Result<(), WarehouseError> {
        let now = Utc::now().timestamp();
        let stale_before = now - self.lock_secs;
        let result = sqlx::query(
            r#"
            INSERT INTO models (name, status, started_at) VALUES (?, 'training', ?)
            ON CONFLICT(name) DO UPDATE SET status = 'training', started_at = excluded.started_at
            WHERE models.status != 'training' OR models.started_at IS NULL OR models.started_at < ?
            "#,
        )
        .bind(model)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WarehouseError::TrainingConflict {
                model: model.to_string(),
            });
        }
        Ok(())
    }

    async fn release_training_lock(&self, model: &str, status: &str) -> Result<(), WarehouseError> {
        sqlx::query("UPDATE models SET status = ?, started_at = NULL WHERE name = ?")
            .bind(status)
            .bind(model)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn training_rows(&self) -> Result<Vec<TrainingRow>, WarehouseError> {
        let rows = sqlx::query(
            "SELECT entity, category, month_index, monthly_expense \
             FROM monthly_category_expenses ORDER BY entity, category, month_index",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TrainingRow {
                entity: row.get("entity"),
                category: row.get("category"),
                month_index: row.get("month_index"),
                value: row.get("monthly_expense"),
            })
            .collect())
    }

    async fn load_model(&self, model: &str) -> Result<LinearModel, WarehouseError> {
        let params: Option<String> =
            sqlx::query_scalar("SELECT params_json FROM models WHERE name = ?")
                .bind(model)
                .fetch_optional(&self.pool)
                .await?
                .flatten();

        let params = params.ok_or_else(|| WarehouseError::ModelMissing {
            model: model.to_string(),
        })?;
        serde_json::from_str(&params).map_err(|e| WarehouseError::Training {
            model: model.to_string(),
            reason: format!("stored parameters are unreadable: {}", e),
        })
    }

    /// Fit on the current aggregate and store the parameters, marking the
    /// model `ready`. The caller holds the training lock.
    async fn fit_and_store(&self, model: &str) -> Result<TrainingSummary, WarehouseError> {
        let training_error = |reason: String| WarehouseError::Training {
            model: model.to_string(),
            reason,
        };

        let rows = self.training_rows().await?;
        if rows.is_empty() {
            return Err(WarehouseError::EmptyTrainingSet {
                model: model.to_string(),
            });
        }

        let fitted =
            LinearModel::fit(&rows, DEFAULT_RIDGE).map_err(|e| training_error(e.to_string()))?;
        let params = serde_json::to_string(&fitted).map_err(|e| training_error(e.to_string()))?;

        sqlx::query(
            "UPDATE models SET status = 'ready', started_at = NULL, trained_at = ?, params_json = ? \
             WHERE name = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(params)
        .bind(model)
        .execute(&self.pool)
        .await?;

        Ok(TrainingSummary {
            model: model.to_string(),
            samples: fitted.samples,
        })
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn watermark(&self, entity: &str) -> Result<Option<SyncWatermark>, WarehouseError> {
        let latest: Option<(String, i64)> = sqlx::query_as(
            "SELECT ledger_ts, ledger_id FROM expenses WHERE entity = ? \
             ORDER BY ledger_ts DESC, ledger_id DESC LIMIT 1",
        )
        .bind(entity)
        .fetch_optional(&self.pool)
        .await?;

        let Some((raw, id)) = latest else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(date) => Ok(Some(SyncWatermark {
                date: date.with_timezone(&Utc),
                id,
            })),
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable watermark {:?} for {}: {}; syncing everything",
                    raw,
                    entity,
                    e
                );
                Ok(None)
            }
        }
    }

    async fn append_rows(&self, rows: &[WarehouseRow]) -> Result<u64, WarehouseError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO expenses \
                 (entity, type, amount, category, date, description, ledger_ts, ledger_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.entity)
            .bind(&row.kind)
            .bind(row.amount)
            .bind(&row.category)
            .bind(row.date.format("%Y-%m-%d").to_string())
            .bind(&row.description)
            .bind(ledger_timestamp(&row.ledger_ts))
            .bind(row.ledger_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn rebuild_monthly_aggregate(&self, expense_type: &str) -> Result<u64, WarehouseError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM monthly_category_expenses")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(
            r#"
            INSERT INTO monthly_category_expenses (entity, category, month_index, monthly_expense)
            SELECT
                entity,
                category,
                CAST(substr(date, 1, 4) AS INTEGER) * 12 + CAST(substr(date, 6, 2) AS INTEGER),
                SUM(CASE WHEN type = ? THEN amount ELSE 0 END)
            FROM expenses
            GROUP BY 1, 2, 3
            "#,
        )
        .bind(expense_type)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn train_model(&self, model: &str) -> Result<TrainingSummary, WarehouseError> {
        self.acquire_training_lock(model).await?;

        let result = self.fit_and_store(model).await;
        if let Err(e) = &result {
            let status = match e {
                WarehouseError::EmptyTrainingSet { .. } => "empty",
                _ => "failed",
            };
            if let Err(release) = self.release_training_lock(model, status).await {
                log::warn!("Failed to release training lock on {}: {}", model, release);
            }
        }
        result
    }

    async fn predict(
        &self,
        model: &str,
        entity: &str,
        months: RangeInclusive<i64>,
    ) -> Result<Vec<PredictionRow>, WarehouseError> {
        let fitted = self.load_model(model).await?;
        let categories: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT category FROM monthly_category_expenses WHERE entity = ? ORDER BY category",
        )
        .bind(entity)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(categories.len() * months.clone().count());
        for category in &categories {
            for month_index in months.clone() {
                out.push(PredictionRow {
                    category: category.clone(),
                    month_index,
                    predicted_value: fitted.predict(entity, category, month_index),
                });
            }
        }
        Ok(out)
    }

    async fn expense_points(
        &self,
        entity: &str,
        expense_type: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TransactionPoint>, WarehouseError> {
        let rows = sqlx::query(
            "SELECT date, amount FROM expenses \
             WHERE entity = ? AND type = ? AND date >= ? AND date <= ? ORDER BY date",
        )
        .bind(entity)
        .bind(expense_type)
        .bind(from.format("%Y-%m-%d").to_string())
        .bind(to.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw: String = row.get("date");
            match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
                Ok(date) => points.push(TransactionPoint {
                    date,
                    amount: row.get("amount"),
                }),
                Err(_) => log::warn!("Skipping warehouse row with invalid date {:?}", raw),
            }
        }
        Ok(points)
    }
}
