//! Typed errors for the seams where callers branch on the failure kind.
//!
//! Command-level plumbing uses `anyhow`; these enums travel inside
//! `anyhow::Error` and are recovered with `downcast_ref` where needed.

use thiserror::Error;

/// Failures talking to a remote message source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("message source rejected the credentials")]
    Unauthorized,
    #[error("message source returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("message source request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode message source response: {0}")]
    Decode(String),
}

/// Failures of the analytical store.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Another training job holds the model lock.
    #[error("model {model} is already being trained")]
    TrainingConflict { model: String },
    #[error("model {model} has not been trained")]
    ModelMissing { model: String },
    #[error("no aggregate rows to train model {model} on")]
    EmptyTrainingSet { model: String },
    #[error("training model {model} failed: {reason}")]
    Training { model: String, reason: String },
    #[error("warehouse query failed: {0}")]
    Database(#[from] sqlx::Error),
}

impl WarehouseError {
    pub fn is_training_conflict(&self) -> bool {
        matches!(self, WarehouseError::TrainingConflict { .. })
    }
}
