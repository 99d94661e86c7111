use crate::domain::error::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Oracle error: {0}")]
    Oracle(String),
    #[error("Scheduling failed: {0}")]
    SchedulingFailed(String),
    #[error("{0}")]
    Store(String),
    #[error("Import failed: {0}")]
    Import(String),
}
