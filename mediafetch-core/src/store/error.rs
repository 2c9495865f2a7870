use std::path::PathBuf;

use thiserror::Error;

use super::models::TaskStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open task database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on task database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("task store path not configured")]
    MissingStore,
    #[error("invalid task status: {0}")]
    InvalidStatus(String),
    #[error("task {task_id} cannot transition to {status}")]
    InvalidTransition { task_id: i64, status: TaskStatus },
    #[error("retention of {hours} hours does not yield an eviction cutoff")]
    InvalidRetention { hours: i64 },
    #[error("task not found: {0}")]
    NotFound(i64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
