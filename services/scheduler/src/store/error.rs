//! Task store errors.

use thiserror::Error;

/// Errors from task store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// The status belongs to a task ID that has since been replaced.
    #[error("stale status for {name}: task {task_id} is no longer current")]
    StaleStatus { name: String, task_id: String },

    #[error("invalid task id: {0}")]
    InvalidTaskId(#[from] ksched_id::IdError),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Result type for task store operations.
pub type StoreResult<T> = Result<T, StoreError>;
