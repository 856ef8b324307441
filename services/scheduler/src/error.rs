//! Scheduler errors.

use thiserror::Error;

use crate::offer::RequirementError;
use crate::store::StoreError;

/// Process exit status after a fatal scheduler error.
pub const FATAL_EXIT_CODE: i32 = 2;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("requirement error: {0}")]
    Requirement(#[from] RequirementError),

    /// The scheduler cannot continue; the process must exit.
    #[error("fatal scheduler error: {0}")]
    Fatal(String),
}

impl SchedulerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
