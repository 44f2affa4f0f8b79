//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during scheduling operations.
///
/// Work-item failures never surface here. The scheduler only counts them.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid request category: {0}")]
    InvalidCategory(String),

    #[error("scheduler must be created inside a tokio runtime")]
    NoRuntime,

    #[error("config error: {0}")]
    Config(#[from] slicewise_core::CoreError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
