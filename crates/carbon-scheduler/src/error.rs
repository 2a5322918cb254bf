//! Scheduler error types.

use thiserror::Error;

use carbon_placement::SelectionError;
use carbon_signal::SignalError;

/// Errors that abort a single scheduling cycle.
///
/// None of these stop the loop; the cycle is skipped and logged.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("cycle worker failed: {0}")]
    Worker(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
