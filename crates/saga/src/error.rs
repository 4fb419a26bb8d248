//! Saga error types.

use common::{RepositoryError, SagaId, StepId};
use thiserror::Error;

use crate::state::SagaStatus;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga with this id.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// The saga has no step with this id.
    #[error("Step {step_id} not found in saga {saga_id}")]
    StepNotFound { saga_id: SagaId, step_id: StepId },

    /// Saga is in an invalid state for the requested operation.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: &'static str,
        actual: SagaStatus,
    },

    /// The step has used up its retries.
    #[error("Step '{step}' has reached its retry limit ({retry_count}/{max_retries})")]
    RetryLimitExceeded {
        step: String,
        retry_count: u32,
        max_retries: u32,
    },

    /// Some steps were already undone, so the saga cannot resume forward.
    #[error("Saga {0} has compensated steps and cannot be retried")]
    CompensationStarted(SagaId),

    /// Another step loop is driving this saga.
    #[error("Saga {0} is already being executed")]
    Busy(SagaId),

    /// Saga persistence failed.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
