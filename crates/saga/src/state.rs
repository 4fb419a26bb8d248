//! Saga and step state machines.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Running ──┬──► Completed
///                       ├──► Failed ──► Compensating
///                       └──► Compensating ──┬──► Compensated
///                                           └──► Failed
///
/// Pending | Running | Compensating ──► Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Saga has been built but not started.
    #[default]
    Pending,

    /// Steps are being executed in order.
    Running,

    /// Every step completed (terminal state).
    Completed,

    /// A step or a compensation failed.
    Failed,

    /// Completed steps are being undone in reverse order.
    Compensating,

    /// Every compensable completed step was undone (terminal state).
    Compensated,

    /// Stopped by an operator (terminal state).
    Aborted,
}

impl SagaStatus {
    /// Returns true if the saga can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, SagaStatus::Pending)
    }

    /// Returns true if compensation may be requested.
    pub fn can_compensate(&self) -> bool {
        matches!(
            self,
            SagaStatus::Running | SagaStatus::Failed | SagaStatus::Aborted
        )
    }

    /// Returns true if a step of the saga may be retried.
    pub fn can_retry(&self) -> bool {
        matches!(
            self,
            SagaStatus::Pending | SagaStatus::Running | SagaStatus::Failed | SagaStatus::Compensated
        )
    }

    /// Returns true if the saga may be aborted.
    pub fn can_abort(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this is a terminal state.
    ///
    /// `Failed` is terminal for the execution loop, but an operator can still
    /// compensate or retry from it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed
                | SagaStatus::Failed
                | SagaStatus::Compensated
                | SagaStatus::Aborted
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "Pending",
            SagaStatus::Running => "Running",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Compensated => "Compensated",
            SagaStatus::Aborted => "Aborted",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(SagaStatus::Pending),
            "Running" => Ok(SagaStatus::Running),
            "Completed" => Ok(SagaStatus::Completed),
            "Failed" => Ok(SagaStatus::Failed),
            "Compensating" => Ok(SagaStatus::Compensating),
            "Compensated" => Ok(SagaStatus::Compensated),
            "Aborted" => Ok(SagaStatus::Aborted),
            other => Err(format!("unknown saga status '{other}'")),
        }
    }
}

/// The state of a single step.
///
/// Forward: `Pending ──► Running ──► Completed | Failed`.
/// A `Completed` step is pending compensation; during compensation it moves
/// `CompensationRunning ──► CompensationCompleted | CompensationFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    CompensationRunning,
    CompensationCompleted,
    CompensationFailed,
}

impl StepStatus {
    /// Returns true if the step's forward action took effect and has not
    /// been successfully undone.
    pub fn needs_compensation(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::CompensationFailed)
    }

    /// Returns true once compensation has been attempted on the step.
    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            StepStatus::CompensationRunning
                | StepStatus::CompensationCompleted
                | StepStatus::CompensationFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::Running => "Running",
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
            StepStatus::CompensationRunning => "CompensationRunning",
            StepStatus::CompensationCompleted => "CompensationCompleted",
            StepStatus::CompensationFailed => "CompensationFailed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
