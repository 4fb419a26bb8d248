//! Saga and step records.

use chrono::{DateTime, TimeDelta, Utc};
use common::{SagaId, StepId};
use serde::{Deserialize, Serialize};

use crate::state::{SagaStatus, StepStatus};

/// Retry allowance given to a step unless overridden.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One action of a saga together with its optional compensating action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    pub id: StepId,
    /// Zero-based position within the saga.
    pub order: usize,
    pub name: String,
    pub action_type: String,
    pub action_payload: String,
    pub compensation_action_type: Option<String>,
    pub compensation_payload: Option<String>,
    pub status: StepStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub response_payload: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub compensated_at: Option<DateTime<Utc>>,
}

impl SagaStep {
    /// Creates a pending step with no compensation.
    pub fn new(
        name: impl Into<String>,
        action_type: impl Into<String>,
        action_payload: impl Into<String>,
    ) -> Self {
        Self {
            id: StepId::new(),
            order: 0,
            name: name.into(),
            action_type: action_type.into(),
            action_payload: action_payload.into(),
            compensation_action_type: None,
            compensation_payload: None,
            status: StepStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error_message: None,
            response_payload: None,
            started_at: None,
            completed_at: None,
            compensated_at: None,
        }
    }

    pub fn with_compensation(
        mut self,
        action_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        self.compensation_action_type = Some(action_type.into());
        self.compensation_payload = Some(payload.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// True when both a compensation action type and payload are present.
    pub fn has_compensation(&self) -> bool {
        self.compensation_action_type.is_some() && self.compensation_payload.is_some()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        self.error_message = None;
    }

    pub(crate) fn mark_completed(&mut self, response: String) {
        self.status = StepStatus::Completed;
        self.response_payload = Some(response);
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.status = StepStatus::Failed;
        self.error_message = Some(error);
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn mark_compensation_running(&mut self) {
        self.status = StepStatus::CompensationRunning;
    }

    pub(crate) fn mark_compensation_completed(&mut self) {
        self.status = StepStatus::CompensationCompleted;
        self.compensated_at = Some(Utc::now());
    }

    pub(crate) fn mark_compensation_failed(&mut self, error: String) {
        self.status = StepStatus::CompensationFailed;
        self.error_message = Some(error);
    }

    /// Puts the step back to `Pending` and consumes one retry.
    pub(crate) fn reset_for_retry(&mut self) {
        self.status = StepStatus::Pending;
        self.retry_count += 1;
        self.error_message = None;
        self.response_payload = None;
        self.started_at = None;
        self.completed_at = None;
        self.compensated_at = None;
    }
}

/// A long-running transaction made of ordered steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saga {
    pub id: SagaId,
    /// Caller-supplied key tying the saga to a business transaction.
    pub correlation_id: String,
    pub name: String,
    pub status: SagaStatus,
    /// Index of the next step to run; equals `steps.len()` once every step completed.
    pub current_step_index: usize,
    pub steps: Vec<SagaStep>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Absolute deadline fixed at creation.
    pub timeout_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl Saga {
    /// Creates a pending saga whose deadline is `timeout` from now.
    pub fn new(
        name: impl Into<String>,
        correlation_id: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let now = Utc::now();
        let timeout_at = TimeDelta::from_std(timeout)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            id: SagaId::new(),
            correlation_id: correlation_id.into(),
            name: name.into(),
            status: SagaStatus::Pending,
            current_step_index: 0,
            steps: Vec::new(),
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            timeout_at,
            error_message: None,
        }
    }

    /// Appends a step, assigning it the next order.
    pub fn with_step(mut self, mut step: SagaStep) -> Self {
        step.order = self.steps.len();
        self.steps.push(step);
        self
    }

    pub fn with_steps(self, steps: impl IntoIterator<Item = SagaStep>) -> Self {
        steps.into_iter().fold(self, Saga::with_step)
    }

    /// Overrides the deadline.
    pub fn with_timeout_at(mut self, timeout_at: DateTime<Utc>) -> Self {
        self.timeout_at = timeout_at;
        self
    }

    pub fn current_step(&self) -> Option<&SagaStep> {
        self.steps.get(self.current_step_index)
    }

    pub fn step(&self, step_id: StepId) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_mut(&mut self, step_id: StepId) -> Option<&mut SagaStep> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        now > self.timeout_at
    }

    /// Returns true if any step has been through compensation. Such a saga
    /// cannot run forward again without re-applying the undone steps.
    pub fn compensation_started(&self) -> bool {
        self.steps.iter().any(|step| step.status.is_compensation())
    }

    /// Indices of steps whose effects still need undoing, last step first.
    pub fn steps_to_compensate(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.status.needs_compensation())
            .map(|(index, _)| index)
            .collect();
        indices.sort_by_key(|&index| std::cmp::Reverse(self.steps[index].order));
        indices
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn three_step_saga() -> Saga {
        Saga::new("checkout", "order-1", Duration::from_secs(60)).with_steps([
            SagaStep::new("reserve", "http.POST.inventory", "{}")
                .with_compensation("http.DELETE.inventory", "{}"),
            SagaStep::new("charge", "http.POST.payments", "{}"),
            SagaStep::new("ship", "broker.publish.shipping.create", "{}"),
        ])
    }

    #[test]
    fn test_new_saga_is_pending() {
        let saga = three_step_saga();
        assert_eq!(saga.status, SagaStatus::Pending);
        assert_eq!(saga.current_step_index, 0);
        assert!(saga.timeout_at > saga.created_at);
        assert!(saga.started_at.is_none());
    }

    #[test]
    fn test_steps_receive_sequential_order() {
        let saga = three_step_saga();
        let orders: Vec<_> = saga.steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, [0, 1, 2]);
        assert_eq!(saga.current_step().unwrap().name, "reserve");
    }

    #[test]
    fn test_has_compensation_requires_type_and_payload() {
        let saga = three_step_saga();
        assert!(saga.steps[0].has_compensation());
        assert!(!saga.steps[1].has_compensation());

        let mut partial = SagaStep::new("x", "http.GET.svc", "{}");
        partial.compensation_action_type = Some("http.DELETE.svc".to_string());
        assert!(!partial.has_compensation());
    }

    #[test]
    fn test_steps_to_compensate_in_reverse_order() {
        let mut saga = three_step_saga();
        saga.steps[0].status = StepStatus::Completed;
        saga.steps[1].status = StepStatus::CompensationFailed;
        saga.steps[2].status = StepStatus::Failed;

        assert_eq!(saga.steps_to_compensate(), [1, 0]);
    }

    #[test]
    fn test_compensation_started() {
        let mut saga = three_step_saga();
        saga.steps[0].status = StepStatus::Completed;
        saga.steps[1].status = StepStatus::Failed;
        assert!(!saga.compensation_started());

        saga.steps[0].status = StepStatus::CompensationCompleted;
        assert!(saga.compensation_started());
    }

    #[test]
    fn test_reset_for_retry_consumes_a_retry() {
        let mut step = SagaStep::new("charge", "http.POST.payments", "{}").with_max_retries(1);
        step.mark_running();
        step.mark_failed("declined".to_string());
        assert!(step.can_retry());

        step.reset_for_retry();
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.retry_count, 1);
        assert!(step.error_message.is_none());
        assert!(!step.can_retry());
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let saga = Saga::new("forever", "c", Duration::MAX);
        assert_eq!(saga.timeout_at, DateTime::<Utc>::MAX_UTC);
        assert!(!saga.is_timed_out(Utc::now()));
    }

    #[test]
    fn test_step_lookup_by_id() {
        let mut saga = three_step_saga();
        let id = saga.steps[1].id;
        assert_eq!(saga.step(id).unwrap().name, "charge");
        saga.step_mut(id).unwrap().retry_count = 2;
        assert_eq!(saga.steps[1].retry_count, 2);
        assert!(saga.step(StepId::new()).is_none());
    }
}
