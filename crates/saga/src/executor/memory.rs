//! In-memory step executor for testing.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::{ExecutorError, StepExecutor, StepInvocation, family};

/// Which side of a step a recorded call ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Execute,
    Compensate,
}

/// A call observed by [`InMemoryStepExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub step_name: String,
    pub action_type: String,
    pub payload: String,
}

#[derive(Debug, Default)]
struct InMemoryExecutorState {
    calls: Vec<RecordedCall>,
    fail_execute: HashSet<String>,
    fail_compensate: HashSet<String>,
    execute_delay: Option<Duration>,
}

/// Executor that records calls and fails on demand, keyed by step name.
///
/// Handles the `memory` family unless built with [`Self::with_family`].
#[derive(Debug, Clone)]
pub struct InMemoryStepExecutor {
    family: &'static str,
    state: Arc<RwLock<InMemoryExecutorState>>,
}

impl Default for InMemoryStepExecutor {
    fn default() -> Self {
        Self::with_family("memory")
    }
}

impl InMemoryStepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_family(family: &'static str) -> Self {
        Self {
            family,
            state: Arc::default(),
        }
    }

    /// Makes the forward action of the named step fail.
    pub fn set_fail_on_execute(&self, step_name: &str, fail: bool) {
        let mut state = self.state.write().unwrap();
        if fail {
            state.fail_execute.insert(step_name.to_string());
        } else {
            state.fail_execute.remove(step_name);
        }
    }

    /// Makes the compensation of the named step fail.
    pub fn set_fail_on_compensate(&self, step_name: &str, fail: bool) {
        let mut state = self.state.write().unwrap();
        if fail {
            state.fail_compensate.insert(step_name.to_string());
        } else {
            state.fail_compensate.remove(step_name);
        }
    }

    /// Makes every forward action take `delay` before it answers.
    pub fn set_execute_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap().execute_delay = delay;
    }

    /// Every call in the order it was made.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.read().unwrap().calls.clone()
    }

    /// Names of the steps whose calls were of the given kind, in call order.
    pub fn step_names(&self, kind: CallKind) -> Vec<String> {
        self.state
            .read()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.step_name.clone())
            .collect()
    }
}

#[async_trait]
impl StepExecutor for InMemoryStepExecutor {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn can_handle(&self, action_type: &str) -> bool {
        family(action_type) == self.family
    }

    async fn execute(&self, invocation: &StepInvocation<'_>) -> Result<String, ExecutorError> {
        let step = invocation.step;
        let (delay, fail) = {
            let mut state = self.state.write().unwrap();
            state.calls.push(RecordedCall {
                kind: CallKind::Execute,
                step_name: step.name.clone(),
                action_type: step.action_type.clone(),
                payload: step.action_payload.clone(),
            });
            (state.execute_delay, state.fail_execute.contains(&step.name))
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(ExecutorError::Transport(format!(
                "{} unavailable",
                step.name
            )));
        }
        Ok(format!("{{\"step\":\"{}\",\"ok\":true}}", step.name))
    }

    async fn compensate(&self, invocation: &StepInvocation<'_>) -> Result<(), ExecutorError> {
        let (action_type, payload) = invocation.compensation()?;
        let step = invocation.step;
        let mut state = self.state.write().unwrap();
        state.calls.push(RecordedCall {
            kind: CallKind::Compensate,
            step_name: step.name.clone(),
            action_type: action_type.to_string(),
            payload: payload.to_string(),
        });

        if state.fail_compensate.contains(&step.name) {
            return Err(ExecutorError::Transport(format!(
                "{} compensation unavailable",
                step.name
            )));
        }
        Ok(())
    }
}
