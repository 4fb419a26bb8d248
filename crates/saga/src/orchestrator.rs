//! Saga orchestrator.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use common::{SagaId, StepId};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SagaError};
use crate::executor::{ExecutorError, ExecutorRegistry, StepInvocation};
use crate::repository::SagaRepository;
use crate::saga::Saga;
use crate::state::SagaStatus;

/// How a single forward step ended.
enum StepOutcome {
    Completed,
    Failed,
    /// The saga left `Running` while the step was in flight.
    Superseded,
}

/// A writer currently driving a saga in this process.
struct ActiveRun {
    stop: CancellationToken,
    finished: watch::Receiver<()>,
}

/// Holds a saga's slot in the active-run table until dropped.
struct RunGuard<'a> {
    active: &'a Mutex<HashMap<SagaId, ActiveRun>>,
    saga_id: SagaId,
    stop: CancellationToken,
    _finished: watch::Sender<()>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.saga_id);
    }
}

/// Drives sagas through their steps and compensates on failure.
///
/// Steps run strictly in order. The saga is persisted after every state
/// change, so a crash leaves a consistent record that [`Self::resume`] can
/// pick up. Cancellation is observed between steps: a cancelled saga stays
/// `Running` at the step it would have run next.
///
/// One writer drives a saga at a time. [`Self::abort`] and
/// [`Self::compensate`] stop a live loop at its next step boundary and wait
/// for it before writing. The loop also re-reads the persisted status at
/// every boundary and after every step, and stops if another writer moved
/// the saga out of `Running`.
pub struct SagaOrchestrator<R: SagaRepository> {
    repository: R,
    executors: ExecutorRegistry,
    active: Mutex<HashMap<SagaId, ActiveRun>>,
}

impl<R: SagaRepository> SagaOrchestrator<R> {
    pub fn new(repository: R, executors: ExecutorRegistry) -> Self {
        Self {
            repository,
            executors,
            active: Mutex::default(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub async fn get_saga(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        Ok(self.repository.get(saga_id).await?)
    }

    /// Starts a pending saga and runs it until it completes, fails,
    /// compensates, or is cancelled.
    #[tracing::instrument(skip(self, saga, cancel), fields(saga_id = %saga.id, saga = %saga.name))]
    pub async fn start_saga(&self, saga: Saga, cancel: &CancellationToken) -> Result<Saga> {
        let saga = self.begin_saga(saga).await?;
        self.resume(saga.id, cancel).await
    }

    /// Moves a pending saga to `Running` and persists it without running any
    /// step. [`Self::resume`] picks it up from there.
    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.id))]
    pub async fn begin_saga(&self, mut saga: Saga) -> Result<Saga> {
        if !saga.status.can_start() {
            return Err(SagaError::InvalidState {
                expected: "Pending",
                actual: saga.status,
            });
        }

        saga.status = SagaStatus::Running;
        saga.started_at = Some(Utc::now());
        self.persist(&mut saga).await?;

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(steps = saga.steps.len(), "saga started");
        Ok(saga)
    }

    /// Continues a `Running` saga from its current step.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn resume(&self, saga_id: SagaId, cancel: &CancellationToken) -> Result<Saga> {
        let run = self.claim(saga_id, cancel)?;
        let mut saga = self.load_running(saga_id).await?;

        tracing::info!(step_index = saga.current_step_index, "running saga");
        self.run(&mut saga, &run.stop).await?;
        Ok(saga)
    }

    /// Loads a saga that [`Self::resume`] would accept right now.
    pub async fn resumable(&self, saga_id: SagaId) -> Result<Saga> {
        if self.is_active(saga_id) {
            return Err(SagaError::Busy(saga_id));
        }
        self.load_running(saga_id).await
    }

    /// Undoes the completed steps of a running, failed or aborted saga.
    ///
    /// A live step loop is stopped first; its in-flight step finishes and is
    /// compensated with the rest.
    #[tracing::instrument(skip(self))]
    pub async fn compensate(&self, saga_id: SagaId) -> Result<Saga> {
        let _run = self.take_over(saga_id).await?;
        let mut saga = self.load(saga_id).await?;
        if !saga.status.can_compensate() {
            return Err(SagaError::InvalidState {
                expected: "Running, Failed or Aborted",
                actual: saga.status,
            });
        }

        self.compensate_steps(&mut saga).await?;
        Ok(saga)
    }

    /// Stops a saga without compensating. A live step loop is stopped first
    /// and its in-flight step is recorded before the saga is aborted.
    #[tracing::instrument(skip(self))]
    pub async fn abort(&self, saga_id: SagaId, reason: &str) -> Result<Saga> {
        let _run = self.take_over(saga_id).await?;
        let mut saga = self.load(saga_id).await?;
        if !saga.status.can_abort() {
            return Err(SagaError::InvalidState {
                expected: "Pending, Running or Compensating",
                actual: saga.status,
            });
        }

        saga.status = SagaStatus::Aborted;
        saga.error_message = Some(format!("Aborted: {reason}"));
        saga.completed_at = Some(Utc::now());
        self.persist(&mut saga).await?;

        metrics::counter!("saga_aborted_total").increment(1);
        tracing::warn!(%reason, "saga aborted");
        Ok(saga)
    }

    /// Resets one step to `Pending`, consuming a retry, and resumes the saga
    /// from its current step.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn retry_step(
        &self,
        saga_id: SagaId,
        step_id: StepId,
        cancel: &CancellationToken,
    ) -> Result<Saga> {
        self.reset_step(saga_id, step_id).await?;
        self.resume(saga_id, cancel).await
    }

    /// Validates a retry and resets the step, leaving the saga `Running` for
    /// [`Self::resume`].
    ///
    /// Sagas with undone steps cannot be retried: running forward from the
    /// cursor would complete the saga with earlier effects rolled back.
    /// Rejected sagas and steps are left untouched.
    #[tracing::instrument(skip(self))]
    pub async fn reset_step(&self, saga_id: SagaId, step_id: StepId) -> Result<Saga> {
        let _run = self.claim(saga_id, &CancellationToken::new())?;
        let mut saga = self.load(saga_id).await?;
        if !saga.status.can_retry() {
            return Err(SagaError::InvalidState {
                expected: "Pending, Running, Failed or Compensated",
                actual: saga.status,
            });
        }
        if saga.compensation_started() {
            return Err(SagaError::CompensationStarted(saga_id));
        }

        let step = saga
            .step_mut(step_id)
            .ok_or(SagaError::StepNotFound { saga_id, step_id })?;
        if !step.can_retry() {
            return Err(SagaError::RetryLimitExceeded {
                step: step.name.clone(),
                retry_count: step.retry_count,
                max_retries: step.max_retries,
            });
        }
        step.reset_for_retry();
        tracing::info!(step = %step.name, retry_count = step.retry_count, "retrying step");

        saga.status = SagaStatus::Running;
        saga.error_message = None;
        saga.completed_at = None;
        self.persist(&mut saga).await?;
        Ok(saga)
    }

    async fn run(&self, saga: &mut Saga, stop: &CancellationToken) -> Result<()> {
        while saga.status == SagaStatus::Running {
            if stop.is_cancelled() {
                tracing::info!(
                    step_index = saga.current_step_index,
                    "saga loop stopped, leaving it resumable"
                );
                return Ok(());
            }

            if let Some(stored) = self.superseded(saga.id).await? {
                tracing::warn!(status = %stored.status, "saga left Running, stopping loop");
                *saga = stored;
                return Ok(());
            }

            if saga.is_timed_out(Utc::now()) {
                saga.status = SagaStatus::Failed;
                saga.error_message = Some(format!("Saga timed out at {}", saga.timeout_at));
                self.persist(saga).await?;
                tracing::warn!(timeout_at = %saga.timeout_at, "saga timed out");
                return self.compensate_steps(saga).await;
            }

            let index = saga.current_step_index;
            if index >= saga.steps.len() {
                saga.status = SagaStatus::Completed;
                saga.completed_at = Some(Utc::now());
                self.persist(saga).await?;

                metrics::counter!("saga_completed_total").increment(1);
                tracing::info!("saga completed");
                return Ok(());
            }

            match self.execute_step(saga, index).await? {
                StepOutcome::Completed => {}
                StepOutcome::Failed => return self.compensate_steps(saga).await,
                StepOutcome::Superseded => return Ok(()),
            }
        }
        Ok(())
    }

    async fn execute_step(&self, saga: &mut Saga, index: usize) -> Result<StepOutcome> {
        let action_type = saga.steps[index].action_type.clone();
        let Some(executor) = self.executors.find(&action_type) else {
            let error = format!("No executor registered for action type '{action_type}'");
            return self.fail_step(saga, index, error).await;
        };

        saga.steps[index].mark_running();
        self.persist(saga).await?;
        tracing::info!(
            step = %saga.steps[index].name,
            executor = executor.name(),
            "executing step"
        );

        let started = Instant::now();
        let step = saga.steps[index].clone();
        let result = executor.execute(&StepInvocation::new(saga, &step)).await;
        metrics::histogram!("saga_step_duration_seconds").record(started.elapsed().as_secs_f64());

        if let Some(stored) = self.superseded(saga.id).await? {
            *saga = self.record_late_result(stored, index, result).await?;
            return Ok(StepOutcome::Superseded);
        }

        match result {
            Ok(response) => {
                saga.steps[index].mark_completed(response);
                saga.current_step_index += 1;
                self.persist(saga).await?;
                tracing::info!(step = %step.name, "step completed");
                Ok(StepOutcome::Completed)
            }
            Err(e) => self.fail_step(saga, index, e.to_string()).await,
        }
    }

    /// Records a step that finished after another writer took the saga over.
    /// The saga's status is left as that writer set it.
    async fn record_late_result(
        &self,
        mut stored: Saga,
        index: usize,
        result: std::result::Result<String, ExecutorError>,
    ) -> Result<Saga> {
        let Some(step) = stored.steps.get_mut(index) else {
            return Ok(stored);
        };
        let name = step.name.clone();
        match result {
            Ok(response) => {
                step.mark_completed(response);
                if stored.current_step_index == index {
                    stored.current_step_index += 1;
                }
            }
            Err(e) => step.mark_failed(e.to_string()),
        }
        self.persist(&mut stored).await?;

        tracing::warn!(
            step = %name,
            status = %stored.status,
            "step finished after the saga left Running"
        );
        Ok(stored)
    }

    async fn fail_step(&self, saga: &mut Saga, index: usize, error: String) -> Result<StepOutcome> {
        let step = &mut saga.steps[index];
        step.mark_failed(error.clone());
        let name = step.name.clone();

        saga.status = SagaStatus::Failed;
        saga.error_message = Some(format!("Step '{name}' failed: {error}"));
        self.persist(saga).await?;

        metrics::counter!("saga_step_failed_total").increment(1);
        tracing::error!(step = %name, %error, "step failed");
        Ok(StepOutcome::Failed)
    }

    /// Walks compensable steps last to first. Stops at the first compensation
    /// failure, leaving the saga `Failed`.
    async fn compensate_steps(&self, saga: &mut Saga) -> Result<()> {
        saga.status = SagaStatus::Compensating;
        self.persist(saga).await?;
        tracing::info!("compensating saga");

        for index in saga.steps_to_compensate() {
            let step = saga.steps[index].clone();
            if !step.has_compensation() {
                tracing::warn!(step = %step.name, "step has no compensation, skipping");
                continue;
            }

            let compensation_type = step.compensation_action_type.as_deref().unwrap_or_default();
            let result = match self.executors.find(compensation_type) {
                Some(executor) => {
                    saga.steps[index].mark_compensation_running();
                    self.persist(saga).await?;
                    executor.compensate(&StepInvocation::new(saga, &step)).await
                }
                None => Err(ExecutorError::UnsupportedActionType(
                    compensation_type.to_string(),
                )),
            };

            match result {
                Ok(()) => {
                    saga.steps[index].mark_compensation_completed();
                    self.persist(saga).await?;
                    tracing::info!(step = %step.name, "step compensated");
                }
                Err(e) => {
                    saga.steps[index].mark_compensation_failed(e.to_string());
                    saga.status = SagaStatus::Failed;
                    saga.error_message = Some(format!(
                        "Compensation failed for step '{}' ({}): {e}",
                        step.name, step.id
                    ));
                    saga.completed_at = Some(Utc::now());
                    self.persist(saga).await?;

                    metrics::counter!("saga_failed_total").increment(1);
                    tracing::error!(step = %step.name, error = %e, "compensation failed");
                    return Ok(());
                }
            }
        }

        saga.status = SagaStatus::Compensated;
        saga.completed_at = Some(Utc::now());
        self.persist(saga).await?;

        metrics::counter!("saga_compensated_total").increment(1);
        tracing::info!("saga compensated");
        Ok(())
    }

    fn is_active(&self, saga_id: SagaId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&saga_id)
    }

    /// Registers the caller as the saga's only writer in this process.
    fn claim(&self, saga_id: SagaId, cancel: &CancellationToken) -> Result<RunGuard<'_>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(&saga_id) {
            return Err(SagaError::Busy(saga_id));
        }

        let stop = cancel.child_token();
        let (finished_tx, finished_rx) = watch::channel(());
        active.insert(
            saga_id,
            ActiveRun {
                stop: stop.clone(),
                finished: finished_rx,
            },
        );
        Ok(RunGuard {
            active: &self.active,
            saga_id,
            stop,
            _finished: finished_tx,
        })
    }

    /// Stops the live writer, if any, at its next step boundary and claims
    /// the saga once it has exited.
    async fn take_over(&self, saga_id: SagaId) -> Result<RunGuard<'_>> {
        let finished = {
            let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            active.get(&saga_id).map(|run| {
                run.stop.cancel();
                run.finished.clone()
            })
        };
        if let Some(mut finished) = finished {
            tracing::info!("waiting for the in-flight step to finish");
            // Resolves when the writer drops its guard.
            let _ = finished.changed().await;
        }
        self.claim(saga_id, &CancellationToken::new())
    }

    /// Re-reads the saga and returns it if it is no longer `Running`.
    async fn superseded(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        let stored = self.load(saga_id).await?;
        Ok((stored.status != SagaStatus::Running).then_some(stored))
    }

    async fn load_running(&self, saga_id: SagaId) -> Result<Saga> {
        let saga = self.load(saga_id).await?;
        if saga.status != SagaStatus::Running {
            return Err(SagaError::InvalidState {
                expected: "Running",
                actual: saga.status,
            });
        }
        Ok(saga)
    }

    async fn load(&self, saga_id: SagaId) -> Result<Saga> {
        self.repository
            .get(saga_id)
            .await?
            .ok_or(SagaError::SagaNotFound(saga_id))
    }

    async fn persist(&self, saga: &mut Saga) -> Result<()> {
        saga.updated_at = Utc::now();
        self.repository.save(saga).await?;
        Ok(())
    }
}
