//! Saga start, inspection and operator intervention endpoints.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{SagaId, StepId};
use saga::{Saga, SagaError, SagaRepository, SagaStatus, SagaStep};
use serde::Deserialize;

use super::AppState;
use crate::error::{ApiError, parse_id};

// -- Request types --

#[derive(Deserialize)]
pub struct StartSagaRequest {
    pub name: String,
    pub correlation_id: String,
    pub timeout_secs: Option<u64>,
    pub steps: Vec<StepRequest>,
}

#[derive(Deserialize)]
pub struct StepRequest {
    pub name: String,
    pub action_type: String,
    pub action_payload: String,
    pub compensation_action_type: Option<String>,
    pub compensation_payload: Option<String>,
    pub max_retries: Option<u32>,
}

#[derive(Deserialize)]
pub struct ListSagasQuery {
    pub correlation_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct AbortRequest {
    #[serde(default)]
    pub reason: String,
}

/// Runs the saga's remaining steps in a tracked background task.
fn spawn_run(state: &Arc<AppState>, saga_id: SagaId) {
    let task_state = state.clone();
    state.tasks.spawn(async move {
        if let Err(e) = task_state
            .orchestrator
            .resume(saga_id, &task_state.shutdown)
            .await
        {
            tracing::error!(%saga_id, error = %e, "saga run failed");
        }
    });
}

/// Runs an intervention in a tracked task so a dropped request cannot cut
/// it off between a compensation call and its persisted result.
async fn run_detached<T, F>(state: &Arc<AppState>, intervention: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: Future<Output = saga::Result<T>> + Send + 'static,
{
    let result = state
        .tasks
        .spawn(intervention)
        .await
        .map_err(|e| ApiError::Internal(format!("intervention task failed: {e}")))?;
    Ok(result?)
}

// -- Handlers --

/// POST /sagas: persist a saga as Running and execute it in the background.
///
/// Responds 202 with the saga; poll GET /sagas/{id} for progress.
#[tracing::instrument(skip(state, req))]
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartSagaRequest>,
) -> Result<(StatusCode, Json<Saga>), ApiError> {
    if req.name.trim().is_empty() || req.correlation_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "name and correlation_id must not be empty".to_string(),
        ));
    }

    let config = &state.orchestrator_config;
    let timeout = req
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(config.default_timeout);

    let steps = req.steps.into_iter().map(|step| {
        let mut built = SagaStep::new(step.name, step.action_type, step.action_payload)
            .with_max_retries(step.max_retries.unwrap_or(config.default_max_retries));
        built.compensation_action_type = step.compensation_action_type;
        built.compensation_payload = step.compensation_payload;
        built
    });
    let saga = Saga::new(req.name, req.correlation_id, timeout).with_steps(steps);

    let saga = state.orchestrator.begin_saga(saga).await?;
    spawn_run(&state, saga.id);
    Ok((StatusCode::ACCEPTED, Json(saga)))
}

/// GET /sagas?correlation_id=..|status=..: query sagas.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSagasQuery>,
) -> Result<Json<Vec<Saga>>, ApiError> {
    let repository = state.orchestrator.repository();
    let sagas = match (query.correlation_id, query.status) {
        (Some(correlation_id), _) => repository.find_by_correlation_id(&correlation_id).await,
        (None, Some(status)) => {
            let status: SagaStatus = status.parse().map_err(ApiError::BadRequest)?;
            repository.list_by_status(status).await
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "either correlation_id or status is required".to_string(),
            ));
        }
    }
    .map_err(SagaError::from)?;

    Ok(Json(sagas))
}

/// GET /sagas/{id}: load a saga with its steps.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Saga>, ApiError> {
    let saga_id: SagaId = parse_id("saga", &id)?;
    let saga = state
        .orchestrator
        .get_saga(saga_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))?;
    Ok(Json(saga))
}

/// POST /sagas/{id}/resume: continue a running saga from its current step
/// in the background.
#[tracing::instrument(skip(state))]
pub async fn resume(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Saga>), ApiError> {
    let saga_id: SagaId = parse_id("saga", &id)?;
    let saga = state.orchestrator.resumable(saga_id).await?;
    spawn_run(&state, saga_id);
    Ok((StatusCode::ACCEPTED, Json(saga)))
}

/// POST /sagas/{id}/compensate: undo the saga's completed steps.
#[tracing::instrument(skip(state))]
pub async fn compensate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Saga>, ApiError> {
    let saga_id: SagaId = parse_id("saga", &id)?;
    let task_state = state.clone();
    let saga = run_detached(&state, async move {
        task_state.orchestrator.compensate(saga_id).await
    })
    .await?;
    Ok(Json(saga))
}

/// POST /sagas/{id}/abort: stop the saga without compensating.
#[tracing::instrument(skip(state, req))]
pub async fn abort(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AbortRequest>,
) -> Result<Json<Saga>, ApiError> {
    let saga_id: SagaId = parse_id("saga", &id)?;
    let reason = if req.reason.trim().is_empty() {
        "aborted by operator".to_string()
    } else {
        req.reason
    };
    let task_state = state.clone();
    let saga = run_detached(&state, async move {
        task_state.orchestrator.abort(saga_id, &reason).await
    })
    .await?;
    Ok(Json(saga))
}

/// POST /sagas/{id}/steps/{step_id}/retry: reset a step, then resume the
/// saga in the background.
#[tracing::instrument(skip(state))]
pub async fn retry_step(
    State(state): State<Arc<AppState>>,
    Path((id, step_id)): Path<(String, String)>,
) -> Result<(StatusCode, Json<Saga>), ApiError> {
    let saga_id: SagaId = parse_id("saga", &id)?;
    let step_id: StepId = parse_id("step", &step_id)?;
    let saga = state.orchestrator.reset_step(saga_id, step_id).await?;
    spawn_run(&state, saga_id);
    Ok((StatusCode::ACCEPTED, Json(saga)))
}
