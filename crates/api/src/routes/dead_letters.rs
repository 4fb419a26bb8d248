//! Dead-letter inspection and recovery endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::DeadLetterId;
use messaging::DeadLetterMessage;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::{ApiError, parse_id};

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Deserialize)]
pub struct ListQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Serialize)]
pub struct RetryResponse {
    pub retried: bool,
}

#[derive(Serialize)]
pub struct DiscardResponse {
    pub discarded: bool,
}

/// GET /dead-letters?page=&page_size=: active dead letters, newest first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DeadLetterMessage>>, ApiError> {
    let page = query.page.unwrap_or(1);
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    Ok(Json(state.dead_letters.list(page, page_size).await?))
}

/// POST /dead-letters/{id}/retry: republish to the original topic.
#[tracing::instrument(skip(state))]
pub async fn retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RetryResponse>, ApiError> {
    let dead_letter_id = find(&state, &id).await?;
    let retried = state.dead_letters.retry(dead_letter_id).await?;
    Ok(Json(RetryResponse { retried }))
}

/// POST /dead-letters/{id}/discard: hide the message from listings.
#[tracing::instrument(skip(state))]
pub async fn discard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DiscardResponse>, ApiError> {
    let dead_letter_id = find(&state, &id).await?;
    let discarded = state.dead_letters.discard(dead_letter_id).await?;
    Ok(Json(DiscardResponse { discarded }))
}

async fn find(state: &AppState, raw: &str) -> Result<DeadLetterId, ApiError> {
    let id: DeadLetterId = parse_id("dead letter", raw)?;
    state
        .dead_letters
        .get(id)
        .await?
        .map(|message| message.id)
        .ok_or_else(|| ApiError::NotFound(format!("Dead letter {raw} not found")))
}
