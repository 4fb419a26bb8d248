//! Message publishing endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::{Headers, Priority};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub priority: Priority,
    pub headers: Option<Headers>,
}

#[derive(Deserialize)]
pub struct PublishBatchRequest {
    pub topic: String,
    pub payloads: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Serialize)]
pub struct PublishResponse {
    pub message_id: String,
}

#[derive(Serialize)]
pub struct BatchItemResponse {
    pub index: usize,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub batch_id: String,
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub items: Vec<BatchItemResponse>,
}

fn require_topic(topic: &str) -> Result<(), ApiError> {
    if topic.trim().is_empty() {
        return Err(ApiError::BadRequest("topic must not be empty".to_string()));
    }
    Ok(())
}

/// POST /messages: publish one payload to a topic.
#[tracing::instrument(skip(state, req))]
pub async fn publish(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    require_topic(&req.topic)?;
    let message_id = state
        .publisher
        .try_publish(&req.topic, &req.payload, req.priority, req.headers)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            message_id: message_id.to_string(),
        }),
    ))
}

/// POST /messages/batch: publish payloads one by one, best effort.
#[tracing::instrument(skip(state, req))]
pub async fn publish_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublishBatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    require_topic(&req.topic)?;
    let report = state
        .publisher
        .publish_batch(&req.topic, req.payloads.as_slice(), req.priority)
        .await?;

    Ok(Json(BatchResponse {
        batch_id: report.batch_id.to_string(),
        total: report.total,
        processed: report.processed,
        failed: report.failed,
        items: report
            .items
            .into_iter()
            .map(|item| BatchItemResponse {
                index: item.index,
                message_id: item.message_id.map(|id| id.to_string()),
                error: item.error,
            })
            .collect(),
    }))
}
