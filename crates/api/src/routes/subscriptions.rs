//! Consumer subscription endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::SubscriptionId;
use messaging::Subscription;
use serde::Deserialize;

use super::AppState;
use crate::error::{ApiError, parse_id};

#[derive(Deserialize)]
pub struct ListQuery {
    pub topic: Option<String>,
}

#[derive(Deserialize)]
pub struct SubscribeRequest {
    pub topic: String,
    pub consumer_name: String,
}

/// GET /subscriptions?topic=: active subscriptions.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Subscription>>, ApiError> {
    let subscriptions = state
        .subscriber
        .get_subscriptions(query.topic.as_deref())
        .await?;
    Ok(Json(subscriptions))
}

/// POST /subscriptions: bind a consumer queue to a topic.
#[tracing::instrument(skip(state, req))]
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    let subscription = state
        .subscriber
        .subscribe(&req.topic, &req.consumer_name)
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// DELETE /subscriptions/{id}: remove the consumer queue.
#[tracing::instrument(skip(state))]
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let subscription_id: SubscriptionId = parse_id("subscription", &id)?;
    if state.subscriber.unsubscribe(subscription_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Subscription {id} not found")))
    }
}
