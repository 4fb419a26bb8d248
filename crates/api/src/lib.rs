//! Operator HTTP service for the saga coordinator.
//!
//! Exposes saga start and intervention, message publishing, dead-letter
//! recovery and subscription management, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use messaging::{
    BrokerConfig, DeadLetterManager, InMemoryBroker, InMemoryDeadLetterRepository,
    InMemoryMessageRepository, InMemorySubscriptionRepository, MessageBroker, MessagePublisher,
    MessageSubscriber,
};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    BrokerStepExecutor, ExecutorError, ExecutorRegistry, HttpStepExecutor, InMemorySagaRepository,
    OrchestratorConfig, SagaOrchestrator, SagaRepository,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/sagas", post(routes::sagas::start).get(routes::sagas::list))
        .route("/sagas/{id}", get(routes::sagas::get))
        .route("/sagas/{id}/resume", post(routes::sagas::resume))
        .route("/sagas/{id}/compensate", post(routes::sagas::compensate))
        .route("/sagas/{id}/abort", post(routes::sagas::abort))
        .route(
            "/sagas/{id}/steps/{step_id}/retry",
            post(routes::sagas::retry_step),
        )
        .route("/messages", post(routes::messages::publish))
        .route("/messages/batch", post(routes::messages::publish_batch))
        .route("/dead-letters", get(routes::dead_letters::list))
        .route("/dead-letters/{id}/retry", post(routes::dead_letters::retry))
        .route(
            "/dead-letters/{id}/discard",
            post(routes::dead_letters::discard),
        )
        .route(
            "/subscriptions",
            get(routes::subscriptions::list).post(routes::subscriptions::subscribe),
        )
        .route(
            "/subscriptions/{id}",
            delete(routes::subscriptions::unsubscribe),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the application state over `broker`, with in-memory stores and
/// the HTTP and broker step executors registered.
pub fn create_state(
    broker: Arc<dyn MessageBroker>,
    broker_config: &BrokerConfig,
    orchestrator_config: OrchestratorConfig,
    shutdown: CancellationToken,
) -> Result<Arc<AppState>, ExecutorError> {
    let executors = ExecutorRegistry::new()
        .with(HttpStepExecutor::new(orchestrator_config.http_timeout)?)
        .with(BrokerStepExecutor::new(
            broker.clone(),
            orchestrator_config.broker_timeout,
        ));
    let sagas: Arc<dyn SagaRepository> = Arc::new(InMemorySagaRepository::new());

    let publisher = MessagePublisher::new(
        broker.clone(),
        Arc::new(InMemoryMessageRepository::new()),
        broker_config,
    );
    let subscriber = MessageSubscriber::new(
        broker,
        Arc::new(InMemorySubscriptionRepository::new()),
        broker_config,
    );
    let dead_letters =
        DeadLetterManager::new(Arc::new(InMemoryDeadLetterRepository::new()), publisher.clone());

    Ok(Arc::new(AppState {
        orchestrator: SagaOrchestrator::new(sagas, executors),
        publisher,
        subscriber,
        dead_letters,
        orchestrator_config,
        shutdown,
        tasks: TaskTracker::new(),
    }))
}

/// Creates the default application state over an in-memory broker.
pub fn create_default_state() -> Result<(Arc<AppState>, InMemoryBroker), ExecutorError> {
    let broker = InMemoryBroker::new();
    let state = create_state(
        Arc::new(broker.clone()),
        &BrokerConfig::default(),
        OrchestratorConfig::default(),
        CancellationToken::new(),
    )?;
    Ok((state, broker))
}
