//! HTTP route handlers and shared state.

pub mod dead_letters;
pub mod health;
pub mod messages;
pub mod metrics;
pub mod sagas;
pub mod subscriptions;

use std::sync::Arc;

use messaging::{DeadLetterManager, MessagePublisher, MessageSubscriber};
use saga::{OrchestratorConfig, SagaOrchestrator, SagaRepository};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: SagaOrchestrator<Arc<dyn SagaRepository>>,
    pub publisher: MessagePublisher,
    pub subscriber: MessageSubscriber,
    pub dead_letters: DeadLetterManager,
    pub orchestrator_config: OrchestratorConfig,
    /// Cancelled on shutdown; running sagas stop before their next step.
    pub shutdown: CancellationToken,
    /// Background saga runs and interventions; drained before exit.
    pub tasks: TaskTracker,
}
