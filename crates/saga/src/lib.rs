//! Saga orchestration for distributed transactions.
//!
//! A [`Saga`] is an ordered list of [`SagaStep`]s. The [`SagaOrchestrator`]
//! runs them one at a time through pluggable [`StepExecutor`]s, persisting
//! the saga after every change. When a step fails or the saga times out,
//! completed steps are compensated in reverse order.
//!
//! Executors ship for HTTP calls (`http.{METHOD}.{service}`) and broker
//! publishes (`broker.publish.{exchange}.{routing.key}`).

pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod repository;
pub mod saga;
pub mod state;

pub use config::OrchestratorConfig;
pub use error::{Result, SagaError};
pub use executor::broker::BrokerStepExecutor;
pub use executor::http::{HttpActionEnvelope, HttpStepExecutor};
pub use executor::memory::{CallKind, InMemoryStepExecutor, RecordedCall};
pub use executor::{ActionType, ExecutorError, ExecutorRegistry, StepExecutor, StepInvocation};
pub use orchestrator::SagaOrchestrator;
pub use repository::{InMemorySagaRepository, SagaRepository};
pub use saga::{DEFAULT_MAX_RETRIES, Saga, SagaStep};
pub use state::{SagaStatus, StepStatus};
