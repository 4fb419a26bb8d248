//! Step executors.
//!
//! A step's action type is a dot-separated string whose first segment names
//! the executor family:
//!
//! - `http.{METHOD}.{service}`, e.g. `http.POST.payments`
//! - `broker.publish.{exchange}.{routing.key}`, e.g. `broker.publish.orders.order.created`
//!   (everything after the exchange is the routing key)

pub mod broker;
pub mod http;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use common::SagaId;
use thiserror::Error;

use crate::saga::{Saga, SagaStep};

/// Errors returned by an executor. Any of them fails the step.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The action type does not follow its family's grammar.
    #[error("Malformed action type '{0}'")]
    MalformedActionType(String),

    /// No family or verb matches the action type.
    #[error("Unsupported action type '{0}'")]
    UnsupportedActionType(String),

    /// The action payload could not be understood.
    #[error("Malformed action payload: {0}")]
    MalformedPayload(String),

    /// Compensation was requested for a step without a compensation action.
    #[error("Step '{0}' has no compensation action")]
    MissingCompensation(String),

    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The broker refused or failed the publish.
    #[error(transparent)]
    Broker(#[from] messaging::BrokerError),

    /// The HTTP request or a broker operation did not finish within the
    /// executor's per-call limit.
    #[error("Step call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// A parsed action type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionType {
    Http {
        method: String,
        service: String,
    },
    BrokerPublish {
        exchange: String,
        routing_key: String,
    },
}

impl ActionType {
    pub fn parse(action_type: &str) -> Result<Self, ExecutorError> {
        let malformed = || ExecutorError::MalformedActionType(action_type.to_string());

        match family(action_type) {
            "http" => {
                let mut parts = action_type.splitn(3, '.').skip(1);
                let method = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
                let service = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
                Ok(ActionType::Http {
                    method: method.to_ascii_uppercase(),
                    service: service.to_string(),
                })
            }
            "broker" => {
                let mut parts = action_type.splitn(4, '.').skip(1);
                let verb = parts.next().ok_or_else(malformed)?;
                if verb != "publish" {
                    return Err(ExecutorError::UnsupportedActionType(action_type.to_string()));
                }
                let exchange = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
                let routing_key = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
                Ok(ActionType::BrokerPublish {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                })
            }
            _ => Err(ExecutorError::UnsupportedActionType(action_type.to_string())),
        }
    }
}

/// The first segment of an action type.
pub fn family(action_type: &str) -> &str {
    action_type.split('.').next().unwrap_or_default()
}

/// The context handed to an executor for one call.
#[derive(Debug, Clone, Copy)]
pub struct StepInvocation<'a> {
    pub saga_id: SagaId,
    pub saga_name: &'a str,
    pub correlation_id: &'a str,
    pub step: &'a SagaStep,
}

impl<'a> StepInvocation<'a> {
    pub fn new(saga: &'a Saga, step: &'a SagaStep) -> Self {
        Self {
            saga_id: saga.id,
            saga_name: &saga.name,
            correlation_id: &saga.correlation_id,
            step,
        }
    }

    /// The step's compensation action type and payload.
    pub fn compensation(&self) -> Result<(&'a str, &'a str), ExecutorError> {
        match (
            self.step.compensation_action_type.as_deref(),
            self.step.compensation_payload.as_deref(),
        ) {
            (Some(action_type), Some(payload)) => Ok((action_type, payload)),
            _ => Err(ExecutorError::MissingCompensation(self.step.name.clone())),
        }
    }
}

/// Performs a step's forward and compensating actions.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns true if this executor owns the action type's family.
    fn can_handle(&self, action_type: &str) -> bool;

    /// Runs the forward action and returns its response payload.
    async fn execute(&self, invocation: &StepInvocation<'_>) -> Result<String, ExecutorError>;

    /// Runs the compensating action.
    async fn compensate(&self, invocation: &StepInvocation<'_>) -> Result<(), ExecutorError>;
}

/// Ordered set of executors; the first one that can handle an action type wins.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: Vec<Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, executor: impl StepExecutor + 'static) -> Self {
        self.register(Arc::new(executor));
        self
    }

    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) {
        self.executors.push(executor);
    }

    pub fn find(&self, action_type: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors
            .iter()
            .find(|executor| executor.can_handle(action_type))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.executors.iter().map(|e| e.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_action_type() {
        assert_eq!(
            ActionType::parse("http.post.payments").unwrap(),
            ActionType::Http {
                method: "POST".to_string(),
                service: "payments".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_broker_action_type_joins_routing_key() {
        assert_eq!(
            ActionType::parse("broker.publish.orders.order.created").unwrap(),
            ActionType::BrokerPublish {
                exchange: "orders".to_string(),
                routing_key: "order.created".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed_action_types() {
        for malformed in ["http", "http.POST", "http..svc", "broker.publish.orders"] {
            assert!(
                matches!(
                    ActionType::parse(malformed),
                    Err(ExecutorError::MalformedActionType(_))
                ),
                "{malformed} should be malformed"
            );
        }
    }

    #[test]
    fn test_parse_rejects_unknown_family_and_verb() {
        assert!(matches!(
            ActionType::parse("grpc.Call.svc"),
            Err(ExecutorError::UnsupportedActionType(_))
        ));
        assert!(matches!(
            ActionType::parse("broker.consume.orders.key"),
            Err(ExecutorError::UnsupportedActionType(_))
        ));
    }

    #[test]
    fn test_family() {
        assert_eq!(family("http.GET.svc"), "http");
        assert_eq!(family("broker"), "broker");
        assert_eq!(family(""), "");
    }

    #[test]
    fn test_registry_first_match_wins() {
        let registry = ExecutorRegistry::new()
            .with(memory::InMemoryStepExecutor::new())
            .with(memory::InMemoryStepExecutor::with_family("http"));

        assert_eq!(registry.len(), 2);
        assert!(registry.find("memory.anything").is_some());
        assert!(registry.find("http.GET.svc").is_some());
        assert!(registry.find("broker.publish.x.y").is_none());
    }

    #[test]
    fn test_invocation_compensation_requires_both_fields() {
        let saga = Saga::new("s", "c", std::time::Duration::from_secs(1));
        let step = SagaStep::new("reserve", "http.POST.inventory", "{}");
        let invocation = StepInvocation::new(&saga, &step);
        assert!(matches!(
            invocation.compensation(),
            Err(ExecutorError::MissingCompensation(name)) if name == "reserve"
        ));

        let step = step.with_compensation("http.DELETE.inventory", "{\"url\":\"u\"}");
        let invocation = StepInvocation::new(&saga, &step);
        assert_eq!(
            invocation.compensation().unwrap(),
            ("http.DELETE.inventory", "{\"url\":\"u\"}")
        );
    }
}
