//! Broker-publish step executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use messaging::BrokerError;
use messaging::broker::{self, ExchangeKind, MessageBroker, OutboundMessage};
use uuid::Uuid;

use super::{ActionType, ExecutorError, StepExecutor, StepInvocation, family};

/// Publishes to direct exchanges for `broker.publish.{exchange}.{routing.key}` steps.
#[derive(Clone)]
pub struct BrokerStepExecutor {
    broker: Arc<dyn MessageBroker>,
    timeout: Duration,
}

impl BrokerStepExecutor {
    /// Creates an executor whose every broker call is bounded by `timeout`.
    pub fn new(broker: Arc<dyn MessageBroker>, timeout: Duration) -> Self {
        Self { broker, timeout }
    }

    /// Broker timeouts surface as step timeouts, like the HTTP executor's.
    fn step_error(&self, error: BrokerError) -> ExecutorError {
        match error {
            BrokerError::Timeout { .. } => ExecutorError::Timeout(self.timeout),
            other => ExecutorError::Broker(other),
        }
    }

    async fn publish(
        &self,
        invocation: &StepInvocation<'_>,
        action_type: &str,
        payload: &str,
        compensating: bool,
    ) -> Result<String, ExecutorError> {
        let ActionType::BrokerPublish {
            exchange,
            routing_key,
        } = ActionType::parse(action_type)?
        else {
            return Err(ExecutorError::UnsupportedActionType(action_type.to_string()));
        };

        let step = invocation.step;
        let message_id = Uuid::new_v4().to_string();
        let mut message = OutboundMessage::persistent(
            payload.as_bytes().to_vec(),
            message_id.clone(),
            invocation.correlation_id,
        )
        .with_header("saga-id", invocation.saga_id.to_string())
        .with_header("saga-step-id", step.id.to_string())
        .with_header("saga-step-name", step.name.as_str())
        .with_header("saga-step-order", step.order as i64);
        if compensating {
            message = message.with_header("saga-compensation", true);
        }

        let limit = self.timeout;
        let mut channel = broker::timed("open_channel", limit, self.broker.open_channel())
            .await
            .map_err(|e| self.step_error(e))?;
        let outcome = async {
            broker::timed(
                "declare_exchange",
                limit,
                channel.declare_exchange(&exchange, ExchangeKind::Direct),
            )
            .await?;
            broker::timed(
                "publish",
                limit,
                channel.publish(&exchange, &routing_key, message),
            )
            .await
        }
        .await;
        broker::release(channel).await;
        outcome.map_err(|e| self.step_error(e))?;

        tracing::debug!(%exchange, %routing_key, %message_id, compensating, "step message published");

        Ok(serde_json::json!({
            "exchange": exchange,
            "routing_key": routing_key,
            "message_id": message_id,
            "timestamp": Utc::now().to_rfc3339(),
        })
        .to_string())
    }
}

#[async_trait]
impl StepExecutor for BrokerStepExecutor {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn can_handle(&self, action_type: &str) -> bool {
        family(action_type) == "broker"
    }

    async fn execute(&self, invocation: &StepInvocation<'_>) -> Result<String, ExecutorError> {
        let step = invocation.step;
        self.publish(invocation, &step.action_type, &step.action_payload, false)
            .await
    }

    async fn compensate(&self, invocation: &StepInvocation<'_>) -> Result<(), ExecutorError> {
        let (action_type, payload) = invocation.compensation()?;
        self.publish(invocation, action_type, payload, true).await?;
        Ok(())
    }
}
