//! Write-ahead message publisher.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{BatchId, Headers, MessageId, Priority};

use crate::broker::{self, BrokerError, ExchangeKind, MessageBroker, OutboundMessage};
use crate::config::BrokerConfig;
use crate::error::{MessagingError, Result};
use crate::model::{BatchStatus, Message, MessageBatch};
use crate::repository::MessageRepository;

/// Outcome of one payload inside a batch publish.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemResult {
    pub index: usize,
    /// Ledger id, if the message row could be written.
    pub message_id: Option<MessageId>,
    pub error: Option<String>,
}

impl BatchItemResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-item report of a best-effort batch publish.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub items: Vec<BatchItemResult>,
}

impl BatchReport {
    /// True when every payload was accepted by the broker.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Publishes payloads to named topics with at-least-once durability.
///
/// Every publish is written to the ledger as `Pending` before the broker is
/// touched. No retries happen here; that is left to the caller or the
/// dead-letter manager.
#[derive(Clone)]
pub struct MessagePublisher {
    broker: Arc<dyn MessageBroker>,
    messages: Arc<dyn MessageRepository>,
    operation_timeout: Duration,
}

impl MessagePublisher {
    /// Creates a new publisher.
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        messages: Arc<dyn MessageRepository>,
        config: &BrokerConfig,
    ) -> Self {
        Self {
            broker,
            messages,
            operation_timeout: config.operation_timeout,
        }
    }

    /// Publishes a payload to `topic`, returning false (and logging) on any
    /// broker or ledger failure.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &str,
        priority: Priority,
        headers: Option<Headers>,
    ) -> bool {
        match self.try_publish(topic, payload, priority, headers).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(topic, error = %e, "failed to publish message");
                false
            }
        }
    }

    /// Publishes a payload to `topic` and returns the ledger id.
    pub async fn try_publish(
        &self,
        topic: &str,
        payload: &str,
        priority: Priority,
        headers: Option<Headers>,
    ) -> Result<MessageId> {
        let message = Message::pending(topic, payload, priority, headers.unwrap_or_default());
        self.publish_message(message).await
    }

    /// Publishes each payload individually and sequentially.
    ///
    /// Best effort: a failed item does not stop the batch, and the batch row
    /// is marked `Completed` with every attempt counted as processed.
    #[tracing::instrument(skip(self, payloads), fields(count = payloads.len()))]
    pub async fn publish_batch<S>(
        &self,
        topic: &str,
        payloads: &[S],
        priority: Priority,
    ) -> Result<BatchReport>
    where
        S: AsRef<str> + Sync,
    {
        let mut batch = MessageBatch::new(topic, payloads.len());
        self.messages.insert_batch(&batch).await?;

        let mut items = Vec::with_capacity(payloads.len());
        for (index, payload) in payloads.iter().enumerate() {
            let mut message =
                Message::pending(topic, payload.as_ref(), priority, Headers::new());
            message.batch_id = Some(batch.id);
            let message_id = message.id;

            let outcome = self.publish_message(message).await;
            batch.processed_messages += 1;

            let item = match outcome {
                Ok(id) => BatchItemResult {
                    index,
                    message_id: Some(id),
                    error: None,
                },
                Err(e) => {
                    batch.failed_messages += 1;
                    tracing::warn!(index, error = %e, "batch item failed");
                    let written = !matches!(e, MessagingError::Repository(_));
                    BatchItemResult {
                        index,
                        message_id: written.then_some(message_id),
                        error: Some(e.to_string()),
                    }
                }
            };
            items.push(item);
        }

        batch.status = BatchStatus::Completed;
        batch.completed_at = Some(Utc::now());
        self.messages.update_batch(&batch).await?;

        tracing::info!(
            batch_id = %batch.id,
            processed = batch.processed_messages,
            failed = batch.failed_messages,
            "batch publish finished"
        );

        Ok(BatchReport {
            batch_id: batch.id,
            total: batch.total_messages,
            processed: batch.processed_messages,
            failed: batch.failed_messages,
            items,
        })
    }

    #[tracing::instrument(skip(self, message), fields(message_id = %message.id, topic = %message.topic))]
    async fn publish_message(&self, mut message: Message) -> Result<MessageId> {
        // Write-ahead: the ledger row must exist before any broker traffic.
        self.messages.insert_message(&message).await?;

        let outbound = OutboundMessage::persistent(
            message.payload.clone(),
            message.id.to_string(),
            message.correlation_id.clone(),
        )
        .with_priority(message.priority.broker_priority())
        .with_text_headers(&message.headers);

        match self.send(&message.topic, outbound).await {
            Ok(()) => {
                message.mark_published();
                if let Err(e) = self.messages.update_message(&message).await {
                    tracing::warn!(error = %e, "message published but ledger status not updated");
                }
                metrics::counter!("messages_published_total").increment(1);
                tracing::debug!("message published");
                Ok(message.id)
            }
            Err(e) => {
                message.mark_failed(e.to_string());
                if let Err(update_err) = self.messages.update_message(&message).await {
                    tracing::warn!(error = %update_err, "failed to record publish failure");
                }
                metrics::counter!("messages_publish_failed_total").increment(1);
                Err(e.into())
            }
        }
    }

    async fn send(&self, topic: &str, message: OutboundMessage) -> std::result::Result<(), BrokerError> {
        let limit = self.operation_timeout;
        let mut channel = broker::timed("open_channel", limit, self.broker.open_channel()).await?;

        let outcome = async {
            broker::timed(
                "declare_exchange",
                limit,
                channel.declare_exchange(topic, ExchangeKind::Fanout),
            )
            .await?;
            broker::timed("publish", limit, channel.publish(topic, "", message)).await
        }
        .await;

        broker::release(channel).await;
        outcome
    }
}
