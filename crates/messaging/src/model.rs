//! Durable records kept by the messaging layer.

use chrono::{DateTime, Utc};
use common::{BatchId, DeadLetterId, Headers, MessageId, Priority, SubscriptionId};
use serde::{Deserialize, Serialize};

/// Publication state of a ledger message.
///
/// ```text
/// Pending ──┬──► Published
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MessageStatus {
    /// Written to the ledger, not yet accepted by the broker.
    #[default]
    Pending,
    /// Accepted by the broker.
    Published,
    /// The broker call failed; the row stays for reconciliation.
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "Pending",
            MessageStatus::Published => "Published",
            MessageStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable record of one broker publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub topic: String,
    pub payload: String,
    pub priority: Priority,
    pub headers: Headers,
    pub correlation_id: String,
    pub status: MessageStatus,
    pub batch_id: Option<BatchId>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Creates a pending message with a fresh correlation id.
    pub fn pending(
        topic: impl Into<String>,
        payload: impl Into<String>,
        priority: Priority,
        headers: Headers,
    ) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            payload: payload.into(),
            priority,
            headers,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            status: MessageStatus::Pending,
            batch_id: None,
            error_message: None,
            created_at: Utc::now(),
            published_at: None,
        }
    }

    pub fn mark_published(&mut self) {
        self.status = MessageStatus::Published;
        self.published_at = Some(Utc::now());
        self.error_message = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = MessageStatus::Failed;
        self.error_message = Some(error.into());
    }
}

/// Progress of a batch publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BatchStatus {
    #[default]
    InProgress,
    Completed,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::InProgress => write!(f, "InProgress"),
            BatchStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// A named group of messages published together.
///
/// `processed_messages` counts attempts, `failed_messages` the attempts the
/// broker or ledger refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBatch {
    pub id: BatchId,
    pub name: String,
    pub topic: String,
    pub status: BatchStatus,
    pub total_messages: usize,
    pub processed_messages: usize,
    pub failed_messages: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MessageBatch {
    pub fn new(topic: impl Into<String>, total_messages: usize) -> Self {
        let topic = topic.into();
        let created_at = Utc::now();
        Self {
            id: BatchId::new(),
            name: format!("{topic}:{}", created_at.format("%Y%m%dT%H%M%S%.3f")),
            topic,
            status: BatchStatus::InProgress,
            total_messages,
            processed_messages: 0,
            failed_messages: 0,
            created_at,
            completed_at: None,
        }
    }
}

/// A durable consumer binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: String,
    pub consumer_name: String,
    pub queue_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, consumer_name: impl Into<String>) -> Self {
        let topic = topic.into();
        let consumer_name = consumer_name.into();
        let now = Utc::now();
        Self {
            id: SubscriptionId::new(),
            queue_name: queue_name(&topic, &consumer_name),
            topic,
            consumer_name,
            is_active: true,
            created_at: now,
            last_activity_at: now,
        }
    }
}

/// Deterministic queue name for a `(topic, consumer)` pair.
pub fn queue_name(topic: &str, consumer_name: &str) -> String {
    format!("{topic}.{consumer_name}")
}

/// A message a consumer could not process.
///
/// Never deleted; `is_discarded` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub id: DeadLetterId,
    pub topic: String,
    pub payload: String,
    pub headers: Headers,
    pub error_message: Option<String>,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
    pub retried_at: Option<DateTime<Utc>>,
    pub is_discarded: bool,
    pub discarded_at: Option<DateTime<Utc>>,
}

impl DeadLetterMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, headers: Headers) -> Self {
        Self {
            id: DeadLetterId::new(),
            topic: topic.into(),
            payload: payload.into(),
            headers,
            error_message: None,
            failed_at: Utc::now(),
            retry_count: 0,
            retried_at: None,
            is_discarded: false,
            discarded_at: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn failed_at(mut self, failed_at: DateTime<Utc>) -> Self {
        self.failed_at = failed_at;
        self
    }
}
