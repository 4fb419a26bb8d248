//! Persistence interfaces consumed by the messaging layer.
//!
//! Implemented by the persistence layer; [`crate::memory`] provides
//! in-memory versions.

use async_trait::async_trait;
use common::error::Result;
use common::{BatchId, DeadLetterId, MessageId, SubscriptionId};

use crate::model::{DeadLetterMessage, Message, MessageBatch, Subscription};

/// Ledger of published messages and batches.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Inserts a new message. Fails with `Conflict` if the id exists.
    async fn insert_message(&self, message: &Message) -> Result<()>;

    /// Replaces an existing message. Fails with `NotFound` if absent.
    async fn update_message(&self, message: &Message) -> Result<()>;

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>>;

    /// Messages belonging to a batch, in insertion order.
    async fn messages_for_batch(&self, batch_id: BatchId) -> Result<Vec<Message>>;

    async fn insert_batch(&self, batch: &MessageBatch) -> Result<()>;

    async fn update_batch(&self, batch: &MessageBatch) -> Result<()>;

    async fn get_batch(&self, id: BatchId) -> Result<Option<MessageBatch>>;
}

/// Durable consumer bindings.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn insert(&self, subscription: &Subscription) -> Result<()>;

    async fn update(&self, subscription: &Subscription) -> Result<()>;

    /// Fetches a subscription, active or not.
    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>>;

    /// Finds the row for a `(topic, consumer)` pair, active or not.
    async fn find(&self, topic: &str, consumer_name: &str) -> Result<Option<Subscription>>;

    /// Active subscriptions, optionally restricted to one topic.
    async fn list_active(&self, topic: Option<&str>) -> Result<Vec<Subscription>>;
}

/// Messages parked after a consumer failure.
#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    async fn insert(&self, message: &DeadLetterMessage) -> Result<()>;

    async fn update(&self, message: &DeadLetterMessage) -> Result<()>;

    /// Fetches a record, discarded or not.
    async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterMessage>>;

    /// Non-discarded records, newest failure first.
    async fn list_active(&self, offset: usize, limit: usize) -> Result<Vec<DeadLetterMessage>>;
}
