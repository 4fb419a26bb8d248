//! In-memory repository implementations for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::error::Result;
use common::{BatchId, DeadLetterId, MessageId, RepositoryError, SubscriptionId};
use tokio::sync::RwLock;

use crate::model::{DeadLetterMessage, Message, MessageBatch, Subscription};
use crate::repository::{DeadLetterRepository, MessageRepository, SubscriptionRepository};

#[derive(Debug, Default)]
struct MessageLedger {
    messages: Vec<Message>,
    batches: HashMap<BatchId, MessageBatch>,
    fail_on_insert: bool,
    fail_on_update: bool,
}

/// In-memory message ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageRepository {
    state: Arc<RwLock<MessageLedger>>,
}

impl InMemoryMessageRepository {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the ledger to refuse message inserts.
    pub async fn set_fail_on_insert(&self, fail: bool) {
        self.state.write().await.fail_on_insert = fail;
    }

    /// Configures the ledger to refuse message updates.
    pub async fn set_fail_on_update(&self, fail: bool) {
        self.state.write().await.fail_on_update = fail;
    }

    /// Returns every message in insertion order.
    pub async fn all_messages(&self) -> Vec<Message> {
        self.state.read().await.messages.clone()
    }

    /// Returns the number of stored messages.
    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert_message(&self, message: &Message) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_insert {
            return Err(RepositoryError::Unavailable("message ledger offline".to_string()));
        }
        if state.messages.iter().any(|m| m.id == message.id) {
            return Err(RepositoryError::conflict("Message", message.id));
        }
        state.messages.push(message.clone());
        Ok(())
    }

    async fn update_message(&self, message: &Message) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_update {
            return Err(RepositoryError::Unavailable("message ledger offline".to_string()));
        }
        let existing = state
            .messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| RepositoryError::not_found("Message", message.id))?;
        *existing = message.clone();
        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        let state = self.state.read().await;
        Ok(state.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn messages_for_batch(&self, batch_id: BatchId) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.batch_id == Some(batch_id))
            .cloned()
            .collect())
    }

    async fn insert_batch(&self, batch: &MessageBatch) -> Result<()> {
        let mut state = self.state.write().await;
        if state.batches.contains_key(&batch.id) {
            return Err(RepositoryError::conflict("MessageBatch", batch.id));
        }
        state.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn update_batch(&self, batch: &MessageBatch) -> Result<()> {
        let mut state = self.state.write().await;
        let existing = state
            .batches
            .get_mut(&batch.id)
            .ok_or_else(|| RepositoryError::not_found("MessageBatch", batch.id))?;
        *existing = batch.clone();
        Ok(())
    }

    async fn get_batch(&self, id: BatchId) -> Result<Option<MessageBatch>> {
        Ok(self.state.read().await.batches.get(&id).cloned())
    }
}

/// In-memory subscription store.
#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriptionRepository {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored rows, active or not.
    pub async fn row_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> Result<()> {
        let mut rows = self.subscriptions.write().await;
        if rows.iter().any(|s| s.id == subscription.id) {
            return Err(RepositoryError::conflict("Subscription", subscription.id));
        }
        rows.push(subscription.clone());
        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<()> {
        let mut rows = self.subscriptions.write().await;
        let existing = rows
            .iter_mut()
            .find(|s| s.id == subscription.id)
            .ok_or_else(|| RepositoryError::not_found("Subscription", subscription.id))?;
        *existing = subscription.clone();
        Ok(())
    }

    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let rows = self.subscriptions.read().await;
        Ok(rows.iter().find(|s| s.id == id).cloned())
    }

    async fn find(&self, topic: &str, consumer_name: &str) -> Result<Option<Subscription>> {
        let rows = self.subscriptions.read().await;
        Ok(rows
            .iter()
            .find(|s| s.topic == topic && s.consumer_name == consumer_name)
            .cloned())
    }

    async fn list_active(&self, topic: Option<&str>) -> Result<Vec<Subscription>> {
        let rows = self.subscriptions.read().await;
        Ok(rows
            .iter()
            .filter(|s| s.is_active)
            .filter(|s| topic.is_none_or(|t| s.topic == t))
            .cloned()
            .collect())
    }
}

/// In-memory dead-letter store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterRepository {
    messages: Arc<RwLock<HashMap<DeadLetterId, DeadLetterMessage>>>,
}

impl InMemoryDeadLetterRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored rows, discarded or not.
    pub async fn row_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl DeadLetterRepository for InMemoryDeadLetterRepository {
    async fn insert(&self, message: &DeadLetterMessage) -> Result<()> {
        let mut rows = self.messages.write().await;
        if rows.contains_key(&message.id) {
            return Err(RepositoryError::conflict("DeadLetterMessage", message.id));
        }
        rows.insert(message.id, message.clone());
        Ok(())
    }

    async fn update(&self, message: &DeadLetterMessage) -> Result<()> {
        let mut rows = self.messages.write().await;
        let existing = rows
            .get_mut(&message.id)
            .ok_or_else(|| RepositoryError::not_found("DeadLetterMessage", message.id))?;
        *existing = message.clone();
        Ok(())
    }

    async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterMessage>> {
        Ok(self.messages.read().await.get(&id).cloned())
    }

    async fn list_active(&self, offset: usize, limit: usize) -> Result<Vec<DeadLetterMessage>> {
        let rows = self.messages.read().await;
        let mut active: Vec<_> = rows.values().filter(|m| !m.is_discarded).cloned().collect();
        active.sort_by(|a, b| b.failed_at.cmp(&a.failed_at).then(a.id.cmp(&b.id)));
        Ok(active.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use common::{Headers, Priority};

    use super::*;

    #[tokio::test]
    async fn test_message_insert_and_update() {
        let repo = InMemoryMessageRepository::new();
        let mut message = Message::pending("orders", "{}", Priority::Normal, Headers::new());
        repo.insert_message(&message).await.unwrap();

        message.mark_published();
        repo.update_message(&message).await.unwrap();

        let stored = repo.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, crate::model::MessageStatus::Published);
    }

    #[tokio::test]
    async fn test_duplicate_message_insert_conflicts() {
        let repo = InMemoryMessageRepository::new();
        let message = Message::pending("orders", "{}", Priority::Normal, Headers::new());
        repo.insert_message(&message).await.unwrap();

        assert!(matches!(
            repo.insert_message(&message).await,
            Err(RepositoryError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_missing_message_is_not_found() {
        let repo = InMemoryMessageRepository::new();
        let message = Message::pending("orders", "{}", Priority::Normal, Headers::new());
        assert!(matches!(
            repo.update_message(&message).await,
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_active_subscriptions_filters_by_topic() {
        let repo = InMemorySubscriptionRepository::new();
        let mut inactive = Subscription::new("orders", "audit");
        inactive.is_active = false;
        repo.insert(&Subscription::new("orders", "billing")).await.unwrap();
        repo.insert(&Subscription::new("payments", "billing")).await.unwrap();
        repo.insert(&inactive).await.unwrap();

        assert_eq!(repo.list_active(None).await.unwrap().len(), 2);
        let orders = repo.list_active(Some("orders")).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].consumer_name, "billing");
        assert_eq!(repo.row_count().await, 3);
    }

    #[tokio::test]
    async fn test_dead_letters_newest_first_and_paged() {
        let repo = InMemoryDeadLetterRepository::new();
        let now = Utc::now();
        for minutes in [30, 10, 20] {
            let message = DeadLetterMessage::new("orders", format!("{minutes}"), Headers::new())
                .failed_at(now - Duration::minutes(minutes));
            repo.insert(&message).await.unwrap();
        }

        let first_page = repo.list_active(0, 2).await.unwrap();
        let payloads: Vec<_> = first_page.iter().map(|m| m.payload.as_str()).collect();
        assert_eq!(payloads, ["10", "20"]);

        let second_page = repo.list_active(2, 2).await.unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].payload, "30");
    }
}
