//! Post-mortem handling of messages a consumer could not process.

use std::sync::Arc;

use chrono::Utc;
use common::{DeadLetterId, Headers, Priority};

use crate::error::Result;
use crate::model::DeadLetterMessage;
use crate::publisher::MessagePublisher;
use crate::repository::DeadLetterRepository;

/// Retries or discards dead-lettered messages.
///
/// Records are never deleted: a retry only stamps the attempt, and a discard
/// hides the record from [`DeadLetterManager::list`].
#[derive(Clone)]
pub struct DeadLetterManager {
    dead_letters: Arc<dyn DeadLetterRepository>,
    publisher: MessagePublisher,
}

impl DeadLetterManager {
    pub fn new(dead_letters: Arc<dyn DeadLetterRepository>, publisher: MessagePublisher) -> Self {
        Self {
            dead_letters,
            publisher,
        }
    }

    /// Parks a message a consumer failed to process.
    #[tracing::instrument(skip(self, payload, headers))]
    pub async fn record(
        &self,
        topic: &str,
        payload: &str,
        headers: Headers,
        error: &str,
    ) -> Result<DeadLetterMessage> {
        let message = DeadLetterMessage::new(topic, payload, headers).with_error(error);
        self.dead_letters.insert(&message).await?;
        tracing::warn!(dead_letter_id = %message.id, "message dead-lettered");
        Ok(message)
    }

    /// Active messages, newest failure first. `page` is 1-based.
    pub async fn list(&self, page: usize, page_size: usize) -> Result<Vec<DeadLetterMessage>> {
        if page_size == 0 {
            return Ok(Vec::new());
        }
        let offset = page.saturating_sub(1).saturating_mul(page_size);
        Ok(self.dead_letters.list_active(offset, page_size).await?)
    }

    /// Fetches a record, discarded or not.
    pub async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterMessage>> {
        Ok(self.dead_letters.get(id).await?)
    }

    /// Republishes the message to its original topic at normal priority.
    ///
    /// Returns false if the record is missing, discarded, or the publish
    /// failed. The record stays active either way.
    #[tracing::instrument(skip(self))]
    pub async fn retry(&self, id: DeadLetterId) -> Result<bool> {
        let Some(mut message) = self.dead_letters.get(id).await? else {
            return Ok(false);
        };
        if message.is_discarded {
            tracing::warn!("refusing to retry a discarded message");
            return Ok(false);
        }

        let published = self
            .publisher
            .publish(
                &message.topic,
                &message.payload,
                Priority::Normal,
                Some(message.headers.clone()),
            )
            .await;
        if !published {
            return Ok(false);
        }

        message.retry_count += 1;
        message.retried_at = Some(Utc::now());
        self.dead_letters.update(&message).await?;

        metrics::counter!("dead_letters_retried_total").increment(1);
        tracing::info!(retry_count = message.retry_count, "dead letter retried");
        Ok(true)
    }

    /// Marks the message discarded. Idempotent; returns false if missing.
    #[tracing::instrument(skip(self))]
    pub async fn discard(&self, id: DeadLetterId) -> Result<bool> {
        let Some(mut message) = self.dead_letters.get(id).await? else {
            return Ok(false);
        };
        if message.is_discarded {
            return Ok(true);
        }

        message.is_discarded = true;
        message.discarded_at = Some(Utc::now());
        self.dead_letters.update(&message).await?;

        metrics::counter!("dead_letters_discarded_total").increment(1);
        tracing::info!("dead letter discarded");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::InMemoryBroker;
    use crate::config::BrokerConfig;
    use crate::memory::{InMemoryDeadLetterRepository, InMemoryMessageRepository};

    fn setup() -> (DeadLetterManager, InMemoryBroker) {
        let broker = InMemoryBroker::new();
        let publisher = MessagePublisher::new(
            Arc::new(broker.clone()),
            Arc::new(InMemoryMessageRepository::new()),
            &BrokerConfig::default(),
        );
        let manager = DeadLetterManager::new(Arc::new(InMemoryDeadLetterRepository::new()), publisher);
        (manager, broker)
    }

    #[tokio::test]
    async fn test_retry_republishes_and_counts() {
        let (manager, broker) = setup();
        let parked = manager
            .record("orders", "{\"id\":7}", Headers::new(), "handler panicked")
            .await
            .unwrap();

        assert!(manager.retry(parked.id).await.unwrap());
        assert!(manager.retry(parked.id).await.unwrap());

        let stored = manager.get(parked.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 2);
        assert!(stored.retried_at.is_some());
        assert!(!stored.is_discarded);
        assert_eq!(manager.list(1, 10).await.unwrap().len(), 1);

        let sent = broker.published().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].exchange, "orders");
        assert_eq!(sent[0].message.body_text(), "{\"id\":7}");
    }

    #[tokio::test]
    async fn test_failed_retry_leaves_count() {
        let (manager, broker) = setup();
        let parked = manager
            .record("orders", "x", Headers::new(), "boom")
            .await
            .unwrap();
        broker.set_fail_on_publish(true).await;

        assert!(!manager.retry(parked.id).await.unwrap());
        let stored = manager.get(parked.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 0);
        assert!(stored.retried_at.is_none());
    }

    #[tokio::test]
    async fn test_discard_is_idempotent_and_hides_message() {
        let (manager, _) = setup();
        let parked = manager
            .record("orders", "x", Headers::new(), "boom")
            .await
            .unwrap();

        assert!(manager.discard(parked.id).await.unwrap());
        assert!(manager.discard(parked.id).await.unwrap());

        assert!(manager.list(1, 10).await.unwrap().is_empty());
        let stored = manager.get(parked.id).await.unwrap().unwrap();
        assert!(stored.is_discarded);
        assert!(!manager.retry(parked.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let (manager, _) = setup();
        assert!(!manager.retry(DeadLetterId::new()).await.unwrap());
        assert!(!manager.discard(DeadLetterId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_pages_are_one_based() {
        let (manager, _) = setup();
        for i in 0..5 {
            manager
                .record("orders", &i.to_string(), Headers::new(), "boom")
                .await
                .unwrap();
        }

        assert_eq!(manager.list(1, 2).await.unwrap().len(), 2);
        assert_eq!(manager.list(3, 2).await.unwrap().len(), 1);
        assert_eq!(manager.list(0, 2).await.unwrap(), manager.list(1, 2).await.unwrap());
        assert!(manager.list(1, 0).await.unwrap().is_empty());
    }
}
