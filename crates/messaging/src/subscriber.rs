//! Durable consumer bindings.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::SubscriptionId;

use crate::broker::{self, BrokerError, ExchangeKind, MessageBroker};
use crate::config::BrokerConfig;
use crate::error::{MessagingError, Result};
use crate::model::Subscription;
use crate::repository::SubscriptionRepository;

/// Creates and removes per-consumer queues bound to topic exchanges.
#[derive(Clone)]
pub struct MessageSubscriber {
    broker: Arc<dyn MessageBroker>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    operation_timeout: Duration,
}

impl MessageSubscriber {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        config: &BrokerConfig,
    ) -> Self {
        Self {
            broker,
            subscriptions,
            operation_timeout: config.operation_timeout,
        }
    }

    /// Binds a durable queue named `{topic}.{consumer_name}` to the topic.
    ///
    /// Idempotent: subscribing an existing pair reactivates its row.
    #[tracing::instrument(skip(self))]
    pub async fn subscribe(&self, topic: &str, consumer_name: &str) -> Result<Subscription> {
        if topic.trim().is_empty() || consumer_name.trim().is_empty() {
            return Err(MessagingError::InvalidArgument(
                "topic and consumer name must not be empty".to_string(),
            ));
        }

        let subscription = match self.subscriptions.find(topic, consumer_name).await? {
            Some(mut existing) => {
                self.bind(&existing).await?;
                existing.is_active = true;
                existing.last_activity_at = Utc::now();
                self.subscriptions.update(&existing).await?;
                existing
            }
            None => {
                let subscription = Subscription::new(topic, consumer_name);
                self.bind(&subscription).await?;
                self.subscriptions.insert(&subscription).await?;
                subscription
            }
        };

        tracing::info!(
            subscription_id = %subscription.id,
            queue = %subscription.queue_name,
            "subscription active"
        );
        Ok(subscription)
    }

    /// Deletes the consumer queue and deactivates the row.
    ///
    /// Returns false if no such subscription exists. The row is kept.
    #[tracing::instrument(skip(self))]
    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<bool> {
        let Some(mut subscription) = self.subscriptions.get(subscription_id).await? else {
            return Ok(false);
        };
        if !subscription.is_active {
            return Ok(true);
        }

        self.unbind(&subscription.queue_name).await?;

        subscription.is_active = false;
        subscription.last_activity_at = Utc::now();
        self.subscriptions.update(&subscription).await?;

        tracing::info!(queue = %subscription.queue_name, "subscription removed");
        Ok(true)
    }

    /// Active subscriptions, optionally for a single topic.
    pub async fn get_subscriptions(&self, topic: Option<&str>) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.list_active(topic).await?)
    }

    /// Fetches one subscription row, active or not.
    pub async fn get_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.get(id).await?)
    }

    async fn bind(&self, subscription: &Subscription) -> std::result::Result<(), BrokerError> {
        let limit = self.operation_timeout;
        let mut channel = broker::timed("open_channel", limit, self.broker.open_channel()).await?;

        let outcome = async {
            broker::timed(
                "declare_exchange",
                limit,
                channel.declare_exchange(&subscription.topic, ExchangeKind::Fanout),
            )
            .await?;
            broker::timed(
                "declare_queue",
                limit,
                channel.declare_queue(&subscription.queue_name),
            )
            .await?;
            broker::timed(
                "bind_queue",
                limit,
                channel.bind_queue(&subscription.queue_name, &subscription.topic, ""),
            )
            .await
        }
        .await;

        broker::release(channel).await;
        outcome
    }

    async fn unbind(&self, queue: &str) -> std::result::Result<(), BrokerError> {
        let limit = self.operation_timeout;
        let mut channel = broker::timed("open_channel", limit, self.broker.open_channel()).await?;
        let outcome = broker::timed("delete_queue", limit, channel.delete_queue(queue)).await;
        broker::release(channel).await;
        outcome
    }
}
