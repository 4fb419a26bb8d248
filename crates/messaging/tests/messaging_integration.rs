//! Integration tests for the publisher, subscriber and dead-letter manager.

use std::sync::Arc;

use common::{Headers, Priority};
use messaging::{
    BatchStatus, BrokerConfig, DeadLetterManager, ExchangeKind, InMemoryBroker,
    InMemoryDeadLetterRepository, InMemoryMessageRepository, InMemorySubscriptionRepository,
    MessagePublisher, MessageRepository, MessageStatus, MessageSubscriber,
};

struct TestHarness {
    broker: InMemoryBroker,
    messages: InMemoryMessageRepository,
    subscriptions: InMemorySubscriptionRepository,
    publisher: MessagePublisher,
    subscriber: MessageSubscriber,
    dead_letters: DeadLetterManager,
}

impl TestHarness {
    fn new() -> Self {
        let config = BrokerConfig::default();
        let broker = InMemoryBroker::new();
        let messages = InMemoryMessageRepository::new();
        let subscriptions = InMemorySubscriptionRepository::new();

        let publisher =
            MessagePublisher::new(Arc::new(broker.clone()), Arc::new(messages.clone()), &config);
        let subscriber = MessageSubscriber::new(
            Arc::new(broker.clone()),
            Arc::new(subscriptions.clone()),
            &config,
        );
        let dead_letters =
            DeadLetterManager::new(Arc::new(InMemoryDeadLetterRepository::new()), publisher.clone());

        Self {
            broker,
            messages,
            subscriptions,
            publisher,
            subscriber,
            dead_letters,
        }
    }
}

#[tokio::test]
async fn test_write_ahead_record_survives_broker_outage() {
    let h = TestHarness::new();
    h.broker.set_fail_on_open(true).await;

    let published = h
        .publisher
        .publish("orders.created", r#"{"order":42}"#, Priority::Critical, None)
        .await;
    assert!(!published);

    let stored = h.messages.all_messages().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].payload, r#"{"order":42}"#);
    assert_eq!(stored[0].priority, Priority::Critical);
    assert_ne!(stored[0].status, MessageStatus::Published);
    assert_eq!(h.broker.published_count().await, 0);
}

#[tokio::test]
async fn test_batch_with_rejected_item_is_best_effort() {
    let h = TestHarness::new();
    h.broker.reject_body("p2").await;

    let report = h
        .publisher
        .publish_batch("orders", &["p1", "p2", "p3"], Priority::Normal)
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(report.failed, 1);
    assert!(!report.is_success());
    assert!(report.items[0].is_success());
    assert!(!report.items[1].is_success());
    assert!(report.items[2].is_success());

    let batch = h.messages.get_batch(report.batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.processed_messages, 3);
    assert_eq!(batch.failed_messages, 1);
    assert!(batch.completed_at.is_some());

    let rows = h.messages.messages_for_batch(report.batch_id).await.unwrap();
    assert_eq!(rows.len(), 3);
    let p2 = rows.iter().find(|m| m.payload == "p2").unwrap();
    assert_ne!(p2.status, MessageStatus::Published);
    assert!(
        rows.iter()
            .filter(|m| m.payload != "p2")
            .all(|m| m.status == MessageStatus::Published)
    );

    let bodies: Vec<_> = h
        .broker
        .published()
        .await
        .iter()
        .map(|r| r.message.body_text())
        .collect();
    assert_eq!(bodies, ["p1", "p3"]);
}

#[tokio::test]
async fn test_subscribe_then_unsubscribe_round_trip() {
    let h = TestHarness::new();

    let subscription = h.subscriber.subscribe("orders", "billing").await.unwrap();
    assert_eq!(subscription.queue_name, "orders.billing");
    assert!(h.broker.has_queue("orders.billing").await);
    assert!(h.broker.is_bound("orders.billing", "orders").await);
    assert_eq!(
        h.broker.exchange_kind("orders").await,
        Some(ExchangeKind::Fanout)
    );

    assert!(h.subscriber.unsubscribe(subscription.id).await.unwrap());

    let active = h.subscriber.get_subscriptions(Some("orders")).await.unwrap();
    assert!(active.is_empty());
    assert!(!h.broker.has_queue("orders.billing").await);

    let historical = h
        .subscriber
        .get_subscription(subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!historical.is_active);
    assert_eq!(historical.consumer_name, "billing");
}

#[tokio::test]
async fn test_resubscribe_is_idempotent() {
    let h = TestHarness::new();

    let first = h.subscriber.subscribe("orders", "billing").await.unwrap();
    let second = h.subscriber.subscribe("orders", "billing").await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(h.subscriptions.row_count().await, 1);

    h.subscriber.unsubscribe(first.id).await.unwrap();
    let third = h.subscriber.subscribe("orders", "billing").await.unwrap();
    assert_eq!(third.id, first.id);
    assert!(third.is_active);
    assert_eq!(h.subscriptions.row_count().await, 1);
}

#[tokio::test]
async fn test_published_messages_reach_subscribers() {
    let h = TestHarness::new();
    h.subscriber.subscribe("orders", "billing").await.unwrap();
    h.subscriber.subscribe("orders", "audit").await.unwrap();
    h.subscriber.subscribe("payments", "audit").await.unwrap();

    assert!(h.publisher.publish("orders", "{}", Priority::Normal, None).await);

    assert_eq!(h.broker.queue_messages("orders.billing").await.len(), 1);
    assert_eq!(h.broker.queue_messages("orders.audit").await.len(), 1);
    assert!(h.broker.queue_messages("payments.audit").await.is_empty());

    let all = h.subscriber.get_subscriptions(None).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_unsubscribe_unknown_returns_false() {
    let h = TestHarness::new();
    assert!(
        !h.subscriber
            .unsubscribe(common::SubscriptionId::new())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_subscribe_rejects_empty_names() {
    let h = TestHarness::new();
    assert!(h.subscriber.subscribe("", "billing").await.is_err());
    assert!(h.subscriber.subscribe("orders", "  ").await.is_err());
}

#[tokio::test]
async fn test_dead_letter_retry_reaches_original_topic() {
    let h = TestHarness::new();
    h.subscriber.subscribe("orders", "billing").await.unwrap();

    let mut headers = Headers::new();
    headers.insert("x-origin".to_string(), "billing".to_string());
    let parked = h
        .dead_letters
        .record("orders", "{\"retry\":true}", headers, "deserialization failed")
        .await
        .unwrap();

    assert!(h.dead_letters.retry(parked.id).await.unwrap());

    let delivered = h.broker.queue_messages("orders.billing").await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].message.body_text(), "{\"retry\":true}");
    assert_eq!(
        delivered[0].message.priority,
        Priority::Normal.broker_priority()
    );

    assert!(h.dead_letters.discard(parked.id).await.unwrap());
    assert!(h.dead_letters.discard(parked.id).await.unwrap());
    assert!(h.dead_letters.list(1, 20).await.unwrap().is_empty());

    let stored = h.dead_letters.get(parked.id).await.unwrap().unwrap();
    assert!(stored.is_discarded);
    assert_eq!(stored.retry_count, 1);
}
