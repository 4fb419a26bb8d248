//! Messaging layer backing the saga coordinator.
//!
//! - [`MessagePublisher`] writes every publish to a durable ledger before it
//!   touches the broker, so a crash between the two is detectable.
//! - [`MessageSubscriber`] manages durable consumer bindings.
//! - [`DeadLetterManager`] retries or discards messages a consumer gave up on.
//!
//! The broker itself sits behind [`MessageBroker`]; an in-memory broker ships
//! for tests and local runs, and an AMQP broker is available with the `amqp`
//! feature.

pub mod broker;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod memory;
pub mod model;
pub mod publisher;
pub mod repository;
pub mod subscriber;

#[cfg(feature = "amqp")]
pub use broker::amqp::AmqpBroker;
pub use broker::memory::{InMemoryBroker, RoutedMessage};
pub use broker::{
    BrokerChannel, BrokerError, ExchangeKind, HeaderValue, MessageBroker, OutboundMessage,
};
pub use config::BrokerConfig;
pub use dead_letter::DeadLetterManager;
pub use error::{MessagingError, Result};
pub use memory::{
    InMemoryDeadLetterRepository, InMemoryMessageRepository, InMemorySubscriptionRepository,
};
pub use model::{
    BatchStatus, DeadLetterMessage, Message, MessageBatch, MessageStatus, Subscription,
};
pub use publisher::{BatchItemResult, BatchReport, MessagePublisher};
pub use repository::{DeadLetterRepository, MessageRepository, SubscriptionRepository};
pub use subscriber::MessageSubscriber;
