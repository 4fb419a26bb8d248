//! Broker client abstraction.
//!
//! A [`MessageBroker`] owns the long-lived connection; every publish,
//! subscribe or dead-letter operation opens its own [`BrokerChannel`] and
//! releases it before returning, on success and on error alike.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use common::Headers;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a broker implementation.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection or channel could not be opened.
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// The broker rejected a declare, bind or delete.
    #[error("Broker topology error: {0}")]
    Topology(String),

    /// The broker did not accept a published message.
    #[error("Publish rejected: {0}")]
    Rejected(String),

    /// The operation did not finish within its time limit.
    #[error("Broker operation '{operation}' timed out after {elapsed_ms}ms")]
    Timeout {
        operation: &'static str,
        elapsed_ms: u128,
    },
}

/// Exchange routing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeKind {
    /// Every bound queue receives every message (plain topics).
    Fanout,
    /// Queues receive messages whose routing key matches their binding (saga actions).
    Direct,
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeKind::Fanout => write!(f, "fanout"),
            ExchangeKind::Direct => write!(f, "direct"),
        }
    }
}

/// A typed broker header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

/// A message ready to be handed to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub message_id: String,
    pub correlation_id: String,
    pub priority: u8,
    /// Survives a broker restart (AMQP delivery mode 2).
    pub persistent: bool,
    pub headers: BTreeMap<String, HeaderValue>,
}

impl OutboundMessage {
    /// Creates a persistent message with normal priority and no headers.
    pub fn persistent(
        body: impl Into<Vec<u8>>,
        message_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            body: body.into(),
            message_id: message_id.into(),
            correlation_id: correlation_id.into(),
            priority: common::Priority::Normal.broker_priority(),
            persistent: true,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Copies plain string headers onto the message.
    pub fn with_text_headers(mut self, headers: &Headers) -> Self {
        for (key, value) in headers {
            self.headers
                .insert(key.clone(), HeaderValue::Text(value.clone()));
        }
        self
    }

    /// Returns the body as UTF-8 text, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A channel scoped to a single operation.
///
/// All exchanges and queues are declared durable.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Declares an exchange. Idempotent when the kind matches.
    async fn declare_exchange(&mut self, exchange: &str, kind: ExchangeKind)
    -> Result<(), BrokerError>;

    /// Declares a durable queue. Idempotent.
    async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError>;

    /// Binds a queue to an exchange.
    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Deletes a queue and its bindings.
    async fn delete_queue(&mut self, queue: &str) -> Result<(), BrokerError>;

    /// Publishes a message and waits for the broker to accept it.
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError>;

    /// Closes the channel.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// A shared, long-lived broker connection.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Opens a lightweight channel for one operation.
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}

/// Closes a channel, logging instead of failing: the operation's own outcome
/// is what the caller reports.
pub async fn release(mut channel: Box<dyn BrokerChannel>) {
    if let Err(e) = channel.close().await {
        tracing::warn!(error = %e, "failed to close broker channel");
    }
}

/// Bounds a broker call by `limit`.
pub async fn timed<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, BrokerError>
where
    F: Future<Output = Result<T, BrokerError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::Timeout {
            operation,
            elapsed_ms: limit.as_millis(),
        }),
    }
}
