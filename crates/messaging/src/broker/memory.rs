//! In-memory broker for tests and single-process runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BrokerChannel, BrokerError, ExchangeKind, MessageBroker, OutboundMessage};

/// A message as the broker accepted it.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message: OutboundMessage,
}

#[derive(Debug, Clone)]
struct Binding {
    queue: String,
    exchange: String,
    routing_key: String,
}

#[derive(Debug, Default)]
struct InMemoryBrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, Vec<RoutedMessage>>,
    bindings: Vec<Binding>,
    published: Vec<RoutedMessage>,
    channels_opened: usize,
    channels_closed: usize,
    fail_on_open: bool,
    fail_on_publish: bool,
    rejected_bodies: HashSet<Vec<u8>>,
    publish_delay: Option<Duration>,
}

impl InMemoryBrokerState {
    fn route(&mut self, routed: &RoutedMessage, kind: ExchangeKind) {
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == routed.exchange)
            .filter(|b| kind == ExchangeKind::Fanout || b.routing_key == routed.routing_key)
            .map(|b| b.queue.clone())
            .collect();

        for queue in targets {
            if let Some(messages) = self.queues.get_mut(&queue) {
                messages.push(routed.clone());
            }
        }
    }
}

/// In-memory broker with AMQP-like topology semantics.
///
/// Publishing to an undeclared exchange fails, re-declaring an exchange with a
/// different kind fails, and fanout/direct routing is applied to bound queues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<InMemoryBrokerState>>,
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the broker to refuse new channels.
    pub async fn set_fail_on_open(&self, fail: bool) {
        self.state.write().await.fail_on_open = fail;
    }

    /// Configures the broker to reject every publish.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().await.fail_on_publish = fail;
    }

    /// Rejects any publish whose body equals `body`.
    pub async fn reject_body(&self, body: impl Into<Vec<u8>>) {
        self.state.write().await.rejected_bodies.insert(body.into());
    }

    /// Delays every publish, to exercise caller-side timeouts.
    pub async fn set_publish_delay(&self, delay: Option<Duration>) {
        self.state.write().await.publish_delay = delay;
    }

    /// Returns every accepted message in publish order.
    pub async fn published(&self) -> Vec<RoutedMessage> {
        self.state.read().await.published.clone()
    }

    /// Returns the number of accepted messages.
    pub async fn published_count(&self) -> usize {
        self.state.read().await.published.len()
    }

    /// Returns the kind of a declared exchange.
    pub async fn exchange_kind(&self, exchange: &str) -> Option<ExchangeKind> {
        self.state.read().await.exchanges.get(exchange).copied()
    }

    /// Returns true if the queue is declared.
    pub async fn has_queue(&self, queue: &str) -> bool {
        self.state.read().await.queues.contains_key(queue)
    }

    /// Returns true if `queue` is bound to `exchange`.
    pub async fn is_bound(&self, queue: &str, exchange: &str) -> bool {
        self.state
            .read()
            .await
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange)
    }

    /// Returns the messages routed to a queue.
    pub async fn queue_messages(&self, queue: &str) -> Vec<RoutedMessage> {
        self.state
            .read()
            .await
            .queues
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns `(opened, closed)` channel counters.
    pub async fn channel_counts(&self) -> (usize, usize) {
        let state = self.state.read().await;
        (state.channels_opened, state.channels_closed)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let mut state = self.state.write().await;
        if state.fail_on_open {
            return Err(BrokerError::Connection("connection refused".to_string()));
        }
        state.channels_opened += 1;

        Ok(Box::new(InMemoryChannel {
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct InMemoryChannel {
    state: Arc<RwLock<InMemoryBrokerState>>,
    closed: bool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Connection("channel already closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_exchange(
        &mut self,
        exchange: &str,
        kind: ExchangeKind,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        let existing = state.exchanges.get(exchange).copied();
        match existing {
            Some(existing) if existing != kind => Err(BrokerError::Topology(format!(
                "PRECONDITION_FAILED - exchange '{exchange}' already declared as {existing}"
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.to_string(), kind);
                Ok(())
            }
        }
    }

    async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::Topology(format!(
                "NOT_FOUND - no exchange '{exchange}'"
            )));
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::Topology(format!("NOT_FOUND - no queue '{queue}'")));
        }
        let already_bound = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.routing_key == routing_key);
        if !already_bound {
            state.bindings.push(Binding {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        state.queues.remove(queue);
        state.bindings.retain(|b| b.queue != queue);
        Ok(())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let delay = self.state.read().await.publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if state.fail_on_publish || state.rejected_bodies.contains(&message.body) {
            return Err(BrokerError::Rejected(format!(
                "broker nacked message {}",
                message.message_id
            )));
        }
        let kind = *state.exchanges.get(exchange).ok_or_else(|| {
            BrokerError::Rejected(format!("NOT_FOUND - no exchange '{exchange}'"))
        })?;

        let routed = RoutedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            message,
        };
        state.route(&routed, kind);
        state.published.push(routed);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if !self.closed {
            self.closed = true;
            self.state.write().await.channels_closed += 1;
        }
        Ok(())
    }
}
