//! AMQP 0-9-1 broker backed by `lapin`.

use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::{
    BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use super::{BrokerChannel, BrokerError, ExchangeKind, HeaderValue, MessageBroker, OutboundMessage};
use crate::config::BrokerConfig;

/// Broker over a single shared AMQP connection.
#[derive(Clone)]
pub struct AmqpBroker {
    connection: Arc<Connection>,
}

impl AmqpBroker {
    /// Connects to the broker named by `config.url`.
    #[tracing::instrument(skip(config), fields(connection_name = %config.connection_name))]
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let properties = ConnectionProperties::default()
            .with_connection_name(LongString::from(config.connection_name.clone()));
        let connection = super::timed("connect", config.operation_timeout, async move {
            Connection::connect(&config.url, properties)
                .await
                .map_err(|e| BrokerError::Connection(e.to_string()))
        })
        .await?;

        tracing::info!("connected to AMQP broker");
        Ok(Self {
            connection: Arc::new(connection),
        })
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        if let Err(e) = channel.confirm_select(ConfirmSelectOptions::default()).await {
            if let Err(close_err) = channel.close(200, "OK").await {
                tracing::warn!(error = %close_err, "failed to close channel after confirm_select error");
            }
            return Err(BrokerError::Connection(e.to_string()));
        }

        Ok(Box::new(AmqpChannel { channel }))
    }
}

struct AmqpChannel {
    channel: Channel,
}

fn field_table(message: &OutboundMessage) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in &message.headers {
        let value = match value {
            HeaderValue::Bool(b) => AMQPValue::Boolean(*b),
            HeaderValue::Int(i) => AMQPValue::LongLongInt(*i),
            HeaderValue::Text(s) => AMQPValue::LongString(LongString::from(s.clone())),
        };
        table.insert(ShortString::from(key.clone()), value);
    }
    table
}

fn topology(e: lapin::Error) -> BrokerError {
    BrokerError::Topology(e.to_string())
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(
        &mut self,
        exchange: &str,
        kind: ExchangeKind,
    ) -> Result<(), BrokerError> {
        let kind = match kind {
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        };
        self.channel
            .exchange_declare(
                exchange,
                kind,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(topology)
    }

    async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(topology)
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(topology)
    }

    async fn delete_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map(|_| ())
            .map_err(topology)
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default()
            .with_message_id(ShortString::from(message.message_id.clone()))
            .with_correlation_id(ShortString::from(message.correlation_id.clone()))
            .with_priority(message.priority)
            .with_content_type(ShortString::from("application/json"))
            .with_timestamp(chrono::Utc::now().timestamp().max(0) as u64)
            .with_headers(field_table(&message));
        if message.persistent {
            properties = properties.with_delivery_mode(2);
        }

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Rejected(e.to_string()))?;
        let confirmation = confirm
            .await
            .map_err(|e| BrokerError::Rejected(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(BrokerError::Rejected(format!(
                "broker nacked message {}",
                message.message_id
            )));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.channel
            .close(200, "OK")
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }
}
