use super::RabbitMqConfig;
use crate::envelope::Headers;
use crate::error::BrokerError;
use crate::transport::{Acknowledge, Channel, Delivery, DeliveryStream, Transport};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Connection, ConnectionProperties, ExchangeKind};
use std::sync::Arc;
use tracing::debug;

const PERSISTENT: u8 = 2;

/// Opens lapin connections; one connection and channel per [`Transport::open`].
#[derive(Clone)]
pub struct AmqpTransport {
    uri: String,
}

impl AmqpTransport {
    pub fn new(config: &RabbitMqConfig) -> Self {
        Self { uri: config.uri() }
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn open(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(BrokerError::connection)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(BrokerError::connection)?;
        debug!(channel_id = channel.id(), "AMQP channel opened");
        Ok(Arc::new(AmqpChannel {
            connection,
            channel,
        }))
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::connection)
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(BrokerError::connection)
    }

    async fn bind_queue(
        &self,
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
            .map_err(BrokerError::connection)
    }

    async fn publish(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: Headers,
    ) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_delivery_mode(PERSISTENT)
            .with_headers(to_field_table(&headers));

        self.channel
            .basic_publish("", queue, BasicPublishOptions::default(), &body, properties)
            .await
            .map_err(|e| BrokerError::publish(queue, e))?
            .await
            .map_err(|e| BrokerError::publish(queue, e))?;
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::consume(queue, e))?;

        let tag = format!("{queue}-{}", uuid::Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::consume(queue, e))?;

        let queue = queue.to_string();
        Ok(consumer
            .map(move |delivery| match delivery {
                Ok(delivery) => Ok(into_delivery(&queue, delivery)),
                Err(e) => Err(BrokerError::consume(&queue, e)),
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.channel
            .close(200, "OK")
            .await
            .map_err(BrokerError::connection)?;
        self.connection
            .close(200, "OK")
            .await
            .map_err(BrokerError::connection)
    }
}

fn into_delivery(queue: &str, mut delivery: lapin::message::Delivery) -> Delivery {
    let headers = delivery
        .properties
        .headers()
        .as_ref()
        .map(from_field_table)
        .unwrap_or_default();
    let body = std::mem::take(&mut delivery.data);
    let delivery_tag = delivery.delivery_tag;
    Delivery::new(
        queue,
        delivery_tag,
        body,
        headers,
        Box::new(AmqpAcker { delivery }),
    )
}

/// Keeps the lapin delivery (minus its body) for its acker.
struct AmqpAcker {
    delivery: lapin::message::Delivery,
}

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.delivery
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::settle(self.delivery.delivery_tag, e))
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.delivery
            .acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map_err(|e| BrokerError::settle(self.delivery.delivery_tag, e))
    }
}

fn to_field_table(headers: &Headers) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(
            ShortString::from(key.as_str()),
            AMQPValue::LongString(LongString::from(value.as_str())),
        );
    }
    table
}

/// String view of AMQP headers. Producers in other languages often send the
/// attempt counter as an integer, so numeric values are kept as their decimal
/// form; other value types are ignored.
fn from_field_table(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
                AMQPValue::ShortString(s) => s.as_str().to_string(),
                AMQPValue::ShortShortInt(v) => v.to_string(),
                AMQPValue::ShortShortUInt(v) => v.to_string(),
                AMQPValue::ShortInt(v) => v.to_string(),
                AMQPValue::ShortUInt(v) => v.to_string(),
                AMQPValue::LongInt(v) => v.to_string(),
                AMQPValue::LongUInt(v) => v.to_string(),
                AMQPValue::LongLongInt(v) => v.to_string(),
                AMQPValue::Boolean(v) => v.to_string(),
                _ => return None,
            };
            Some((key.as_str().to_string(), value))
        })
        .collect()
}
