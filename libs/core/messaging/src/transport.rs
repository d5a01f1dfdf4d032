//! The seam between [`QueueBroker`](crate::QueueBroker) and a concrete broker.
//!
//! `amqp::AmqpTransport` talks to RabbitMQ through lapin; [`InMemoryTransport`]
//! keeps everything in process for tests and local runs.
//!
//! [`InMemoryTransport`]: crate::memory::InMemoryTransport

use crate::envelope::{Headers, JobMessage};
use crate::error::BrokerError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

/// Stream of deliveries from one queue.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Opens channels to a broker.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn Channel>, BrokerError>;
}

/// An open channel. Declarations must be idempotent for identical arguments.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError>;

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Publish `body` to `queue` through the default exchange.
    async fn publish(&self, queue: &str, body: Vec<u8>, headers: Headers)
        -> Result<(), BrokerError>;

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Settles a single delivery.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A raw delivery: the body is decoded by the consumer so that undecodable
/// messages can still be settled and forwarded.
pub struct Delivery {
    pub queue: String,
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub headers: Headers,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(
        queue: impl Into<String>,
        delivery_tag: u64,
        body: Vec<u8>,
        headers: Headers,
        acker: Box<dyn Acknowledge>,
    ) -> Self {
        Self {
            queue: queue.into(),
            delivery_tag,
            body,
            headers,
            acker,
        }
    }

    pub fn decode(&self) -> Result<JobMessage, serde_json::Error> {
        JobMessage::decode(&self.body, self.headers.clone())
    }

    /// Positive acknowledgement. Consumes the delivery so it cannot be settled twice.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    /// Negative acknowledgement. Consumes the delivery so it cannot be settled twice.
    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("delivery_tag", &self.delivery_tag)
            .field("body_len", &self.body.len())
            .field("headers", &self.headers)
            .finish()
    }
}
