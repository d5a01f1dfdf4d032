//! Lazily connected, explicitly owned broker handle.

use crate::config::Topology;
use crate::envelope::{Headers, JobMessage};
use crate::error::BrokerError;
use crate::transport::{Channel, DeliveryStream, Transport};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// Owns the single broker channel shared by publishers and consumers.
///
/// The channel is created on first use. `connect` holds the guard for the whole
/// setup, so concurrent callers wait for the first one and then find the
/// channel in place.
pub struct QueueBroker {
    transport: Arc<dyn Transport>,
    topology: Topology,
    channel: Mutex<Option<Arc<dyn Channel>>>,
}

impl QueueBroker {
    pub fn new(transport: Arc<dyn Transport>, topology: Topology) -> Self {
        Self {
            transport,
            topology,
            channel: Mutex::new(None),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn work_queue(&self) -> &str {
        &self.topology.work_queue
    }

    pub fn dead_letter_queue(&self) -> &str {
        &self.topology.dead_letter_queue
    }

    pub async fn is_connected(&self) -> bool {
        self.channel.lock().await.is_some()
    }

    /// Open the channel and declare the topology. No-op when already connected.
    ///
    /// Order: open, declare exchange, declare work queue, declare dead-letter
    /// queue, bind work queue. A failure at any step leaves the broker
    /// disconnected and is reported as [`BrokerError::Connection`].
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.channel().await.map(|_| ())
    }

    async fn channel(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            return Ok(Arc::clone(channel));
        }

        let topology = &self.topology;
        info!(
            exchange = %topology.exchange,
            work_queue = %topology.work_queue,
            dead_letter_queue = %topology.dead_letter_queue,
            "Connecting to broker"
        );

        let channel = self.transport.open().await.map_err(into_connection)?;
        channel
            .declare_exchange(&topology.exchange)
            .await
            .map_err(into_connection)?;
        channel
            .declare_queue(&topology.work_queue)
            .await
            .map_err(into_connection)?;
        channel
            .declare_queue(&topology.dead_letter_queue)
            .await
            .map_err(into_connection)?;
        channel
            .bind_queue(
                &topology.work_queue,
                &topology.exchange,
                topology.routing_key(),
            )
            .await
            .map_err(into_connection)?;

        info!("Broker topology declared");
        *guard = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Publish and report failures to the caller.
    #[instrument(skip(self, message, headers), fields(attempt = %message.attempt()))]
    pub async fn try_publish(
        &self,
        message: &JobMessage,
        queue: &str,
        headers: Option<Headers>,
    ) -> Result<(), BrokerError> {
        let body = message.encode()?;
        let headers = message.wire_headers(headers.as_ref());
        self.channel().await?.publish(queue, body, headers).await?;
        debug!("Message published");
        Ok(())
    }

    /// Best-effort publish: failures are logged and swallowed.
    ///
    /// Returns whether the message was handed to the broker.
    pub async fn publish(
        &self,
        message: &JobMessage,
        queue: &str,
        headers: Option<Headers>,
    ) -> bool {
        match self.try_publish(message, queue, headers).await {
            Ok(()) => true,
            Err(e) => {
                error!(queue = %queue, error = %e, "Failed to publish message");
                false
            }
        }
    }

    /// Publish an opaque body untouched, used for deliveries that do not decode.
    pub async fn forward_raw(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: Headers,
    ) -> Result<(), BrokerError> {
        self.channel().await?.publish(queue, body, headers).await
    }

    /// Start consuming `queue` with the topology's prefetch.
    pub async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let channel = self.channel().await?;
        info!(queue = %queue, prefetch = self.topology.prefetch, "Subscribing");
        channel.consume(queue, self.topology.prefetch).await
    }

    /// Close the channel if open. Later calls reconnect lazily.
    pub async fn close(&self) -> Result<(), BrokerError> {
        let channel = self.channel.lock().await.take();
        match channel {
            Some(channel) => {
                info!("Closing broker connection");
                channel.close().await
            }
            None => Ok(()),
        }
    }
}

fn into_connection(err: BrokerError) -> BrokerError {
    match err {
        BrokerError::Connection(_) => err,
        other => BrokerError::Connection(other.to_string()),
    }
}
