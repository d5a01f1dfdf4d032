//! Subscription loop shared by the work-queue and dead-letter consumers.

use crate::broker::QueueBroker;
use crate::error::BrokerError;
use crate::handler::DeliveryHandler;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pulls deliveries from one queue and runs each in its own task.
///
/// At most `max_in_flight` handlers run at once; the broker prefetch bounds
/// how many more are buffered. On shutdown the loop stops taking deliveries
/// and waits for every running handler to settle its message.
pub struct Worker {
    broker: Arc<QueueBroker>,
    queue: String,
    handler: Arc<dyn DeliveryHandler>,
    max_in_flight: usize,
}

impl Worker {
    pub fn new(
        broker: Arc<QueueBroker>,
        queue: impl Into<String>,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Self {
        let max_in_flight = usize::from(broker.topology().prefetch);
        Self {
            broker,
            queue: queue.into(),
            handler,
            max_in_flight,
        }
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Consume until `shutdown` flips to `true`.
    ///
    /// A subscription that ends on its own (channel or connection lost) is an
    /// error, returned once in-flight handlers have settled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BrokerError> {
        let mut deliveries = self.broker.subscribe(&self.queue).await?;
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        let mut stream_ended = false;

        info!(
            queue = %self.queue,
            max_in_flight = self.max_in_flight,
            "Worker started"
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(queue = %self.queue, "Shutdown signal received, no longer accepting deliveries");
                        break;
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(queue = %self.queue, error = %e, "Handler task panicked");
                    }
                }

                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        let permit = match Arc::clone(&semaphore).acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        };
                        let handler = Arc::clone(&self.handler);
                        tasks.spawn(async move {
                            let transition = handler.on_delivery(delivery).await;
                            drop(permit);
                            transition
                        });
                    }
                    Some(Err(e)) => {
                        warn!(queue = %self.queue, error = %e, "Delivery error");
                    }
                    None => {
                        error!(queue = %self.queue, "Delivery stream ended without shutdown");
                        stream_ended = true;
                        break;
                    }
                },
            }
        }

        drop(deliveries);

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(queue = %self.queue, in_flight, "Waiting for in-flight handlers");
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(transition) => debug!(queue = %self.queue, transition = transition.as_str(), "Drained"),
                Err(e) => error!(queue = %self.queue, error = %e, "Handler task panicked"),
            }
        }

        if stream_ended {
            return Err(BrokerError::connection(format!(
                "delivery stream for '{}' ended",
                self.queue
            )));
        }

        info!(queue = %self.queue, "Worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryPolicy, Topology};
    use crate::consumer::RetryConsumer;
    use crate::envelope::Headers;
    use crate::handler::testing::ScriptedHandler;
    use crate::handler::{JobHandler, Transition};
    use crate::memory::{InMemoryTransport, SettleOutcome};
    use crate::transport::Delivery;
    use crate::{JobMessage, ProcessingError};
    use async_trait::async_trait;
    use std::time::Duration;

    const WORK: &str = "book.queue";

    fn broker(transport: &InMemoryTransport) -> Arc<QueueBroker> {
        Arc::new(QueueBroker::new(
            Arc::new(transport.clone()),
            Topology::new("books_exchange", WORK, "book.queue.dlq"),
        ))
    }

    const BODY: &[u8] = br#"{"payload":{"criteria":{}},"queue_name":"book.queue"}"#;

    async fn wait_for_settlements(transport: &InMemoryTransport, count: usize) {
        for _ in 0..200 {
            if transport.settlements().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} settlements, got {:?}", transport.settlements());
    }

    #[tokio::test]
    async fn test_processes_deliveries_until_shutdown() {
        let transport = InMemoryTransport::new();
        let broker = broker(&transport);
        let handler = Arc::new(ScriptedHandler::default());
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1)).unwrap();
        let consumer = RetryConsumer::new(Arc::clone(&handler), Arc::clone(&broker), policy);
        let worker = Worker::new(Arc::clone(&broker), WORK, Arc::new(consumer));
        let (tx, rx) = watch::channel(false);

        let running = tokio::spawn(async move { worker.run(rx).await });
        broker.connect().await.unwrap();
        for _ in 0..3 {
            transport.inject(WORK, BODY.to_vec(), Headers::new());
        }
        wait_for_settlements(&transport, 3).await;
        tx.send(true).unwrap();

        running.await.unwrap().unwrap();
        assert_eq!(handler.calls(), 3);
        assert!(transport
            .settlements()
            .iter()
            .all(|s| s.outcome == SettleOutcome::Ack));
    }

    #[tokio::test]
    async fn test_requeued_message_is_consumed_again() {
        let transport = InMemoryTransport::new();
        let broker = broker(&transport);
        let handler = Arc::new(ScriptedHandler::failing(1));
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1)).unwrap();
        let consumer = RetryConsumer::new(Arc::clone(&handler), Arc::clone(&broker), policy);
        let worker = Worker::new(Arc::clone(&broker), WORK, Arc::new(consumer));
        let (tx, rx) = watch::channel(false);

        let running = tokio::spawn(async move { worker.run(rx).await });
        broker.connect().await.unwrap();
        transport.inject(WORK, BODY.to_vec(), Headers::new());
        wait_for_settlements(&transport, 2).await;
        tx.send(true).unwrap();
        running.await.unwrap().unwrap();

        let seen = handler.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].attempt().value(), 0);
        assert_eq!(seen[1].attempt().value(), 1);
        let outcomes: Vec<_> = transport.settlements().into_iter().map(|s| s.outcome).collect();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.contains(&SettleOutcome::Nack { requeue: false }));
        assert!(outcomes.contains(&SettleOutcome::Ack));
    }

    struct SlowHandler;

    #[async_trait]
    impl JobHandler for SlowHandler {
        async fn handle(&self, _message: &JobMessage) -> Result<(), ProcessingError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    struct Direct<H>(H);

    #[async_trait]
    impl<H: JobHandler> DeliveryHandler for Direct<H> {
        async fn on_delivery(&self, delivery: Delivery) -> Transition {
            let message = delivery.decode().unwrap();
            self.0.handle(&message).await.unwrap();
            delivery.ack().await.unwrap();
            Transition::Acked
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_handlers() {
        let transport = InMemoryTransport::new();
        let broker = broker(&transport);
        let worker = Worker::new(Arc::clone(&broker), WORK, Arc::new(Direct(SlowHandler)));
        let (tx, rx) = watch::channel(false);

        let running = tokio::spawn(async move { worker.run(rx).await });
        broker.connect().await.unwrap();
        transport.inject(WORK, BODY.to_vec(), Headers::new());
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        running.await.unwrap().unwrap();

        assert_eq!(transport.settlements().len(), 1);
        assert_eq!(transport.settlements()[0].outcome, SettleOutcome::Ack);
    }

    #[tokio::test]
    async fn test_lost_subscription_is_an_error() {
        let transport = InMemoryTransport::new();
        let broker = broker(&transport);
        let handler = Arc::new(ScriptedHandler::default());
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1)).unwrap();
        let consumer = RetryConsumer::new(Arc::clone(&handler), Arc::clone(&broker), policy);
        let worker = Worker::new(Arc::clone(&broker), WORK, Arc::new(consumer));
        let (_tx, rx) = watch::channel(false);

        let running = tokio::spawn(async move { worker.run(rx).await });
        broker.connect().await.unwrap();
        transport.inject(WORK, BODY.to_vec(), Headers::new());
        wait_for_settlements(&transport, 1).await;
        transport.end_stream(WORK);

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("worker should stop when its stream ends")
            .unwrap();
        match result {
            Err(BrokerError::Connection(details)) => assert!(details.contains(WORK)),
            other => panic!("expected a connection error, got {other:?}"),
        }
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_failure_propagates() {
        let transport = InMemoryTransport::new();
        transport.fail_open(true);
        let worker = Worker::new(broker(&transport), WORK, Arc::new(Direct(SlowHandler)));
        let (_tx, rx) = watch::channel(false);

        assert!(matches!(worker.run(rx).await, Err(BrokerError::Connection(_))));
    }
}
