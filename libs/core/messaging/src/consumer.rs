//! Work-queue consumer with attempt tracking and dead-letter escalation.

use crate::broker::QueueBroker;
use crate::config::RetryPolicy;
use crate::envelope::JobMessage;
use crate::error::{ErrorCategory, ProcessingError};
use crate::handler::{DeliveryHandler, JobHandler, Transition};
use crate::metrics::WorkerMetrics;
use crate::transport::Delivery;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Wraps a [`JobHandler`] with requeue-on-failure semantics.
///
/// Per delivery:
/// - success: ack;
/// - failure with `attempt < max_retries`: wait the fixed delay, republish the
///   same payload to the work queue with `attempt + 1`, nack the original
///   without requeue;
/// - failure with the budget spent (or a permanent error): publish the payload
///   unchanged to the dead-letter queue, ack the original.
///
/// If a republish fails the original is nacked with requeue so the broker
/// redelivers it instead of losing it.
pub struct RetryConsumer<H> {
    handler: H,
    broker: Arc<QueueBroker>,
    policy: RetryPolicy,
    metrics: WorkerMetrics,
}

impl<H: JobHandler> RetryConsumer<H> {
    pub fn new(handler: H, broker: Arc<QueueBroker>, policy: RetryPolicy) -> Self {
        let metrics = WorkerMetrics::new(broker.work_queue(), handler.name());
        Self {
            handler,
            broker,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn requeue(&self, delivery: Delivery, message: &JobMessage) -> Transition {
        let attempt = message.attempt();
        let delay = self.policy.delay_for(attempt.value());
        let next = attempt.next(self.policy.max_retries());
        let work_queue = self.broker.work_queue();

        info!(
            queue = %work_queue,
            attempt = %attempt,
            next_attempt = %next,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );
        tokio::time::sleep(delay).await;

        match self
            .broker
            .try_publish(&message.with_attempt(next), work_queue, None)
            .await
        {
            Ok(()) => {
                self.settle(delivery, false).await;
                Transition::Requeued { attempt: next }
            }
            Err(e) => {
                error!(queue = %work_queue, attempt = %attempt, error = %e, "Retry publish failed, returning message to broker");
                self.settle(delivery, true).await;
                Transition::Returned
            }
        }
    }

    /// Forward the delivery untouched (body and headers) and ack it.
    async fn dead_letter(&self, delivery: Delivery) -> Transition {
        let dlq = self.broker.dead_letter_queue();

        match self
            .broker
            .forward_raw(dlq, delivery.body.clone(), delivery.headers.clone())
            .await
        {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    self.metrics.broker_error("ack");
                    error!(queue = %dlq, error = %e, "Failed to ack dead-lettered message");
                }
                Transition::DeadLettered
            }
            Err(e) => {
                error!(queue = %dlq, error = %e, "Dead-letter publish failed, returning message to broker");
                self.settle(delivery, true).await;
                Transition::Returned
            }
        }
    }

    async fn settle(&self, delivery: Delivery, requeue: bool) {
        let tag = delivery.delivery_tag;
        if let Err(e) = delivery.nack(requeue).await {
            self.metrics.broker_error("nack");
            error!(delivery_tag = tag, requeue, error = %e, "Failed to nack message");
        }
    }

    #[instrument(
        skip(self, delivery),
        fields(queue = %delivery.queue, delivery_tag = delivery.delivery_tag, handler = self.handler.name())
    )]
    async fn process(&self, delivery: Delivery) -> Transition {
        self.metrics.job_received();

        let message = match delivery.decode() {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Undecodable message, forwarding to dead-letter queue");
                return self.dead_letter(delivery).await;
            }
        };

        debug!(attempt = %message.attempt(), "Processing job");
        let started = Instant::now();
        let result = self.handler.handle(&message).await;
        self.metrics.job_duration(started.elapsed());

        match result {
            Ok(()) => match delivery.ack().await {
                Ok(()) => {
                    debug!("Job processed");
                    Transition::Acked
                }
                Err(e) => {
                    self.metrics.broker_error("ack");
                    error!(error = %e, "Job processed but ack failed; broker will redeliver");
                    Transition::Returned
                }
            },
            Err(err) => self.on_failure(delivery, message, err).await,
        }
    }

    async fn on_failure(
        &self,
        delivery: Delivery,
        message: JobMessage,
        err: ProcessingError,
    ) -> Transition {
        let attempt = message.attempt();
        let category = err.category();
        self.metrics.job_failed(category);

        if category == ErrorCategory::Permanent {
            warn!(attempt = %attempt, error = %err, "Permanent failure, dead-lettering");
            return self.dead_letter(delivery).await;
        }

        if attempt.is_exhausted(self.policy.max_retries()) {
            error!(
                attempt = %attempt,
                max_retries = self.policy.max_retries(),
                error = %err,
                "Retry budget exhausted, dead-lettering"
            );
            return self.dead_letter(delivery).await;
        }

        warn!(attempt = %attempt, error = %err, "Job failed, will retry");
        self.requeue(delivery, &message).await
    }
}

#[async_trait]
impl<H: JobHandler> DeliveryHandler for RetryConsumer<H> {
    async fn on_delivery(&self, delivery: Delivery) -> Transition {
        let transition = self.process(delivery).await;
        self.metrics.transition(transition);
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Topology;
    use crate::envelope::{Headers, RetryAttempt, RETRY_ATTEMPT_HEADER};
    use crate::handler::testing::ScriptedHandler;
    use crate::memory::{InMemoryTransport, SettleOutcome};
    use std::time::Duration;

    const WORK: &str = "book.queue";
    const DLQ: &str = "book.queue.dlq";

    struct Fixture {
        transport: InMemoryTransport,
        consumer: RetryConsumer<Arc<ScriptedHandler>>,
        handler: Arc<ScriptedHandler>,
    }

    async fn fixture(handler: ScriptedHandler, max_retries: u32) -> Fixture {
        let transport = InMemoryTransport::new();
        let broker = Arc::new(QueueBroker::new(
            Arc::new(transport.clone()),
            Topology::new("books_exchange", WORK, DLQ),
        ));
        broker.connect().await.unwrap();
        let handler = Arc::new(handler);
        let policy = RetryPolicy::fixed(max_retries, Duration::from_millis(1)).unwrap();
        Fixture {
            consumer: RetryConsumer::new(Arc::clone(&handler), broker, policy),
            transport,
            handler,
        }
    }

    fn body() -> Vec<u8> {
        br#"{"payload":{"criteria":{"list":"hardcover-fiction"}},"queue_name":"book.queue"}"#.to_vec()
    }

    fn with_attempt(attempt: &str) -> Headers {
        Headers::from([(RETRY_ATTEMPT_HEADER.to_string(), attempt.to_string())])
    }

    fn attempt_of(headers: &Headers) -> Option<&str> {
        headers.get(RETRY_ATTEMPT_HEADER).map(String::as_str)
    }

    #[tokio::test]
    async fn test_success_acks_once() {
        let f = fixture(ScriptedHandler::default(), 3).await;
        let delivery = f.transport.delivery(WORK, body(), Headers::new());

        let transition = f.consumer.on_delivery(delivery).await;

        assert_eq!(transition, Transition::Acked);
        let settlements = f.transport.settlements();
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].outcome, SettleOutcome::Ack);
        assert!(f.transport.published(WORK).is_empty());
        assert!(f.transport.published(DLQ).is_empty());
    }

    #[tokio::test]
    async fn test_failure_under_budget_requeues_with_next_attempt() {
        for attempt in 0..3u32 {
            let f = fixture(ScriptedHandler::failing(1), 3).await;
            let delivery = f
                .transport
                .delivery(WORK, body(), with_attempt(&attempt.to_string()));

            let transition = f.consumer.on_delivery(delivery).await;

            assert_eq!(
                transition,
                Transition::Requeued {
                    attempt: RetryAttempt::new(attempt + 1)
                }
            );
            let republished = f.transport.published(WORK);
            assert_eq!(republished.len(), 1);
            let expected = (attempt + 1).to_string();
            assert_eq!(attempt_of(&republished[0].headers), Some(expected.as_str()));
            let settlements = f.transport.settlements();
            assert_eq!(settlements.len(), 1);
            assert_eq!(settlements[0].outcome, SettleOutcome::Nack { requeue: false });
            assert!(f.transport.published(DLQ).is_empty());
        }
    }

    #[tokio::test]
    async fn test_attempt_two_of_three_republishes_with_three() {
        let f = fixture(ScriptedHandler::failing(1), 3).await;
        let delivery = f.transport.delivery(WORK, body(), with_attempt("2"));

        f.consumer.on_delivery(delivery).await;

        let republished = f.transport.published(WORK);
        assert_eq!(republished.len(), 1);
        assert_eq!(attempt_of(&republished[0].headers), Some("3"));
        let message = JobMessage::decode(&republished[0].body, republished[0].headers.clone()).unwrap();
        assert_eq!(message.payload["criteria"]["list"], "hardcover-fiction");
    }

    #[tokio::test]
    async fn test_exhausted_budget_dead_letters_and_acks() {
        let f = fixture(ScriptedHandler::failing(1), 3).await;
        let delivery = f.transport.delivery(WORK, body(), with_attempt("3"));

        let transition = f.consumer.on_delivery(delivery).await;

        assert_eq!(transition, Transition::DeadLettered);
        let dead = f.transport.published(DLQ);
        assert_eq!(dead.len(), 1);
        assert_eq!(attempt_of(&dead[0].headers), Some("3"));
        let forwarded: serde_json::Value = serde_json::from_slice(&dead[0].body).unwrap();
        let original: serde_json::Value = serde_json::from_slice(&body()).unwrap();
        assert_eq!(forwarded, original);
        assert!(f.transport.published(WORK).is_empty());
        let settlements = f.transport.settlements();
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].outcome, SettleOutcome::Ack);
    }

    #[tokio::test]
    async fn test_unparsable_attempt_counts_as_first() {
        let f = fixture(ScriptedHandler::failing(1), 3).await;
        let delivery = f.transport.delivery(WORK, body(), with_attempt("soon"));

        let transition = f.consumer.on_delivery(delivery).await;

        assert_eq!(
            transition,
            Transition::Requeued {
                attempt: RetryAttempt::new(1)
            }
        );
        assert_eq!(f.handler.seen()[0].attempt(), RetryAttempt::FIRST);
    }

    #[tokio::test]
    async fn test_invalid_job_skips_retries() {
        let handler = ScriptedHandler::default();
        handler.push(Err(ProcessingError::permanent("offset must be a multiple of 20")));
        let f = fixture(handler, 3).await;
        let delivery = f.transport.delivery(WORK, body(), Headers::new());

        let transition = f.consumer.on_delivery(delivery).await;

        assert_eq!(transition, Transition::DeadLettered);
        assert_eq!(f.transport.published(DLQ).len(), 1);
        assert!(f.transport.published(WORK).is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_body_is_forwarded_raw() {
        let f = fixture(ScriptedHandler::default(), 3).await;
        let delivery = f.transport.delivery(WORK, b"not json".to_vec(), Headers::new());

        let transition = f.consumer.on_delivery(delivery).await;

        assert_eq!(transition, Transition::DeadLettered);
        assert_eq!(f.handler.calls(), 0);
        assert_eq!(f.transport.published(DLQ)[0].body, b"not json");
        assert_eq!(f.transport.settlements()[0].outcome, SettleOutcome::Ack);
    }

    #[tokio::test]
    async fn test_failed_republish_returns_message() {
        let f = fixture(ScriptedHandler::failing(1), 3).await;
        f.transport.fail_publish_to(WORK);
        let delivery = f.transport.delivery(WORK, body(), Headers::new());

        let transition = f.consumer.on_delivery(delivery).await;

        assert_eq!(transition, Transition::Returned);
        let settlements = f.transport.settlements();
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].outcome, SettleOutcome::Nack { requeue: true });
    }

    #[tokio::test]
    async fn test_failed_dead_letter_publish_returns_message() {
        let f = fixture(ScriptedHandler::failing(1), 3).await;
        f.transport.fail_publish_to(DLQ);
        let delivery = f.transport.delivery(WORK, body(), with_attempt("3"));

        let transition = f.consumer.on_delivery(delivery).await;

        assert_eq!(transition, Transition::Returned);
        assert_eq!(
            f.transport.settlements()[0].outcome,
            SettleOutcome::Nack { requeue: true }
        );
    }

    #[tokio::test]
    async fn test_requeue_waits_fixed_delay() {
        let transport = InMemoryTransport::new();
        let broker = Arc::new(QueueBroker::new(
            Arc::new(transport.clone()),
            Topology::new("books_exchange", WORK, DLQ),
        ));
        let policy = RetryPolicy::fixed(3, Duration::from_millis(50)).unwrap();
        let consumer = RetryConsumer::new(ScriptedHandler::failing(1), broker, policy);
        let delivery = transport.delivery(WORK, body(), with_attempt("2"));

        let started = Instant::now();
        consumer.on_delivery(delivery).await;

        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
