//! Best-effort reprocessing of dead-lettered jobs.

use crate::config::JitterWindow;
use crate::handler::{DeliveryHandler, JobHandler, Transition};
use crate::metrics::WorkerMetrics;
use crate::transport::Delivery;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{error, info, instrument};

/// Drains the dead-letter queue.
///
/// Each delivery waits a random delay from the jitter window, then gets
/// exactly one more attempt. The delivery is acknowledged whatever happens; a failure
/// here is final and only surfaces through logs and the
/// `bestsellers_dead_letter_failures_total` counter.
pub struct DeadLetterConsumer<H> {
    handler: H,
    jitter: JitterWindow,
    metrics: WorkerMetrics,
}

impl<H: JobHandler> DeadLetterConsumer<H> {
    pub fn new(handler: H, queue: &str, jitter: JitterWindow) -> Self {
        let metrics = WorkerMetrics::new(queue, handler.name());
        Self {
            handler,
            jitter,
            metrics,
        }
    }

    #[instrument(
        skip(self, delivery),
        fields(queue = %delivery.queue, delivery_tag = delivery.delivery_tag)
    )]
    async fn process(&self, delivery: Delivery) -> Transition {
        self.metrics.job_received();

        let outcome = match delivery.decode() {
            Ok(message) => {
                let delay = self.jitter.sample();
                info!(
                    attempt = %message.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "Reprocessing dead-lettered job after jitter"
                );
                tokio::time::sleep(delay).await;

                let started = Instant::now();
                let result = self.handler.handle(&message).await;
                self.metrics.job_duration(started.elapsed());

                result.map_err(|e| {
                    self.metrics.job_failed(e.category());
                    format!("attempt {}: {e}", message.attempt())
                })
            }
            Err(e) => Err(format!("undecodable body: {e}")),
        };

        let transition = match outcome {
            Ok(()) => {
                info!("Dead-lettered job reprocessed");
                Transition::Acked
            }
            Err(cause) => {
                self.metrics.dead_letter_failure();
                error!(
                    handler = self.handler.name(),
                    cause = %cause,
                    "Dead-lettered job failed its final attempt and is dropped"
                );
                Transition::Discarded
            }
        };

        let tag = delivery.delivery_tag;
        if let Err(e) = delivery.ack().await {
            self.metrics.broker_error("ack");
            error!(delivery_tag = tag, error = %e, "Failed to ack dead-lettered message");
        }
        transition
    }
}

#[async_trait]
impl<H: JobHandler> DeliveryHandler for DeadLetterConsumer<H> {
    async fn on_delivery(&self, delivery: Delivery) -> Transition {
        let transition = self.process(delivery).await;
        self.metrics.transition(transition);
        transition
    }
}
