//! Prometheus metrics for the queue consumers.

use crate::error::ErrorCategory;
use crate::handler::Transition;
use metrics::{counter, histogram};
use std::time::Duration;

/// Metric handles labelled by queue and handler.
#[derive(Clone, Debug)]
pub struct WorkerMetrics {
    queue: String,
    handler: String,
}

impl WorkerMetrics {
    pub fn new(queue: &str, handler: &str) -> Self {
        Self {
            queue: queue.to_string(),
            handler: handler.to_string(),
        }
    }

    pub fn job_received(&self) {
        counter!(
            "bestsellers_jobs_received_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn job_duration(&self, duration: Duration) {
        histogram!(
            "bestsellers_job_duration_seconds",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_failed(&self, category: ErrorCategory) {
        counter!(
            "bestsellers_jobs_failed_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "category" => category.as_str()
        )
        .increment(1);
    }

    /// Count the terminal state a delivery ended in.
    pub fn transition(&self, transition: Transition) {
        counter!(
            "bestsellers_jobs_settled_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "transition" => transition.as_str()
        )
        .increment(1);
    }

    /// Dead-letter reprocessing failed and the job is gone.
    pub fn dead_letter_failure(&self) {
        counter!(
            "bestsellers_dead_letter_failures_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn broker_error(&self, operation: &'static str) {
        counter!(
            "bestsellers_broker_errors_total",
            "queue" => self.queue.clone(),
            "operation" => operation
        )
        .increment(1);
    }
}

/// Install the Prometheus recorder once per process and return its handle.
#[cfg(feature = "health")]
pub fn init_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle, String> {
    use once_cell::sync::OnceCell;

    static HANDLE: OnceCell<metrics_exporter_prometheus::PrometheusHandle> = OnceCell::new();

    HANDLE
        .get_or_try_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| e.to_string())
        })
        .cloned()
}
