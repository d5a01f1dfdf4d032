//! Handler traits.
//!
//! A [`JobHandler`] does the actual work for one decoded message. A
//! [`DeliveryHandler`] owns the broker-facing side of a delivery (decode,
//! settle, requeue). Consumers such as [`RetryConsumer`](crate::RetryConsumer)
//! wrap the former into the latter.

use crate::envelope::{JobMessage, RetryAttempt};
use crate::error::ProcessingError;
use crate::transport::Delivery;
use async_trait::async_trait;
use std::sync::Arc;

/// Does the work for one job.
///
/// Return a [`ProcessingError`] with the category that matches the failure;
/// `Permanent` skips the remaining retries.
///
/// ```rust,ignore
/// #[async_trait]
/// impl JobHandler for SearchBooksProcessor {
///     async fn handle(&self, message: &JobMessage) -> Result<(), ProcessingError> {
///         let criteria: SearchCriteria = message.payload_entry("criteria")?;
///         self.service.refresh(&criteria).await.map_err(Into::into)
///     }
///
///     fn name(&self) -> &'static str {
///         "search_books"
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, message: &JobMessage) -> Result<(), ProcessingError>;

    /// Used for logging and metrics labels.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    async fn handle(&self, message: &JobMessage) -> Result<(), ProcessingError> {
        (**self).handle(message).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Terminal state of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Processed and acknowledged.
    Acked,
    /// Republished to the work queue with this attempt; original nacked.
    Requeued { attempt: RetryAttempt },
    /// Forwarded to the dead-letter queue; original acknowledged.
    DeadLettered,
    /// Dead-letter reprocessing failed; acknowledged and reported.
    Discarded,
    /// Could not be republished; handed back to the broker for redelivery.
    Returned,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Acked => "acked",
            Transition::Requeued { .. } => "requeued",
            Transition::DeadLettered => "dead_lettered",
            Transition::Discarded => "discarded",
            Transition::Returned => "returned",
        }
    }
}

/// Takes ownership of a raw delivery and settles it exactly once.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn on_delivery(&self, delivery: Delivery) -> Transition;
}
