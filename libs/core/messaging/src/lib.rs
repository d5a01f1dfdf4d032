//! Durable job queues with retry and dead-letter handling.
//!
//! A [`QueueBroker`] owns one channel to the broker and declares the
//! exchange, the work queue and its dead-letter queue on first use. Two
//! consumers sit on top of it:
//!
//! - [`RetryConsumer`] runs a [`JobHandler`] for each work-queue delivery.
//!   Retryable failures are republished with an incremented `retry-attempt`
//!   header after a fixed delay; once the budget is spent (or the failure is
//!   permanent) the original message is forwarded to the dead-letter queue.
//! - [`DeadLetterConsumer`] gives each dead-lettered message one last try
//!   after a random delay and always acknowledges it.
//!
//! [`Worker`] drives either consumer from a subscription until shutdown.
//!
//! ```text
//!   publish ──▶ exchange ──▶ work queue ──▶ RetryConsumer ──▶ handler
//!                               ▲   │ retryable, attempt < max
//!                               └───┘
//!                                   │ permanent / exhausted
//!                                   ▼
//!                           dead-letter queue ──▶ DeadLetterConsumer ──▶ handler (once)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use messaging::{QueueBroker, RetryConsumer, RetryPolicy, Topology, Worker};
//!
//! let broker = Arc::new(QueueBroker::new(transport, Topology::from_def::<BooksQueue>()));
//! broker.connect().await?;
//!
//! let consumer = RetryConsumer::new(processor, Arc::clone(&broker), RetryPolicy::default());
//! let worker = Worker::new(Arc::clone(&broker), broker.work_queue(), Arc::new(consumer));
//! worker.run(shutdown_rx).await?;
//! ```

mod broker;
mod config;
mod consumer;
mod dead_letter;
mod envelope;
mod error;
mod handler;
pub mod memory;
pub mod metrics;
pub mod transport;
mod worker;

#[cfg(feature = "amqp")]
pub mod amqp;
#[cfg(feature = "health")]
pub mod health;

pub use broker::QueueBroker;
pub use config::{JitterWindow, PolicyError, QueueDef, RetryPolicy, Topology};
pub use consumer::RetryConsumer;
pub use dead_letter::DeadLetterConsumer;
pub use envelope::{Headers, JobMessage, RetryAttempt, RETRY_ATTEMPT_HEADER};
pub use error::{BrokerError, ErrorCategory, ProcessingError};
pub use handler::{DeliveryHandler, JobHandler, Transition};
pub use metrics::WorkerMetrics;
pub use worker::Worker;
