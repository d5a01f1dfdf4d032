//! RabbitMQ backend built on lapin.
//!
//! ```text
//!  producer ──publish──▶ default exchange ──▶ book.queue ──▶ RetryConsumer
//!                                                 ▲              │
//!                         books_exchange ─────────┘   retries exhausted
//!                                                                ▼
//!                                              book.queue.dlq ──▶ DeadLetterConsumer
//! ```
//!
//! Jobs are published through the default exchange with the queue name as
//! routing key; `books_exchange` is declared and bound so other producers can
//! route to the work queue by name. The dead-letter queue is never bound.

mod config;
mod health;
mod transport;

pub use config::RabbitMqConfig;
pub use health::RabbitMqCheck;
pub use transport::AmqpTransport;
