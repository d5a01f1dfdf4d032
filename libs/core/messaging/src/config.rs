//! Queue topology and retry policies.

use std::time::Duration;
use thiserror::Error;

/// Queue definition trait (for type-safe constants).
///
/// ```rust,ignore
/// struct BooksQueue;
///
/// impl QueueDef for BooksQueue {
///     const EXCHANGE: &'static str = "books_exchange";
///     const WORK_QUEUE: &'static str = "book.queue";
///     const DEAD_LETTER_QUEUE: &'static str = "book.queue.dlq";
/// }
/// ```
pub trait QueueDef {
    /// Exchange the work queue is bound to
    const EXCHANGE: &'static str;

    /// Queue consumed for first-pass processing
    const WORK_QUEUE: &'static str;

    /// Queue receiving jobs that exhausted their retry budget (never bound)
    const DEAD_LETTER_QUEUE: &'static str;

    /// Unacknowledged deliveries allowed per consumer (default: 10)
    const PREFETCH: u16 = 10;
}

/// Exchange and queues declared by [`QueueBroker::connect`](crate::QueueBroker::connect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub work_queue: String,
    pub dead_letter_queue: String,
    pub prefetch: u16,
}

impl Topology {
    pub fn new(
        exchange: impl Into<String>,
        work_queue: impl Into<String>,
        dead_letter_queue: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            work_queue: work_queue.into(),
            dead_letter_queue: dead_letter_queue.into(),
            prefetch: 10,
        }
    }

    pub fn from_def<D: QueueDef>() -> Self {
        Self {
            prefetch: D::PREFETCH,
            ..Self::new(D::EXCHANGE, D::WORK_QUEUE, D::DEAD_LETTER_QUEUE)
        }
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// The work queue is bound with its own name as routing key.
    pub fn routing_key(&self) -> &str {
        &self.work_queue
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("max_retries must be greater than zero")]
    ZeroRetries,

    #[error("backoff multiplier must be a finite number >= 1, got {0}")]
    InvalidMultiplier(f64),

    #[error("jitter window is empty: min {min:?} > max {max:?}")]
    EmptyWindow { min: Duration, max: Duration },
}

/// How often and how patiently to retry.
///
/// `max_retries` counts retries after the first attempt, so an operation runs at
/// most `max_retries + 1` times. The HTTP client and the consumers each hold
/// their own copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, PolicyError> {
        if max_retries == 0 {
            return Err(PolicyError::ZeroRetries);
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(backoff_multiplier));
        }
        Ok(Self {
            max_retries,
            base_delay,
            backoff_multiplier,
        })
    }

    /// Same delay before every retry.
    pub fn fixed(max_retries: u32, delay: Duration) -> Result<Self, PolicyError> {
        Self::new(max_retries, delay, 1.0)
    }

    /// Delay doubles after every retry.
    pub fn exponential(max_retries: u32, base_delay: Duration) -> Result<Self, PolicyError> {
        Self::new(max_retries, base_delay, 2.0)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Delay following `current`, saturating at [`Duration::MAX`].
    pub fn grow(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_multiplier)
            .unwrap_or(Duration::MAX)
    }

    /// Delay before retry number `retry` (zero based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        (0..retry).fold(self.base_delay, |delay, _| self.grow(delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            backoff_multiplier: 1.0,
        }
    }
}

/// Uniform random delay window used before dead-letter reprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterWindow {
    min: Duration,
    max: Duration,
}

impl JitterWindow {
    pub fn new(min: Duration, max: Duration) -> Result<Self, PolicyError> {
        if min > max {
            return Err(PolicyError::EmptyWindow { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draw a delay uniformly from `[min, max]`.
    pub fn sample(&self) -> Duration {
        use rand::Rng;

        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if min == max {
            return self.min;
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

impl Default for JitterWindow {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(10),
            max: Duration::from_secs(30),
        }
    }
}
