//! Error types for brokers and job handlers.

use std::fmt;
use thiserror::Error;

/// How a failed job should be treated by the consumers.
///
/// - **Transient**: upstream hiccup; the job is requeued until its budget runs out.
/// - **Permanent**: the job itself is invalid (bad criteria, malformed body); it
///   goes straight to the dead-letter queue.
/// - **RateLimited**: upstream throttled us; requeued like a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Transient,
    Permanent,
    RateLimited,
}

impl ErrorCategory {
    /// Whether a requeue may help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCategory::Permanent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by a [`JobHandler`](crate::JobHandler).
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("transient error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("permanent error: {message}")]
    Permanent {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("malformed job message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ProcessingError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Permanent {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            source: None,
        }
    }

    pub fn rate_limited_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RateLimited {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Build an error of the given category.
    pub fn with_category(
        category: ErrorCategory,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        match category {
            ErrorCategory::Transient => Self::transient_with_source(message, source),
            ErrorCategory::Permanent => Self::permanent_with_source(message, source),
            ErrorCategory::RateLimited => Self::rate_limited_with_source(message, source),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ProcessingError::Transient { .. } => ErrorCategory::Transient,
            ProcessingError::Permanent { .. } => ErrorCategory::Permanent,
            ProcessingError::RateLimited { .. } => ErrorCategory::RateLimited,
            ProcessingError::Malformed(_) => ErrorCategory::Permanent,
        }
    }
}

/// Failures raised by a [`QueueBroker`](crate::QueueBroker) or its transport.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not be reached or the topology could not be declared.
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("failed to publish to '{queue}': {details}")]
    Publish { queue: String, details: String },

    #[error("failed to consume from '{queue}': {details}")]
    Consume { queue: String, details: String },

    #[error("failed to settle delivery {delivery_tag}: {details}")]
    Settle { delivery_tag: u64, details: String },

    #[error("message encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("broker is closed")]
    Closed,
}

impl BrokerError {
    pub fn connection(err: impl fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn publish(queue: &str, err: impl fmt::Display) -> Self {
        Self::Publish {
            queue: queue.to_string(),
            details: err.to_string(),
        }
    }

    pub fn consume(queue: &str, err: impl fmt::Display) -> Self {
        Self::Consume {
            queue: queue.to_string(),
            details: err.to_string(),
        }
    }

    pub fn settle(delivery_tag: u64, err: impl fmt::Display) -> Self {
        Self::Settle {
            delivery_tag,
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_category() {
        assert_eq!(
            ProcessingError::transient("timeout").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            ProcessingError::permanent("bad offset").category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            ProcessingError::rate_limited("429").category(),
            ErrorCategory::RateLimited
        );
    }

    #[test]
    fn test_malformed_is_permanent() {
        let err: ProcessingError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert!(!err.category().is_retryable());
    }

    #[test]
    fn test_with_category_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let err = ProcessingError::with_category(ErrorCategory::Transient, "upstream", io);
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_rate_limited_keeps_source() {
        let io = std::io::Error::other("429 Too Many Requests");
        let err = ProcessingError::with_category(ErrorCategory::RateLimited, "throttled", io);
        assert_eq!(err.category(), ErrorCategory::RateLimited);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "429 Too Many Requests");
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::RateLimited.to_string(), "rate_limited");
        assert!(ErrorCategory::Transient.is_retryable());
    }

    #[test]
    fn test_broker_error_messages() {
        let err = BrokerError::publish("book.queue", "channel closed");
        assert_eq!(
            err.to_string(),
            "failed to publish to 'book.queue': channel closed"
        );
        assert!(BrokerError::connection("refused")
            .to_string()
            .contains("refused"));
    }
}
