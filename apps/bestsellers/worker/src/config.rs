//! Configuration for the bestsellers worker

use core_config::{ConfigError, FromEnv, env_optional, env_parse};
use domain_books::SearcherKind;
use messaging::{JitterWindow, RetryPolicy};
use std::time::Duration;

/// Consumer settings.
///
/// Environment variables:
/// - `CONSUMER_MAX_RETRIES` (default: 3)
/// - `CONSUMER_RETRY_DELAY_MS` (default: 5000)
/// - `CONSUMER_DLQ_MIN_DELAY_SECS` (default: 10)
/// - `CONSUMER_DLQ_MAX_DELAY_SECS` (default: 30)
/// - `CONSUMER_BOOK_SERVICE` (`nyt` or `dummy`, default: `nyt`)
/// - `HEALTH_PORT` (default: 8082)
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub dlq_min_delay: Duration,
    pub dlq_max_delay: Duration,
    pub book_service: SearcherKind,
    pub health_port: u16,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(5000),
            dlq_min_delay: Duration::from_secs(10),
            dlq_max_delay: Duration::from_secs(30),
            book_service: SearcherKind::Nyt,
            health_port: 8082,
        }
    }
}

impl ConsumerConfig {
    /// Fixed-delay requeue policy for the work queue.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        RetryPolicy::fixed(self.max_retries, self.retry_delay)
            .map_err(|e| ConfigError::invalid("CONSUMER_MAX_RETRIES", e.to_string()))
    }

    /// Wait window before a dead-lettered job is retried.
    pub fn jitter_window(&self) -> Result<JitterWindow, ConfigError> {
        JitterWindow::new(self.dlq_min_delay, self.dlq_max_delay)
            .map_err(|e| ConfigError::invalid("CONSUMER_DLQ_MAX_DELAY_SECS", e.to_string()))
    }
}

impl FromEnv for ConsumerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let book_service = match env_optional("CONSUMER_BOOK_SERVICE") {
            Some(raw) => raw
                .parse()
                .map_err(|e: String| ConfigError::invalid("CONSUMER_BOOK_SERVICE", e))?,
            None => defaults.book_service,
        };

        let config = Self {
            max_retries: env_parse("CONSUMER_MAX_RETRIES", defaults.max_retries)?,
            retry_delay: Duration::from_millis(env_parse(
                "CONSUMER_RETRY_DELAY_MS",
                defaults.retry_delay.as_millis() as u64,
            )?),
            dlq_min_delay: Duration::from_secs(env_parse(
                "CONSUMER_DLQ_MIN_DELAY_SECS",
                defaults.dlq_min_delay.as_secs(),
            )?),
            dlq_max_delay: Duration::from_secs(env_parse(
                "CONSUMER_DLQ_MAX_DELAY_SECS",
                defaults.dlq_max_delay.as_secs(),
            )?),
            book_service,
            health_port: env_parse("HEALTH_PORT", defaults.health_port)?,
        };

        // Both policies must be constructible.
        config.retry_policy()?;
        config.jitter_window()?;

        Ok(config)
    }
}
