use core_config::{ConfigError, FromEnv, env_or_default, env_parse, env_required};
use messaging::{PolicyError, RetryPolicy};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.nytimes.com/svc/books/v3";

/// NYT Books API settings.
#[derive(Clone)]
pub struct NytConfig {
    pub api_key: String,
    pub base_url: String,
    /// Retries after the first attempt; a call sends at most `retries + 1`
    /// requests (`NYT_RETRIES=3` means four).
    pub retries: u32,
    /// First backoff delay; doubles after every retry.
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl NytConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            retries: 3,
            retry_delay: Duration::from_secs(3),
            timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 5,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retries(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Exponential policy for outbound calls.
    pub fn retry_policy(&self) -> Result<RetryPolicy, PolicyError> {
        RetryPolicy::exponential(self.retries, self.retry_delay)
    }
}

impl fmt::Debug for NytConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NytConfig")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Environment variables:
/// - `NYT_API_KEY` (required)
/// - `NYT_BASE_URL` (default: the public v3 endpoint)
/// - `NYT_RETRIES` (default: 3)
/// - `NYT_RETRY_DELAY_MS` (default: 3000)
/// - `NYT_TIMEOUT_SECS` (default: 10)
impl FromEnv for NytConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_key = env_required("NYT_API_KEY")?;
        let defaults = Self::new(api_key);

        let retries = env_parse("NYT_RETRIES", defaults.retries)?;
        if retries == 0 {
            return Err(ConfigError::invalid("NYT_RETRIES", "must be at least 1"));
        }
        let timeout_secs = env_parse("NYT_TIMEOUT_SECS", defaults.timeout.as_secs())?;
        if timeout_secs == 0 {
            return Err(ConfigError::invalid("NYT_TIMEOUT_SECS", "must be positive"));
        }

        Ok(Self {
            base_url: env_or_default("NYT_BASE_URL", DEFAULT_BASE_URL),
            retries,
            retry_delay: Duration::from_millis(env_parse(
                "NYT_RETRY_DELAY_MS",
                defaults.retry_delay.as_millis() as u64,
            )?),
            timeout: Duration::from_secs(timeout_secs),
            ..defaults
        })
    }
}

/// Which [`BookSearcher`](crate::BookSearcher) the worker runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearcherKind {
    #[default]
    Nyt,
    Dummy,
}

impl FromStr for SearcherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nyt" => Ok(SearcherKind::Nyt),
            "dummy" => Ok(SearcherKind::Dummy),
            other => Err(format!("expected `nyt` or `dummy`, got `{other}`")),
        }
    }
}

impl fmt::Display for SearcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearcherKind::Nyt => f.write_str("nyt"),
            SearcherKind::Dummy => f.write_str("dummy"),
        }
    }
}
