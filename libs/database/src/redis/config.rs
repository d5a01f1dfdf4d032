#[cfg(feature = "config")]
use core_config::{ConfigError, FromEnv};
use std::time::Duration;

/// Redis cache configuration
///
/// # Example
///
/// ```ignore
/// use database::redis::RedisConfig;
///
/// let config = RedisConfig::new("redis://127.0.0.1:6379").with_ttl(Duration::from_secs(3600));
///
/// // From environment variables (requires `config` feature)
/// let config = RedisConfig::from_env()?;
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConfig {
    /// Redis connection URL (required)
    pub url: String,

    /// Expiry for cached entries; `None` keeps them until overwritten
    pub ttl: Option<Duration>,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Environment variables:
/// - `REDIS_URL` (required)
/// - `CACHE_TTL_SECS` (optional, positive; unset means no expiry)
#[cfg(feature = "config")]
impl FromEnv for RedisConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = core_config::env_required("REDIS_URL")?;

        let ttl = match core_config::env_optional("CACHE_TTL_SECS") {
            None => None,
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|e| ConfigError::ParseError {
                    key: "CACHE_TTL_SECS".to_string(),
                    details: format!("{}", e),
                })?;
                if secs == 0 {
                    return Err(ConfigError::invalid("CACHE_TTL_SECS", "must be positive"));
                }
                Some(Duration::from_secs(secs))
            }
        };

        Ok(Self { url, ttl })
    }
}
