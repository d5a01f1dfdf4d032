//! Job message envelope and the typed retry-attempt counter.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Header carrying the number of failed deliveries of a logical job.
pub const RETRY_ATTEMPT_HEADER: &str = "retry-attempt";

/// Message headers as they travel on the wire (string values).
pub type Headers = BTreeMap<String, String>;

/// How many times a logical job has already failed.
///
/// Parsed leniently from the `retry-attempt` header and only ever advanced with
/// [`RetryAttempt::next`], which never exceeds the configured maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RetryAttempt(u32);

impl RetryAttempt {
    pub const FIRST: RetryAttempt = RetryAttempt(0);

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Read the attempt from headers. Missing means first attempt; anything
    /// that is not a non-negative integer is also treated as the first attempt
    /// and logged.
    pub fn from_headers(headers: &Headers) -> Self {
        match headers.get(RETRY_ATTEMPT_HEADER) {
            None => Self::FIRST,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(value) => Self(value),
                Err(_) => {
                    warn!(
                        header = RETRY_ATTEMPT_HEADER,
                        value = %raw,
                        "Unparsable retry attempt header, treating as first attempt"
                    );
                    Self::FIRST
                }
            },
        }
    }

    /// The attempt to publish on requeue, capped at `max`.
    pub fn next(self, max: u32) -> Self {
        Self(self.0.saturating_add(1).min(max))
    }

    pub fn is_exhausted(&self, max: u32) -> bool {
        self.0 >= max
    }
}

impl fmt::Display for RetryAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work travelling through the queues.
///
/// Only `payload` and `queue_name` are part of the JSON body. Headers and the
/// attempt counter ride in message properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub queue_name: String,
    #[serde(skip)]
    headers: Headers,
    #[serde(skip)]
    attempt: RetryAttempt,
}

impl JobMessage {
    pub fn new(payload: Map<String, Value>, queue_name: impl Into<String>) -> Self {
        Self {
            payload,
            queue_name: queue_name.into(),
            headers: Headers::new(),
            attempt: RetryAttempt::FIRST,
        }
    }

    /// Build a message whose payload is `{ key: value }`.
    pub fn with_entry(
        key: impl Into<String>,
        value: impl Serialize,
        queue_name: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        let mut payload = Map::new();
        payload.insert(key.into(), serde_json::to_value(value)?);
        Ok(Self::new(payload, queue_name))
    }

    /// Decode a delivered body together with its headers.
    pub fn decode(body: &[u8], headers: Headers) -> Result<Self, serde_json::Error> {
        let mut message: JobMessage = serde_json::from_slice(body)?;
        message.attempt = RetryAttempt::from_headers(&headers);
        message.headers = headers;
        Ok(message)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize `payload[key]`.
    pub fn payload_entry<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<T, serde_json::Error> {
        let value = self.payload.get(key).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn attempt(&self) -> RetryAttempt {
        self.attempt
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Same payload and headers, new attempt.
    pub fn with_attempt(&self, attempt: RetryAttempt) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    /// Headers to put on the wire: the message headers, then `extra`, then the
    /// attempt counter, which always wins.
    pub fn wire_headers(&self, extra: Option<&Headers>) -> Headers {
        let mut headers = self.headers.clone();
        if let Some(extra) = extra {
            headers.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        headers.insert(
            RETRY_ATTEMPT_HEADER.to_string(),
            self.attempt.value().to_string(),
        );
        headers
    }
}
