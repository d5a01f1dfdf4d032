//! Outbound HTTP with retry, backoff and rate-limit handling.

use crate::config::NytConfig;
use crate::error::ClientError;
use messaging::RetryPolicy;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Why an attempt may be worth repeating.
#[derive(Debug)]
pub enum RetryCause {
    /// Connect failure, timeout or unreadable body.
    Transport(reqwest::Error),
    /// Non-2xx status other than 422 and 429.
    Status(StatusCode),
}

/// Classification of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Value),
    /// 429; wait this long before the next attempt.
    RateLimited(Duration),
    Retryable(RetryCause),
    /// 422 with the server's explanation.
    Invalid(String),
    /// Failed on the last attempt.
    Exhausted(ClientError),
}

/// JSON-over-HTTP client for one API.
///
/// Every request carries the `api-key` query parameter. A call makes at most
/// `max_retries + 1` attempts:
///
/// - transport errors and unexpected statuses wait the current delay, which
///   then grows by the policy multiplier;
/// - 429 waits `Retry-After` seconds (or the base delay) without growing it;
/// - 422 fails at once.
#[derive(Clone)]
pub struct ResilientHttpClient {
    client: Client,
    base_url: String,
    api_key: String,
    policy: RetryPolicy,
}

impl ResilientHttpClient {
    pub fn new(config: &NytConfig, policy: RetryPolicy) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            policy,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// `GET {base_url}{path}` with `params`; `None` values are left out.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn fetch(
        &self,
        path: &str,
        params: &[(&str, Option<String>)],
    ) -> Result<Value, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let query = self.query(params);
        let max_retries = self.policy.max_retries();
        let mut current_delay = self.policy.base_delay();

        for attempt in 0..=max_retries {
            let last = attempt == max_retries;
            debug!(attempt = attempt + 1, "Attempting request");

            match self.attempt(&url, path, &query, attempt, last).await {
                AttemptOutcome::Success(body) => return Ok(body),
                AttemptOutcome::Invalid(detail) => {
                    error!(detail = %detail, "Invalid payload request");
                    return Err(ClientError::InvalidPayload { detail });
                }
                AttemptOutcome::Exhausted(err) => {
                    error!(attempts = attempt + 1, error = %err, "Giving up on request");
                    return Err(err);
                }
                AttemptOutcome::RateLimited(wait) => {
                    if last {
                        break;
                    }
                    warn!(
                        retry_after_ms = wait.as_millis() as u64,
                        "Too many requests, waiting to retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                AttemptOutcome::Retryable(cause) => {
                    match &cause {
                        RetryCause::Transport(e) => {
                            warn!(attempt = attempt + 1, error = %e, "Request failed")
                        }
                        RetryCause::Status(status) => {
                            warn!(attempt = attempt + 1, status = status.as_u16(), "Unexpected status")
                        }
                    }
                    info!(
                        retry_delay_ms = current_delay.as_millis() as u64,
                        "Retrying request"
                    );
                    tokio::time::sleep(current_delay).await;
                    current_delay = self.policy.grow(current_delay);
                }
            }
        }

        error!(attempts = max_retries + 1, "Maximum number of retries exceeded");
        Err(ClientError::RetriesExhausted {
            path: path.to_string(),
            attempts: max_retries + 1,
        })
    }

    async fn attempt(
        &self,
        url: &str,
        path: &str,
        query: &[(String, String)],
        attempt: u32,
        last: bool,
    ) -> AttemptOutcome {
        let sent = self.client.get(url).query(query).send().await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => return self.transport_failure(e, path, attempt, last),
        };

        match response.status() {
            status if status.is_success() => match response.json::<Value>().await {
                Ok(body) => AttemptOutcome::Success(body),
                Err(e) => self.transport_failure(e, path, attempt, last),
            },
            StatusCode::UNPROCESSABLE_ENTITY => AttemptOutcome::Invalid(invalid_detail(response).await),
            StatusCode::TOO_MANY_REQUESTS => {
                AttemptOutcome::RateLimited(self.retry_after(&response))
            }
            status if last => AttemptOutcome::Exhausted(ClientError::UnexpectedStatus {
                method: Method::GET.to_string(),
                url: url.to_string(),
                status: status.as_u16(),
            }),
            status => AttemptOutcome::Retryable(RetryCause::Status(status)),
        }
    }

    fn transport_failure(
        &self,
        err: reqwest::Error,
        path: &str,
        attempt: u32,
        last: bool,
    ) -> AttemptOutcome {
        // The URL carries the api key.
        let err = err.without_url();
        if last {
            AttemptOutcome::Exhausted(ClientError::Exhausted {
                method: Method::GET.to_string(),
                path: path.to_string(),
                attempts: attempt + 1,
                source: err,
            })
        } else {
            AttemptOutcome::Retryable(RetryCause::Transport(err))
        }
    }

    fn query(&self, params: &[(&str, Option<String>)]) -> Vec<(String, String)> {
        params
            .iter()
            .filter_map(|(key, value)| {
                value
                    .as_ref()
                    .map(|value| (key.to_string(), value.clone()))
            })
            .chain(std::iter::once((
                "api-key".to_string(),
                self.api_key.clone(),
            )))
            .collect()
    }

    /// `Retry-After` in seconds, integer or decimal; the base delay when the
    /// header is missing, unparsable or too large for a `Duration`.
    fn retry_after(&self, response: &Response) -> Duration {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| self.policy.base_delay())
    }
}

/// The JSON `detail` field if there is one, else the raw body.
async fn invalid_detail(response: Response) -> String {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(body)) => match body.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            Some(detail) => detail.to_string(),
            None => text,
        },
        _ => text,
    }
}
