use super::RabbitMqConfig;
use crate::health::{CheckResult, HealthCheck};
use async_trait::async_trait;
use lapin::{Connection, ConnectionProperties};
use std::time::Duration;

/// Opens (and closes) a throwaway connection to prove the broker is reachable.
pub struct RabbitMqCheck {
    uri: String,
    timeout: Duration,
}

impl RabbitMqCheck {
    pub fn new(config: &RabbitMqConfig) -> Self {
        Self {
            uri: config.uri(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl HealthCheck for RabbitMqCheck {
    async fn check(&self) -> CheckResult {
        const NAME: &str = "rabbitmq";

        let connect = Connection::connect(&self.uri, ConnectionProperties::default());
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(connection)) => {
                let _ = connection.close(200, "health check").await;
                CheckResult::passed(NAME)
            }
            Ok(Err(e)) => CheckResult::failed(NAME, e.to_string()),
            Err(_) => CheckResult::failed(NAME, format!("timed out after {:?}", self.timeout)),
        }
    }
}
