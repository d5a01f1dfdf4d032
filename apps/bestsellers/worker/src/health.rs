//! Readiness checks owned by the worker.

use async_trait::async_trait;
use database::redis::{ConnectionManager, check_health};
use messaging::health::{CheckResult, HealthCheck};

/// `PING`s the cache connection.
pub struct RedisCheck {
    conn: ConnectionManager,
}

impl RedisCheck {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl HealthCheck for RedisCheck {
    async fn check(&self) -> CheckResult {
        let mut conn = self.conn.clone();
        match check_health(&mut conn).await {
            Ok(()) => CheckResult::passed("redis"),
            Err(e) => CheckResult::failed("redis", e.to_string()),
        }
    }
}
