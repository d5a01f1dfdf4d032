//! Health endpoints for K8s probes.
//!
//! Liveness only reflects fatal consumer errors. Readiness additionally runs
//! every registered [`HealthCheck`] (broker, cache, ...) concurrently and
//! reports them individually.

use crate::broker::QueueBroker;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Result of one named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CheckResult {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            details: None,
        }
    }

    pub fn failed(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            details: Some(details.into()),
        }
    }
}

/// A dependency probe.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> CheckResult;
}

/// Aggregate of every check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checks: Vec<CheckResult>,
}

/// Runs all checks concurrently.
#[derive(Clone, Default)]
pub struct HealthCheckExecutor {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl HealthCheckExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub async fn run(&self) -> HealthReport {
        let checks = futures::future::join_all(self.checks.iter().map(|c| c.check())).await;
        HealthReport {
            healthy: checks.iter().all(|c| c.passed),
            checks,
        }
    }
}

/// Passes while the broker channel is open.
pub struct BrokerCheck {
    broker: Arc<QueueBroker>,
}

impl BrokerCheck {
    pub fn new(broker: Arc<QueueBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl HealthCheck for BrokerCheck {
    async fn check(&self) -> CheckResult {
        if self.broker.is_connected().await {
            CheckResult::passed("broker")
        } else {
            CheckResult::failed("broker", "not connected")
        }
    }
}

/// Liveness payload.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub consumers_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Shared health state.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthStateInner>>,
    executor: HealthCheckExecutor,
}

struct HealthStateInner {
    consumers_running: bool,
    last_error: Option<String>,
}

impl HealthState {
    pub fn new(executor: HealthCheckExecutor) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthStateInner {
                consumers_running: true,
                last_error: None,
            })),
            executor,
        }
    }

    /// Record a fatal consumer error; liveness turns red.
    pub async fn set_failed(&self, error: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.consumers_running = false;
        inner.last_error = Some(error.into());
    }

    pub async fn is_alive(&self) -> bool {
        self.inner.read().await.consumers_running
    }

    pub async fn status(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        HealthStatus {
            status: if inner.consumers_running {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            consumers_running: inner.consumers_running,
            last_error: inner.last_error.clone(),
        }
    }

    pub async fn readiness(&self) -> HealthReport {
        let mut report = self.executor.run().await;
        if !self.is_alive().await {
            report.healthy = false;
        }
        report
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new(HealthCheckExecutor::new())
    }
}

/// Health server for K8s probes.
pub struct HealthServer {
    port: u16,
    state: HealthState,
    metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl HealthServer {
    pub fn new(port: u16, state: HealthState) -> Self {
        Self {
            port,
            state,
            metrics_handle: None,
        }
    }

    /// Serve `/metrics` from this handle.
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/readyz", get(ready_handler))
            .with_state(self.state.clone());

        if let Some(handle) = self.metrics_handle.clone() {
            router = router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        router
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.router();
        let addr = format!("0.0.0.0:{}", self.port);

        info!(addr = %addr, "Starting health server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await
    }
}

async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status().await;
    let code = if status.consumers_running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let report = state.readiness().await;
    let code = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct Fixed(bool);

    #[async_trait]
    impl HealthCheck for Fixed {
        async fn check(&self) -> CheckResult {
            if self.0 {
                CheckResult::passed("fixed")
            } else {
                CheckResult::failed("fixed", "down")
            }
        }
    }

    #[tokio::test]
    async fn test_executor_aggregates() {
        let executor = HealthCheckExecutor::new()
            .with_check(Arc::new(Fixed(true)))
            .with_check(Arc::new(Fixed(false)));

        let report = executor.run().await;

        assert!(!report.healthy);
        assert_eq!(report.checks.len(), 2);
        assert_eq!(report.checks[1].details.as_deref(), Some("down"));
    }

    #[tokio::test]
    async fn test_broker_check_follows_connection() {
        let transport = crate::memory::InMemoryTransport::new();
        let broker = Arc::new(QueueBroker::new(
            Arc::new(transport),
            crate::Topology::new("e", "q", "q.dlq"),
        ));
        let check = BrokerCheck::new(Arc::clone(&broker));

        assert!(!check.check().await.passed);
        broker.connect().await.unwrap();
        assert!(check.check().await.passed);
    }

    #[tokio::test]
    async fn test_empty_executor_is_healthy() {
        assert!(HealthCheckExecutor::new().run().await.healthy);
    }

    #[tokio::test]
    async fn test_liveness_turns_red_on_failure() {
        let state = HealthState::default();
        assert!(state.is_alive().await);

        state.set_failed("consumer crashed").await;

        assert!(!state.is_alive().await);
        assert_eq!(state.status().await.last_error.as_deref(), Some("consumer crashed"));
        assert!(!state.readiness().await.healthy);
    }

    #[tokio::test]
    async fn test_ready_endpoint_reports_checks() {
        let state = HealthState::new(HealthCheckExecutor::new().with_check(Arc::new(Fixed(false))));
        let router = HealthServer::new(0, state).router();

        let response = router
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_endpoint_ok() {
        let router = HealthServer::new(0, HealthState::default()).router();

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
