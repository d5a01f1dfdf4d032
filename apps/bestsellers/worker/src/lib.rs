//! Bestsellers Worker Service
//!
//! Consumes book search jobs from RabbitMQ, refreshes the per-list cache in
//! Redis and gives dead-lettered jobs one last try.
//!
//! ## Architecture
//!
//! ```text
//! book.queue ──▶ Worker ──▶ RetryConsumer ──▶ SearchBooksProcessor ──▶ NYT API
//!                               │ exhausted / permanent      │
//!                               ▼                            ▼
//! book.queue.dlq ──▶ Worker ──▶ DeadLetterConsumer        Redis (list → BookList JSON)
//! ```
//!
//! Both workers share one [`QueueBroker`]. On SIGINT/SIGTERM they stop taking
//! deliveries, wait for in-flight jobs and the broker is closed. If either
//! worker loses its subscription, liveness turns red, the other worker is
//! stopped the same way and the process exits with an error.

pub mod config;
pub mod health;

pub use config::ConsumerConfig;

use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, FromEnv};
use database::redis::{ConnectionManager, RedisCache, RedisConfig};
use domain_books::{
    BookSearcher, BooksQueue, BooksService, DummySearcher, NytBooksClient, NytConfig,
    SearchBooksProcessor, SearcherKind,
};
use eyre::{Result, WrapErr};
use messaging::amqp::{AmqpTransport, RabbitMqCheck, RabbitMqConfig};
use messaging::health::{BrokerCheck, HealthCheckExecutor, HealthServer, HealthState};
use messaging::{BrokerError, DeadLetterConsumer, QueueBroker, RetryConsumer, Topology, Worker};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use crate::health::RedisCheck;

/// Searcher selected by `CONSUMER_BOOK_SERVICE`.
pub fn build_searcher(kind: SearcherKind) -> Result<Arc<dyn BookSearcher>> {
    match kind {
        SearcherKind::Nyt => {
            let config =
                NytConfig::from_env().wrap_err("Failed to load NYT API configuration")?;
            let client =
                NytBooksClient::from_config(&config).wrap_err("Failed to build NYT client")?;
            Ok(Arc::new(client))
        }
        SearcherKind::Dummy => Ok(Arc::new(DummySearcher)),
    }
}

/// Broker for the books topology, connected and declared.
pub async fn connect_broker(config: &RabbitMqConfig) -> Result<Arc<QueueBroker>> {
    let topology = Topology::from_def::<BooksQueue>().with_prefetch(config.prefetch);
    let broker = Arc::new(QueueBroker::new(
        Arc::new(AmqpTransport::new(config)),
        topology,
    ));

    broker
        .connect()
        .await
        .wrap_err("Failed to connect to RabbitMQ")?;
    Ok(broker)
}

/// Redis connection and the cache built on it.
pub async fn connect_cache(config: &RedisConfig) -> Result<(ConnectionManager, RedisCache)> {
    let conn = database::redis::connect(config.url())
        .await
        .wrap_err("Failed to connect to Redis")?;
    let cache = RedisCache::new(conn.clone()).with_ttl(config.ttl);
    Ok((conn, cache))
}

/// Readiness checks for the broker channel, RabbitMQ itself and Redis.
pub fn health_executor(
    broker: Arc<QueueBroker>,
    rabbitmq: &RabbitMqConfig,
    redis: ConnectionManager,
) -> HealthCheckExecutor {
    HealthCheckExecutor::new()
        .with_check(Arc::new(BrokerCheck::new(broker)))
        .with_check(Arc::new(RabbitMqCheck::new(rabbitmq)))
        .with_check(Arc::new(RedisCheck::new(redis)))
}

/// Run the bestsellers worker
///
/// 1. Sets up logging and metrics
/// 2. Connects to RabbitMQ and declares the topology (fatal on failure)
/// 3. Connects to Redis
/// 4. Runs the work-queue and dead-letter workers until shutdown
///
/// # Errors
///
/// Returns an error if configuration is invalid, a backend is unreachable at
/// startup or a worker loses its subscription.
pub async fn run() -> Result<()> {
    install_color_eyre();
    let environment = Environment::from_env();
    init_tracing(&environment);

    let metrics_handle = messaging::metrics::init_metrics()
        .map_err(|e| eyre::eyre!("Failed to install metrics recorder: {}", e))?;

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting bestsellers worker"
    );
    info!("Environment: {:?}", environment);

    let consumer_config =
        ConsumerConfig::from_env().wrap_err("Failed to load consumer configuration")?;
    let rabbitmq_config =
        RabbitMqConfig::from_env().wrap_err("Failed to load RabbitMQ configuration")?;
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
    info!(config = ?consumer_config, "Consumer configuration loaded");

    let broker = connect_broker(&rabbitmq_config).await?;
    let (redis, cache) = connect_cache(&redis_config).await?;

    let searcher = build_searcher(consumer_config.book_service)?;
    info!(searcher = %consumer_config.book_service, "Book searcher selected");

    let service = BooksService::new(searcher, Arc::new(cache));
    let processor = Arc::new(SearchBooksProcessor::new(service));

    let retry = RetryConsumer::new(
        Arc::clone(&processor),
        Arc::clone(&broker),
        consumer_config.retry_policy()?,
    );
    let dead_letter = DeadLetterConsumer::new(
        Arc::clone(&processor),
        broker.dead_letter_queue(),
        consumer_config.jitter_window()?,
    );

    let work_worker = Worker::new(Arc::clone(&broker), broker.work_queue(), Arc::new(retry));
    let dlq_worker = Worker::new(
        Arc::clone(&broker),
        broker.dead_letter_queue(),
        Arc::new(dead_letter),
    );

    let health_state = HealthState::new(health_executor(
        Arc::clone(&broker),
        &rabbitmq_config,
        redis,
    ));
    let health_server = HealthServer::new(consumer_config.health_port, health_state.clone())
        .with_metrics(metrics_handle);
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            error!(error = %e, "Health server failed");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    let (work_result, dlq_result) = tokio::join!(
        supervise(&work_worker, shutdown_rx.clone(), &shutdown_tx, &health_state),
        supervise(&dlq_worker, shutdown_rx, &shutdown_tx, &health_state),
    );

    if let Err(e) = broker.close().await {
        error!(error = %e, "Failed to close broker connection");
    }

    work_result
        .and(dlq_result)
        .wrap_err("Worker stopped with an error")?;

    info!("Bestsellers worker stopped");
    Ok(())
}

/// Run one worker; if it fails, mark the service unhealthy and stop the other.
async fn supervise(
    worker: &Worker,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: &watch::Sender<bool>,
    health_state: &HealthState,
) -> Result<(), BrokerError> {
    let result = worker.run(shutdown_rx).await;
    if let Err(e) = &result {
        error!(queue = %worker.queue(), error = %e, "Worker failed, shutting down");
        health_state.set_failed(e.to_string()).await;
        let _ = shutdown_tx.send(true);
    }
    result
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
