//! Bestsellers CLI
//!
//! Operator commands for the bestsellers pipeline: trigger a catalog fill,
//! read a list through the cache, list genres and probe dependencies.

use bestsellers_worker::{
    ConsumerConfig, build_searcher, connect_broker, connect_cache, health_executor,
};
use clap::{Parser, Subcommand};
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, FromEnv};
use database::InMemoryCache;
use database::redis::RedisConfig;
use domain_books::{BooksService, SearchCriteria};
use eyre::{Result, WrapErr};
use messaging::amqp::RabbitMqConfig;
use messaging::health::CheckResult;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bestsellers-cli")]
#[command(about = "Operate the NYT bestsellers pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue one search job per bestseller list
    Fill,

    /// Print a list, reading through the cache
    Search {
        /// List code, e.g. hardcover-fiction
        #[arg(short, long)]
        list: String,

        /// Page offset (multiple of 20)
        #[arg(short, long)]
        offset: Option<u32>,
    },

    /// Print the available lists
    Genres,

    /// Check RabbitMQ and Redis; exits non-zero when unhealthy
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();
    let environment = Environment::from_env();
    init_tracing(&environment);

    let cli = Cli::parse();
    let consumer_config =
        ConsumerConfig::from_env().wrap_err("Failed to load consumer configuration")?;

    match cli.command {
        Commands::Fill => {
            let rabbitmq_config =
                RabbitMqConfig::from_env().wrap_err("Failed to load RabbitMQ configuration")?;
            let broker = connect_broker(&rabbitmq_config).await?;

            // Fill only lists genres; nothing is read from or written to the cache.
            let searcher = build_searcher(consumer_config.book_service)?;
            let service = BooksService::new(searcher, Arc::new(InMemoryCache::new()));

            let result = service.enqueue_all_catalogs(&broker).await;
            broker.close().await.wrap_err("Failed to close broker")?;
            let count = result?;

            info!(count, queue = %broker.work_queue(), "Catalog fill queued");
            println!("{count}");
        }

        Commands::Search { list, offset } => {
            let redis_config =
                RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
            let (_, cache) = connect_cache(&redis_config).await?;

            let searcher = build_searcher(consumer_config.book_service)?;
            let service = BooksService::new(searcher, Arc::new(cache));

            let mut criteria = SearchCriteria::for_list(list);
            if let Some(offset) = offset {
                criteria = criteria.with_offset(offset);
            }

            let books = service.search_books_cached(&criteria).await?;
            println!("{}", serde_json::to_string_pretty(&books)?);
        }

        Commands::Genres => {
            let searcher = build_searcher(consumer_config.book_service)?;
            let service = BooksService::new(searcher, Arc::new(InMemoryCache::new()));

            let genres = service.list_genres().await?;
            println!("{}", serde_json::to_string_pretty(&genres)?);
        }

        Commands::Health => {
            let rabbitmq_config =
                RabbitMqConfig::from_env().wrap_err("Failed to load RabbitMQ configuration")?;
            let redis_config =
                RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

            let broker = match connect_broker(&rabbitmq_config).await {
                Ok(broker) => Some(broker),
                Err(e) => {
                    warn!(error = %e, "Broker unreachable");
                    None
                }
            };

            let report = match (broker.as_ref(), connect_cache(&redis_config).await) {
                (Some(broker), Ok((redis, _))) => {
                    health_executor(Arc::clone(broker), &rabbitmq_config, redis)
                        .run()
                        .await
                }
                (broker, redis) => {
                    let mut checks = vec![match broker {
                        Some(_) => CheckResult::passed("broker"),
                        None => CheckResult::failed("broker", "not connected"),
                    }];
                    checks.push(match redis {
                        Ok(_) => CheckResult::passed("redis"),
                        Err(e) => CheckResult::failed("redis", format!("{e:#}")),
                    });
                    messaging::health::HealthReport {
                        healthy: false,
                        checks,
                    }
                }
            };

            if let Some(broker) = broker {
                broker.close().await.wrap_err("Failed to close broker")?;
            }

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.healthy {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
