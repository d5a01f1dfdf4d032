//! Storage for the bestseller pipeline: a string key/value cache with a Redis
//! backend and an in-memory stand-in.
//!
//! # Features
//!
//! - `redis` (default) - Redis connector, cache and health check
//! - `config` - `RedisConfig: core_config::FromEnv`
//!
//! # Example
//!
//! ```ignore
//! use database::cache::Cache;
//! use database::redis::{self, RedisCache, RedisConfig};
//!
//! let config = RedisConfig::new("redis://127.0.0.1:6379");
//! let conn = redis::connect(config.url()).await?;
//! let cache = RedisCache::new(conn).with_ttl(config.ttl);
//!
//! cache.set("hardcover-fiction", "[...]").await?;
//! let cached = cache.get("hardcover-fiction").await?;
//! ```

pub mod cache;
pub mod common;

#[cfg(feature = "redis")]
pub mod redis;

pub use cache::{Cache, InMemoryCache};
pub use common::{DatabaseError, DatabaseResult};
