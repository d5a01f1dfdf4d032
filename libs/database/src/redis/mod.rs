//! Redis connector, cache and health check

mod cache;
mod config;
mod health;

pub use cache::{connect, RedisCache};
pub use config::RedisConfig;
pub use health::check_health;

// Re-export redis types for convenience
pub use redis::aio::ConnectionManager;
pub use redis::{AsyncCommands, Client, RedisResult};
