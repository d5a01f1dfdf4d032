//! Shared test utilities for the bestseller crates
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestRabbitMq`: RabbitMQ container with automatic cleanup (feature: "rabbitmq")
//! - `TestDataBuilder`: Deterministic book data (always available)
//!
//! Container-backed tests need a running Docker daemon, so callers mark them
//! `#[ignore]` and run them with `cargo test -- --ignored`.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis", "rabbitmq"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::TestRabbitMq;
//!
//! #[tokio::test]
//! #[ignore = "requires docker"]
//! async fn my_broker_test() {
//!     let rabbit = TestRabbitMq::new().await;
//!     let connection = lapin::Connection::connect(rabbit.uri(), Default::default()).await.unwrap();
//! }
//! ```

#[cfg(feature = "rabbitmq")]
mod rabbitmq;
#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "rabbitmq")]
pub use rabbitmq::TestRabbitMq;
#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for book test data with deterministic values
///
/// The same seed always yields the same ISBNs and titles, so failures are
/// reproducible.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed from the test name
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_search_books");
    /// assert_eq!(builder.isbn13(0).len(), 13);
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// A 13-digit ISBN-shaped string; `index` distinguishes books within a test.
    pub fn isbn13(&self, index: u64) -> String {
        let digits = self.seed.wrapping_add(index) % 10_000_000_000;
        format!("978{digits:010}")
    }

    /// A 10-digit ISBN-shaped string.
    pub fn isbn10(&self, index: u64) -> String {
        let digits = self.seed.wrapping_add(index) % 10_000_000_000;
        format!("{digits:010}")
    }

    pub fn title(&self, suffix: &str) -> String {
        format!("TEST TITLE {} {}", self.seed % 1000, suffix.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let a = TestDataBuilder::new(42);
        let b = TestDataBuilder::new(42);

        assert_eq!(a.isbn13(1), b.isbn13(1));
        assert_eq!(a.title("main"), b.title("main"));
    }

    #[test]
    fn test_isbn_shapes() {
        let builder = TestDataBuilder::new(7);

        assert_eq!(builder.isbn13(0), "9780000000007");
        assert_eq!(builder.isbn10(1), "0000000008");
        assert_ne!(builder.isbn13(0), builder.isbn13(1));
    }

    #[test]
    fn test_data_builder_different_names() {
        let a = TestDataBuilder::from_test_name("test1");
        let b = TestDataBuilder::from_test_name("test2");

        assert_ne!(a.isbn13(0), b.isbn13(0));
    }
}
