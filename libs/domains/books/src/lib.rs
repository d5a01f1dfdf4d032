//! Books Domain
//!
//! Bestseller lists from the New York Times Books API, cached per list and
//! refreshed through the job queue.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ SearchBooksProcessor │  ← JobHandler for `book.queue` / `book.queue.dlq`
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │     BooksService     │  ← use cases, read-through cache, fill trigger
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │     BookSearcher     │  ← NytBooksClient (ResilientHttpClient) | DummySearcher
//! └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_books::{BooksService, NytBooksClient, NytConfig};
//! use core_config::FromEnv;
//!
//! let client = NytBooksClient::from_config(&NytConfig::from_env()?)?;
//! let service = BooksService::new(client, cache);
//! let list = service.search_books_cached(&SearchCriteria::for_list("hardcover-fiction")).await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod processor;
pub mod queues;
pub mod searcher;
pub mod service;

pub use client::{NytBooksClient, ResilientHttpClient};
pub use config::{NytConfig, SearcherKind};
pub use error::{BooksError, BooksResult, ClientError};
pub use models::{
    Book, BookList, BookResult, Genre, Isbn, Review, SearchCriteria, DEFAULT_LIST,
};
pub use processor::SearchBooksProcessor;
pub use queues::BooksQueue;
pub use searcher::{BookSearcher, DummySearcher};
pub use service::BooksService;
