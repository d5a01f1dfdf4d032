//! NYT Books API client.

pub mod http;
pub mod nyt;

pub use http::{AttemptOutcome, ResilientHttpClient, RetryCause};
pub use nyt::NytBooksClient;
