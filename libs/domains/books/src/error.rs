use database::DatabaseError;
use messaging::{BrokerError, ErrorCategory, ProcessingError};
use thiserror::Error;

/// Failures of the outbound NYT client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected before any request was sent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The API answered 422.
    #[error("Invalid payload request: {detail}")]
    InvalidPayload { detail: String },

    #[error("Unexpected status {status} for {method} {url}")]
    UnexpectedStatus {
        method: String,
        url: String,
        status: u16,
    },

    /// Every attempt failed before a response arrived.
    #[error("Error calling {method} {path} after {attempts} attempts")]
    Exhausted {
        method: String,
        path: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// Still throttled when the attempts ran out.
    #[error("Maximum number of retries exceeded for {path} after {attempts} attempts")]
    RetriesExhausted { path: String, attempts: u32 },

    /// 2xx body that does not have the expected shape.
    #[error("Unexpected response body: {0}")]
    InvalidResponse(#[source] serde_json::Error),

    #[error("Failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl ClientError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::InvalidInput(_)
            | ClientError::InvalidPayload { .. }
            | ClientError::Build(_) => ErrorCategory::Permanent,
            ClientError::RetriesExhausted { .. } => ErrorCategory::RateLimited,
            ClientError::UnexpectedStatus { .. }
            | ClientError::Exhausted { .. }
            | ClientError::InvalidResponse(_) => ErrorCategory::Transient,
        }
    }
}

/// Use-case failures of the books domain.
#[derive(Debug, Error)]
pub enum BooksError {
    #[error("No book found matching the criteria: {0}")]
    BookNotFound(String),

    #[error("Invalid search criteria: {0}")]
    InvalidCriteria(String),

    #[error("No genres found")]
    GenreNotFound,

    #[error("Error in external API {api}: {source}")]
    ExternalApi {
        api: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] DatabaseError),

    #[error("Failed to encode book list: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to enqueue search job: {0}")]
    Enqueue(#[from] BrokerError),
}

pub type BooksResult<T> = Result<T, BooksError>;

pub(crate) const NYT_API: &str = "NYT Books API";

impl From<ClientError> for BooksError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::InvalidInput(detail) | ClientError::InvalidPayload { detail } => {
                BooksError::InvalidCriteria(detail)
            }
            source => BooksError::ExternalApi {
                api: NYT_API,
                source,
            },
        }
    }
}

impl BooksError {
    /// Only caller-invalid criteria skip the retry budget; an empty list may
    /// simply not be published yet.
    pub fn category(&self) -> ErrorCategory {
        match self {
            BooksError::InvalidCriteria(_) => ErrorCategory::Permanent,
            BooksError::ExternalApi { source, .. } => match source.category() {
                ErrorCategory::RateLimited => ErrorCategory::RateLimited,
                _ => ErrorCategory::Transient,
            },
            BooksError::BookNotFound(_)
            | BooksError::GenreNotFound
            | BooksError::Encode(_)
            | BooksError::Cache(_)
            | BooksError::Enqueue(_) => ErrorCategory::Transient,
        }
    }
}

impl From<BooksError> for ProcessingError {
    fn from(err: BooksError) -> Self {
        let category = err.category();
        ProcessingError::with_category(category, err.to_string(), err)
    }
}
