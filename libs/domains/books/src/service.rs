use database::Cache;
use messaging::{JobMessage, QueueBroker};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{BooksError, BooksResult};
use crate::models::{BookList, Genre, SearchCriteria};
use crate::searcher::BookSearcher;

/// Payload key holding the serialized [`SearchCriteria`].
pub const CRITERIA_KEY: &str = "criteria";

/// Service layer for the books use cases
pub struct BooksService<S: BookSearcher> {
    searcher: Arc<S>,
    cache: Arc<dyn Cache>,
}

impl<S: BookSearcher> Clone for BooksService<S> {
    fn clone(&self) -> Self {
        Self {
            searcher: Arc::clone(&self.searcher),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<S: BookSearcher> BooksService<S> {
    pub fn new(searcher: S, cache: Arc<dyn Cache>) -> Self {
        Self {
            searcher: Arc::new(searcher),
            cache,
        }
    }

    /// Search the upstream API; an empty page is [`BooksError::BookNotFound`].
    #[instrument(skip_all, fields(criteria = %criteria))]
    pub async fn search_books(&self, criteria: &SearchCriteria) -> BooksResult<BookList> {
        let books = self.searcher.search_books(criteria).await.map_err(|e| {
            error!(error = %e, "Book search failed");
            BooksError::from(e)
        })?;

        if books.is_empty() {
            error!("No books found matching criteria");
            return Err(BooksError::BookNotFound(criteria.to_string()));
        }

        Ok(books)
    }

    pub async fn list_genres(&self) -> BooksResult<Vec<Genre>> {
        let genres = self.searcher.list_genres().await.map_err(|e| {
            error!(error = %e, "Listing genres failed");
            BooksError::from(e)
        })?;

        if genres.is_empty() {
            error!("No genres found");
            return Err(BooksError::GenreNotFound);
        }

        Ok(genres)
    }

    /// Cached list for `criteria.list_name()`, searching and caching on a miss.
    ///
    /// An entry that no longer deserializes counts as a miss and is overwritten.
    #[instrument(skip_all, fields(list = %criteria.list_name()))]
    pub async fn search_books_cached(&self, criteria: &SearchCriteria) -> BooksResult<BookList> {
        let key = criteria.list_name();

        if let Some(cached) = self.cache.get(key).await? {
            match serde_json::from_str::<BookList>(&cached) {
                Ok(books) => {
                    debug!("Books found in cache");
                    return Ok(books);
                }
                Err(e) => warn!(error = %e, "Discarding unreadable cache entry"),
            }
        }

        self.refresh(criteria).await
    }

    /// Search and overwrite the cached list.
    #[instrument(skip_all, fields(list = %criteria.list_name()))]
    pub async fn refresh(&self, criteria: &SearchCriteria) -> BooksResult<BookList> {
        let books = self.search_books(criteria).await?;
        let encoded = serde_json::to_string(&books).map_err(BooksError::Encode)?;

        self.cache.set(criteria.list_name(), &encoded).await?;
        info!(page_size = books.page_size, "Books cached");
        Ok(books)
    }

    /// Publish one search job per known list; returns how many were queued.
    ///
    /// Stops at the first publish failure.
    #[instrument(skip_all, fields(queue = %broker.work_queue()))]
    pub async fn enqueue_all_catalogs(&self, broker: &QueueBroker) -> BooksResult<usize> {
        let genres = self.list_genres().await?;

        for genre in &genres {
            let criteria = SearchCriteria::for_list(&genre.code);
            let message = JobMessage::with_entry(CRITERIA_KEY, &criteria, broker.work_queue())
                .map_err(BooksError::Encode)?;
            broker
                .try_publish(&message, broker.work_queue(), None)
                .await?;
            debug!(list = %genre.code, "Search job queued");
        }

        info!(count = genres.len(), "Catalog fill queued");
        Ok(genres.len())
    }
}
