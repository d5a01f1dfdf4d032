use async_trait::async_trait;
use messaging::{JobHandler, JobMessage, ProcessingError};
use tracing::{debug, instrument};

use crate::models::SearchCriteria;
use crate::searcher::BookSearcher;
use crate::service::{BooksService, CRITERIA_KEY};

/// Job handler for `book.queue`: refreshes the cached list named by the
/// message's `criteria`.
pub struct SearchBooksProcessor<S: BookSearcher> {
    service: BooksService<S>,
}

impl<S: BookSearcher> SearchBooksProcessor<S> {
    pub fn new(service: BooksService<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: BookSearcher + 'static> JobHandler for SearchBooksProcessor<S> {
    #[instrument(skip_all, fields(attempt = message.attempt().value()))]
    async fn handle(&self, message: &JobMessage) -> Result<(), ProcessingError> {
        let criteria: SearchCriteria = message.payload_entry(CRITERIA_KEY)?;
        debug!(criteria = %criteria, "Processing search job");

        self.service.refresh(&criteria).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "search_books"
    }
}
