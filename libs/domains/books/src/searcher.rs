use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::error::ClientError;
use crate::models::{Book, BookList, BookResult, Genre, Isbn, Review, SearchCriteria};

/// Source of bestseller data.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookSearcher: Send + Sync {
    async fn search_books(&self, criteria: &SearchCriteria) -> Result<BookList, ClientError>;

    async fn list_genres(&self) -> Result<Vec<Genre>, ClientError>;
}

#[async_trait]
impl<S: BookSearcher + ?Sized> BookSearcher for Arc<S> {
    async fn search_books(&self, criteria: &SearchCriteria) -> Result<BookList, ClientError> {
        (**self).search_books(criteria).await
    }

    async fn list_genres(&self) -> Result<Vec<Genre>, ClientError> {
        (**self).list_genres().await
    }
}

/// Canned data for running the pipeline without an API key.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummySearcher;

#[async_trait]
impl BookSearcher for DummySearcher {
    async fn search_books(&self, criteria: &SearchCriteria) -> Result<BookList, ClientError> {
        info!(criteria = %criteria, "Searching books in dummy searcher");

        let book = Book {
            title: "Dummy Book".to_string(),
            description: Some("Dummy book description".to_string()),
            contributor: "by Dummy Contributor".to_string(),
            author: "Dummy Author".to_string(),
            contributor_note: None,
            price: 19.99,
            age_group: None,
            publisher: "Dummy Publisher".to_string(),
            primary_isbn13: "9781234567890".to_string(),
            primary_isbn10: "1234567890".to_string(),
        };

        let result = BookResult {
            list_name: criteria.list_name().to_string(),
            display_name: "Dummy List".to_string(),
            bestsellers_date: "2023-01-01".to_string(),
            published_date: "2023-01-01".to_string(),
            rank: 1,
            rank_last_week: 2,
            weeks_on_list: 4,
            asterisk: 0,
            dagger: 0,
            amazon_product_url: "https://www.amazon.com/dummy".to_string(),
            isbns: vec![Isbn {
                isbn10: "1234567890".to_string(),
                isbn13: "9781234567890".to_string(),
            }],
            book_details: vec![book],
            reviews: vec![Review::default()],
        };

        Ok(BookList::new(1, vec![result]))
    }

    async fn list_genres(&self) -> Result<Vec<Genre>, ClientError> {
        info!("Listing genres in dummy searcher");
        Ok(vec![
            Genre {
                code: "dummy-1".to_string(),
                display_name: "Dummy Genre 1".to_string(),
            },
            Genre {
                code: "dummy-2".to_string(),
                display_name: "Dummy Genre 2".to_string(),
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dummy_echoes_requested_list() {
        let list = DummySearcher
            .search_books(&SearchCriteria::for_list("manga"))
            .await
            .unwrap();

        assert_eq!(list.page_size, 1);
        assert_eq!(list.results[0].list_name, "manga");
    }

    #[tokio::test]
    async fn test_dummy_genres() {
        let searcher: Arc<dyn BookSearcher> = Arc::new(DummySearcher);

        let genres = searcher.list_genres().await.unwrap();

        assert_eq!(genres.len(), 2);
        assert_eq!(genres[0].code, "dummy-1");
    }
}
