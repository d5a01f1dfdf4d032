use super::http::ResilientHttpClient;
use crate::config::NytConfig;
use crate::error::ClientError;
use crate::models::{BookList, Genre, SearchCriteria};
use crate::searcher::BookSearcher;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info, instrument};

const LISTS_PATH: &str = "/lists.json";
const LIST_NAMES_PATH: &str = "/lists/names.json";
const PAGE_SIZE: u32 = 20;

/// Typed calls against the NYT Books API.
#[derive(Clone)]
pub struct NytBooksClient {
    http: ResilientHttpClient,
}

#[derive(Deserialize)]
struct ListNames {
    #[serde(default)]
    results: Vec<ListName>,
}

#[derive(Deserialize)]
struct ListName {
    list_name_encoded: String,
    display_name: String,
}

impl NytBooksClient {
    pub fn new(http: ResilientHttpClient) -> Self {
        Self { http }
    }

    pub fn from_config(config: &NytConfig) -> Result<Self, ClientError> {
        let policy = config
            .retry_policy()
            .map_err(|e| ClientError::InvalidInput(e.to_string()))?;
        Ok(Self::new(ResilientHttpClient::new(config, policy)?))
    }

    /// One page of a bestseller list. `offset` must be a multiple of 20.
    #[instrument(skip_all, fields(criteria = %criteria))]
    pub async fn search_books(&self, criteria: &SearchCriteria) -> Result<BookList, ClientError> {
        let offset = criteria.offset();
        if offset % PAGE_SIZE != 0 {
            error!(offset, "Invalid offset value");
            return Err(ClientError::InvalidInput(format!(
                "offset must be a multiple of {PAGE_SIZE}, got {offset}"
            )));
        }

        let params = [
            ("list", Some(criteria.list_name().to_string())),
            ("bestsellers-date", criteria.bestsellers_date.clone()),
            ("published-date", criteria.published_date.clone()),
            ("offset", Some(offset.to_string())),
        ];

        info!("Searching for books");
        let body = self.http.fetch(LISTS_PATH, &params).await?;
        serde_json::from_value(body).map_err(ClientError::InvalidResponse)
    }

    /// Every list the API knows about.
    #[instrument(skip(self))]
    pub async fn list_genres(&self) -> Result<Vec<Genre>, ClientError> {
        let body = self.http.fetch(LIST_NAMES_PATH, &[]).await?;
        let names: ListNames = serde_json::from_value(body).map_err(ClientError::InvalidResponse)?;

        Ok(names
            .results
            .into_iter()
            .map(|name| Genre {
                code: name.list_name_encoded,
                display_name: name.display_name,
            })
            .collect())
    }
}

#[async_trait]
impl BookSearcher for NytBooksClient {
    async fn search_books(&self, criteria: &SearchCriteria) -> Result<BookList, ClientError> {
        NytBooksClient::search_books(self, criteria).await
    }

    async fn list_genres(&self) -> Result<Vec<Genre>, ClientError> {
        NytBooksClient::list_genres(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> NytBooksClient {
        let config = NytConfig::new("test-key")
            .with_base_url(base_url)
            .with_retries(1, Duration::from_millis(5))
            .with_timeout(Duration::from_secs(2));
        NytBooksClient::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_offset_not_multiple_of_page_size_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .search_books(&SearchCriteria::for_list("manga").with_offset(21))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_search_books_defaults_to_hardcover_fiction() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lists.json"))
            .and(query_param("list", "hardcover-fiction"))
            .and(query_param("offset", "20"))
            .and(query_param("api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "num_results": 1,
                "results": [{"list_name": "Hardcover Fiction", "rank": 1}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let list = client(&server.uri())
            .search_books(&SearchCriteria::default().with_offset(20))
            .await
            .unwrap();

        assert_eq!(list.num_results, 1);
        assert_eq!(list.page_size, 1);
        assert_eq!(list.results[0].rank, 1);
    }

    #[tokio::test]
    async fn test_search_books_rejects_unexpected_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": "none"})))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .search_books(&SearchCriteria::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_list_genres_maps_encoded_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lists/names.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "OK",
                "results": [
                    {"list_name": "Combined Print and E-Book Fiction", "display_name": "Combined Print & E-Book Fiction", "list_name_encoded": "combined-print-and-e-book-fiction"},
                    {"list_name": "Hardcover Fiction", "display_name": "Hardcover Fiction", "list_name_encoded": "hardcover-fiction"}
                ]
            })))
            .mount(&server)
            .await;

        let genres = client(&server.uri()).list_genres().await.unwrap();

        assert_eq!(
            genres,
            vec![
                Genre {
                    code: "combined-print-and-e-book-fiction".into(),
                    display_name: "Combined Print & E-Book Fiction".into(),
                },
                Genre {
                    code: "hardcover-fiction".into(),
                    display_name: "Hardcover Fiction".into(),
                },
            ]
        );
    }
}
