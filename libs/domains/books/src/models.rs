use serde::{Deserialize, Deserializer, Serialize, de};
use std::fmt;

/// List searched when the criteria name none.
pub const DEFAULT_LIST: &str = "hardcover-fiction";

/// Filters for one bestseller list page.
///
/// Serialized as the `criteria` entry of a job payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    #[serde(default)]
    pub list: Option<String>,
    #[serde(default)]
    pub bestsellers_date: Option<String>,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl SearchCriteria {
    pub fn for_list(list: impl Into<String>) -> Self {
        Self {
            list: Some(list.into()),
            ..Self::default()
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The requested list, or [`DEFAULT_LIST`]. Also the cache key.
    pub fn list_name(&self) -> &str {
        self.list
            .as_deref()
            .filter(|list| !list.is_empty())
            .unwrap_or(DEFAULT_LIST)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

impl fmt::Display for SearchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "list={} offset={}", self.list_name(), self.offset())?;
        if let Some(date) = &self.bestsellers_date {
            write!(f, " bestsellers_date={date}")?;
        }
        if let Some(date) = &self.published_date {
            write!(f, " published_date={date}")?;
        }
        Ok(())
    }
}

/// One page of a bestseller list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BookListWire")]
pub struct BookList {
    pub num_results: u32,
    pub results: Vec<BookResult>,
    /// Number of entries on this page.
    pub page_size: usize,
}

impl BookList {
    pub fn new(num_results: u32, results: Vec<BookResult>) -> Self {
        let page_size = results.len();
        Self {
            num_results,
            results,
            page_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Deserialize)]
struct BookListWire {
    #[serde(default)]
    num_results: u32,
    #[serde(default)]
    results: Vec<BookResult>,
}

impl From<BookListWire> for BookList {
    fn from(wire: BookListWire) -> Self {
        BookList::new(wire.num_results, wire.results)
    }
}

/// A ranked entry on a list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookResult {
    pub list_name: String,
    pub display_name: String,
    pub bestsellers_date: String,
    pub published_date: String,
    pub rank: u32,
    pub rank_last_week: u32,
    pub weeks_on_list: u32,
    pub asterisk: u32,
    pub dagger: u32,
    pub amazon_product_url: String,
    pub isbns: Vec<Isbn>,
    pub book_details: Vec<Book>,
    pub reviews: Vec<Review>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Book {
    pub title: String,
    pub description: Option<String>,
    pub contributor: String,
    pub author: String,
    pub contributor_note: Option<String>,
    #[serde(deserialize_with = "price")]
    pub price: f64,
    pub age_group: Option<String>,
    pub publisher: String,
    pub primary_isbn13: String,
    pub primary_isbn10: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Isbn {
    pub isbn10: String,
    pub isbn13: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Review {
    pub book_review_link: Option<String>,
    pub first_chapter_link: Option<String>,
    pub sunday_review_link: Option<String>,
    pub article_chapter_link: Option<String>,
}

/// A list that can be searched; `code` is the API's `list_name_encoded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub code: String,
    pub display_name: String,
}

/// The API sends prices as strings ("0.00"); cached lists carry numbers.
fn price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Price {
        Number(f64),
        Text(String),
    }

    match Option::<Price>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(Price::Number(value)) => Ok(value),
        Some(Price::Text(text)) if text.trim().is_empty() => Ok(0.0),
        Some(Price::Text(text)) => text.trim().parse().map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nyt_page() -> serde_json::Value {
        json!({
            "status": "OK",
            "num_results": 15,
            "results": [{
                "list_name": "Hardcover Fiction",
                "display_name": "Hardcover Fiction",
                "bestsellers_date": "2024-06-01",
                "published_date": "2024-06-16",
                "rank": 1,
                "rank_last_week": 0,
                "weeks_on_list": 1,
                "asterisk": 0,
                "dagger": 0,
                "amazon_product_url": "https://www.amazon.com/dp/0000000000",
                "isbns": [{"isbn10": "0000000000", "isbn13": "9780000000000"}],
                "book_details": [{
                    "title": "FIRST BOOK",
                    "description": "",
                    "contributor": "by Someone",
                    "author": "Someone",
                    "contributor_note": "",
                    "price": "0.00",
                    "age_group": "",
                    "publisher": "Publisher",
                    "primary_isbn13": "9780000000000",
                    "primary_isbn10": "0000000000"
                }],
                "reviews": [{"book_review_link": ""}]
            }]
        })
    }

    #[test]
    fn test_book_list_from_api_page() {
        let list: BookList = serde_json::from_value(nyt_page()).unwrap();

        assert_eq!(list.num_results, 15);
        assert_eq!(list.page_size, 1);
        assert_eq!(list.results[0].book_details[0].price, 0.0);
        assert_eq!(list.results[0].isbns[0].isbn13, "9780000000000");
        assert_eq!(list.results[0].reviews[0].first_chapter_link, None);
    }

    #[test]
    fn test_page_size_ignores_wire_value() {
        let list: BookList =
            serde_json::from_value(json!({"num_results": 3, "results": [], "page_size": 20}))
                .unwrap();

        assert_eq!(list.page_size, 0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_cached_list_reads_back() {
        let list: BookList = serde_json::from_value(nyt_page()).unwrap();
        let cached = serde_json::to_string(&list).unwrap();

        let read: BookList = serde_json::from_str(&cached).unwrap();

        assert_eq!(read, list);
    }

    #[test]
    fn test_price_accepts_numbers_and_strings() {
        let book: Book = serde_json::from_value(json!({"price": 19.99})).unwrap();
        assert_eq!(book.price, 19.99);

        let book: Book = serde_json::from_value(json!({"price": "27.00"})).unwrap();
        assert_eq!(book.price, 27.0);

        let book: Book = serde_json::from_value(json!({"price": null})).unwrap();
        assert_eq!(book.price, 0.0);

        assert!(serde_json::from_value::<Book>(json!({"price": "free"})).is_err());
    }

    #[test]
    fn test_criteria_defaults() {
        let criteria: SearchCriteria = serde_json::from_value(json!({})).unwrap();

        assert_eq!(criteria.list_name(), DEFAULT_LIST);
        assert_eq!(criteria.offset(), 0);
        assert_eq!(
            SearchCriteria::for_list("e-book-fiction").list_name(),
            "e-book-fiction"
        );
    }

    #[test]
    fn test_criteria_display() {
        let criteria = SearchCriteria {
            published_date: Some("2024-06-16".into()),
            ..SearchCriteria::for_list("manga").with_offset(20)
        };

        assert_eq!(
            criteria.to_string(),
            "list=manga offset=20 published_date=2024-06-16"
        );
    }
}
