//! Signed API access: client, signer, and the endpoint query functions.
//!
//! Every endpoint answers JSON with a top-level `data` object. A missing `data`
//! or a `data` of the wrong shape is an [ApiError::Schema]; there are no retries.

mod client;
mod error;
pub mod signer;

pub use client::{ApiClient, ApiClientBuilder, DEFAULT_STREAM_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS};
pub use error::ApiError;
pub use signer::Signer;

use crate::model::{
    BookInfo, CatalogEntry, ChapterListData, DetailData, DownloadData, SearchData, SearchHit,
};
use serde::de::DeserializeOwned;
use signer::params;

/// Header seed used for requests not tied to a book.
pub const ANONYMOUS_IDENTITY: &str = "00000000";

/// Endpoint URLs. Overridable so tests can point at a local server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub detail: String,
    pub chapter_list: String,
    pub download: String,
    pub search: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            detail: "https://api-bc.wtzw.com/api/v1/reader/detail".to_string(),
            chapter_list: "https://api-ks.wtzw.com/api/v1/chapter/chapter-list".to_string(),
            download: "https://api-bc.wtzw.com/api/v1/book/download".to_string(),
            search: "https://api-bc.wtzw.com/search/v1/words".to_string(),
        }
    }
}

impl Endpoints {
    /// All four endpoints under one base URL, keeping their paths.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            detail: format!("{}/api/v1/reader/detail", base),
            chapter_list: format!("{}/api/v1/chapter/chapter-list", base),
            download: format!("{}/api/v1/book/download", base),
            search: format!("{}/search/v1/words", base),
        }
    }
}

/// Pull `data` out of a response body and decode it.
fn extract_data<T: DeserializeOwned>(
    body: serde_json::Value,
    endpoint: &str,
) -> Result<T, ApiError> {
    let data = match body {
        serde_json::Value::Object(mut map) => map.remove("data"),
        _ => None,
    }
    .ok_or_else(|| ApiError::Schema {
        endpoint: endpoint.to_string(),
        message: "missing `data` object".to_string(),
    })?;
    serde_json::from_value(data).map_err(|e| ApiError::Schema {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

/// Book detail lookup. The returned title is sanitized.
pub fn fetch_book_info(
    client: &ApiClient,
    endpoints: &Endpoints,
    book_id: &str,
) -> Result<BookInfo, ApiError> {
    let body = client.get_signed_json(&endpoints.detail, params([("id", book_id)]), book_id)?;
    let data: DetailData = extract_data(body, &endpoints.detail)?;
    Ok(data.into_book_info(book_id))
}

/// Chapter catalog, ordered by `sort_index` ascending regardless of server order.
pub fn fetch_catalog(
    client: &ApiClient,
    endpoints: &Endpoints,
    book_id: &str,
) -> Result<Vec<CatalogEntry>, ApiError> {
    let body = client.get_signed_json(
        &endpoints.chapter_list,
        params([("chapter_ver", "0"), ("id", book_id)]),
        book_id,
    )?;
    let data: ChapterListData = extract_data(body, &endpoints.chapter_list)?;
    Ok(order_catalog(data.chapter_lists))
}

/// Sort entries by `sort_index`. Stable, so equal indices keep server order.
pub fn order_catalog(mut entries: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
    entries.sort_by_key(|e| e.sort_index);
    entries
}

/// Resolve the short-lived bulk archive link for a book.
pub fn resolve_download_link(
    client: &ApiClient,
    endpoints: &Endpoints,
    book_id: &str,
) -> Result<String, ApiError> {
    let body = client.get_signed_json(
        &endpoints.download,
        params([("id", book_id), ("source", "1"), ("type", "2"), ("is_vip", "1")]),
        book_id,
    )?;
    let data: DownloadData = extract_data(body, &endpoints.download)?;
    if data.link.trim().is_empty() {
        return Err(ApiError::Schema {
            endpoint: endpoints.download.clone(),
            message: "empty download link".to_string(),
        });
    }
    Ok(data.link)
}

/// Keyword search (first result page). Rows are read in order until the first
/// one missing a required field.
pub fn search_books(
    client: &ApiClient,
    endpoints: &Endpoints,
    keyword: &str,
) -> Result<Vec<SearchHit>, ApiError> {
    let body = client.get_signed_json(
        &endpoints.search,
        params([
            ("extend", ""),
            ("tab", "0"),
            ("gender", "0"),
            ("refresh_state", "8"),
            ("page", "1"),
            ("wd", keyword),
            ("is_short_story_user", "0"),
        ]),
        ANONYMOUS_IDENTITY,
    )?;
    let data: SearchData = extract_data(body, &endpoints.search)?;
    Ok(data
        .books
        .into_iter()
        .map_while(|row| serde_json::from_value::<SearchHit>(row).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn setup() -> (MockServer, ApiClient, Endpoints) {
        let server = MockServer::start();
        let client = ApiClient::builder()
            .signer(Signer::new("secret", vec!["100".into()]))
            .build()
            .unwrap();
        let endpoints = Endpoints::with_base(&server.base_url());
        (server, client, endpoints)
    }

    fn entry(id: &str, sort: u64) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            checksum: String::new(),
            sort_index: sort,
            title: format!("t{}", id),
            word_count: 0,
        }
    }

    #[test]
    fn order_catalog_sorts_ascending() {
        let ordered = order_catalog(vec![entry("c", 30), entry("a", 10), entry("b", 20)]);
        let ids: Vec<&str> = ordered.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(ordered.windows(2).all(|w| w[0].sort_index < w[1].sort_index));
    }

    #[test]
    fn fetch_catalog_sends_chapter_ver_and_sorts() {
        let (server, client, endpoints) = setup();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/chapter/chapter-list")
                .query_param("chapter_ver", "0")
                .query_param("id", "99")
                .query_param_exists("sign");
            then.status(200).json_body(json!({
                "data": {
                    "id": "99",
                    "chapter_lists": [
                        {"id": "3", "content_md5": "", "index": "3", "title": "Three", "words": "10", "chapter_sort": 3},
                        {"id": "1", "content_md5": "", "index": "1", "title": "One", "words": "10", "chapter_sort": 1},
                        {"id": "2", "content_md5": "", "index": "2", "title": "Two", "words": "10", "chapter_sort": 2}
                    ]
                }
            }));
        });
        let catalog = fetch_catalog(&client, &endpoints, "99").unwrap();
        mock.assert();
        let titles: Vec<&str> = catalog.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["One", "Two", "Three"]);
    }

    #[test]
    fn fetch_catalog_missing_keys_is_schema_error() {
        let (server, client, endpoints) = setup();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/chapter/chapter-list");
            then.status(200).json_body(json!({"data": {"id": "99"}}));
        });
        let result = fetch_catalog(&client, &endpoints, "99");
        assert!(matches!(result, Err(ApiError::Schema { .. })));
    }

    #[test]
    fn missing_data_object_is_schema_error() {
        let (server, client, endpoints) = setup();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/reader/detail");
            then.status(200).json_body(json!({"errors": {"code": 1}}));
        });
        match fetch_book_info(&client, &endpoints, "1") {
            Err(ApiError::Schema { message, .. }) => assert!(message.contains("data")),
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn fetch_book_info_decodes_detail() {
        let (server, client, endpoints) = setup();
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/reader/detail")
                .query_param("id", "1784910");
            then.status(200).json_body(json!({
                "data": {
                    "title": "A:B",
                    "author": "someone",
                    "intro": "hello",
                    "words_num": 5000,
                    "book_tag_list": [{"title": "x"}],
                    "image_link": "https://img.example/c.jpg"
                }
            }));
        });
        let info = fetch_book_info(&client, &endpoints, "1784910").unwrap();
        assert_eq!(info.title, "A：B");
        assert_eq!(info.word_count, 5000);
        assert_eq!(info.tags, vec!["x".to_string()]);
    }

    #[test]
    fn resolve_download_link_sends_fixed_params() {
        let (server, client, endpoints) = setup();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/book/download")
                .query_param("id", "5")
                .query_param("source", "1")
                .query_param("type", "2")
                .query_param("is_vip", "1");
            then.status(200)
                .json_body(json!({"data": {"link": "https://cdn.example/5.zip"}}));
        });
        let link = resolve_download_link(&client, &endpoints, "5").unwrap();
        mock.assert();
        assert_eq!(link, "https://cdn.example/5.zip");
    }

    #[test]
    fn search_stops_at_first_incomplete_row() {
        let (server, client, endpoints) = setup();
        server.mock(|when, then| {
            when.method(GET)
                .path("/search/v1/words")
                .query_param("wd", "剑")
                .query_param("refresh_state", "8");
            then.status(200).json_body(json!({
                "data": {
                    "books": [
                        {"id": "1", "original_title": "A", "original_author": "x", "words_num": "10"},
                        {"id": "2", "original_title": "B", "original_author": "y", "words_num": 20},
                        {"type": "banner"},
                        {"id": "3", "original_title": "C", "original_author": "z", "words_num": 30}
                    ]
                }
            }));
        });
        let hits = search_books(&client, &endpoints, "剑").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].title, "B");
        assert_eq!(hits[1].word_count, 20);
    }
}
