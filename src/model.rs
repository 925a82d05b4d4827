//! Canonical data model for a Qimao book: detail metadata, catalog entries, search hits.
//!
//! Wire DTOs mirror the `data` object of each endpoint; the public types are what
//! the pipeline and assemblers consume.

use serde::{Deserialize, Deserializer, Serialize};

/// Book detail metadata. `title` is already sanitized for use as a path component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookInfo {
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub intro: String,
    pub word_count: u64,
    pub tags: Vec<String>,
    pub cover_url: Option<String>,
}

impl BookInfo {
    /// Tags as a single comma-separated line.
    pub fn tags_line(&self) -> String {
        self.tags.join(", ")
    }
}

/// One chapter descriptor from the chapter-list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(rename = "content_md5", default)]
    pub checksum: String,
    #[serde(rename = "chapter_sort", deserialize_with = "lenient_u64")]
    pub sort_index: u64,
    pub title: String,
    #[serde(rename = "words", default, deserialize_with = "lenient_u64")]
    pub word_count: u64,
}

/// One result row from the search endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(rename = "original_title")]
    pub title: String,
    #[serde(rename = "original_author")]
    pub author: String,
    #[serde(rename = "words_num", default, deserialize_with = "lenient_u64")]
    pub word_count: u64,
}

/// `data` object of the book detail endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct DetailData {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub intro: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub words_num: u64,
    #[serde(default)]
    pub book_tag_list: Vec<TagDto>,
    #[serde(default)]
    pub image_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TagDto {
    pub title: String,
}

impl DetailData {
    pub(crate) fn into_book_info(self, book_id: &str) -> BookInfo {
        BookInfo {
            book_id: book_id.to_string(),
            title: sanitize_name(&self.title),
            author: self.author,
            intro: self.intro,
            word_count: self.words_num,
            tags: self.book_tag_list.into_iter().map(|t| t.title).collect(),
            cover_url: self.image_link.filter(|u| !u.is_empty()),
        }
    }
}

/// `data` object of the chapter-list endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ChapterListData {
    pub chapter_lists: Vec<CatalogEntry>,
}

/// `data` object of the bulk-download endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct DownloadData {
    pub link: String,
}

/// `data` object of the search endpoint. Rows missing a required field are dropped.
#[derive(Debug, Deserialize)]
pub(crate) struct SearchData {
    pub books: Vec<serde_json::Value>,
}

/// Replace characters that are illegal in file names with their full-width look-alikes.
/// No other character is altered.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' => '／',
            ':' => '：',
            '*' => '＊',
            '?' => '？',
            '"' => '“',
            '<' => '＜',
            '>' => '＞',
            '|' => '｜',
            other => other,
        })
        .collect()
}

/// Accept a JSON string or number and keep it as a string (ids arrive both ways).
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Accept a JSON number or a numeric string. Empty strings and null read as 0.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("not an unsigned integer: {}", n))),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(0),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("not an unsigned integer: {:?}", s))),
        serde_json::Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!(
            "expected number or numeric string, got {}",
            other
        ))),
    }
}
