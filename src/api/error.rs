//! Error type for the signed API calls (detail, chapter list, download link, search).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Invalid proxy '{proxy}': {source}")]
    InvalidProxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Response from {url} is not valid JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Response decoded but `data` is missing or has an unexpected shape.
    #[error("Unexpected response shape from {endpoint}: {message}")]
    Schema { endpoint: String, message: String },
}
