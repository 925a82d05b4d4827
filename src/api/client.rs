//! Blocking HTTP client for the signed mobile API. Fixed short timeout, no retries,
//! optional proxy passed straight through to reqwest.

use crate::api::error::ApiError;
use crate::api::signer::Signer;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = "okhttp/4.9.2";
pub const DEFAULT_TIMEOUT_SECS: u64 = 12;
/// Ceiling for a whole archive transfer, body included.
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 600;
const MAX_REDIRECTS: usize = 10;

/// Blocking client that signs every API request.
///
/// Holds two reqwest clients: `inner` for JSON calls bounded by the request timeout,
/// and `stream` for archive bodies. A throttled download legitimately outlives the
/// request timeout, so `stream` bounds connecting with it and the whole transfer with
/// the longer stream ceiling. The blocking client has no per-read timeout; with the
/// ceiling disabled a body that stalls mid-transfer blocks forever.
#[derive(Debug)]
pub struct ApiClient {
    inner: reqwest::blocking::Client,
    stream: reqwest::blocking::Client,
    signer: Signer,
}

impl ApiClient {
    /// Client with default timeout, no proxy, and the built-in signing constants.
    pub fn new() -> Result<Self, ApiError> {
        Self::builder().build()
    }

    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Signed GET returning the decoded JSON body.
    ///
    /// `identity` seeds the header set (normally the book id). Non-2xx is an error.
    pub fn get_signed_json(
        &self,
        url: &str,
        params: BTreeMap<String, String>,
        identity: &str,
    ) -> Result<serde_json::Value, ApiError> {
        let query = self.signer.sign(params);
        let mut request = self.inner.get(url).query(&query);
        for (name, value) in self.signer.headers_for(identity) {
            request = request.header(name, value);
        }
        let response = request.send().map_err(|e| ApiError::Network {
            url: url.to_string(),
            source: e,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response.json().map_err(|e| ApiError::Decode {
            url: url.to_string(),
            source: e,
        })
    }

    /// Plain GET with the request timeout (cover images).
    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.inner.get(url).send().map_err(|e| ApiError::Network {
            url: url.to_string(),
            source: e,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| ApiError::Network {
                url: url.to_string(),
                source: e,
            })
    }

    /// Start a GET whose body is read incrementally by the caller.
    pub fn get_stream(&self, url: &str) -> Result<reqwest::blocking::Response, ApiError> {
        let response = self.stream.get(url).send().map_err(|e| ApiError::Network {
            url: url.to_string(),
            source: e,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

/// Builder for ApiClient with optional timeout, proxy, User-Agent and signer.
#[derive(Debug)]
pub struct ApiClientBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
    stream_timeout_secs: Option<u64>,
    proxy: Option<String>,
    signer: Signer,
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            stream_timeout_secs: Some(DEFAULT_STREAM_TIMEOUT_SECS),
            proxy: None,
            signer: Signer::default(),
        }
    }
}

impl ApiClientBuilder {
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Request timeout in seconds. Default 12.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Total time allowed for an archive transfer. `None` removes the ceiling. Default 600.
    pub fn stream_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.stream_timeout_secs = secs;
        self
    }

    /// Proxy URL applied to all schemes (e.g. `http://127.0.0.1:7890`).
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn signer(mut self, signer: Signer) -> Self {
        self.signer = signer;
        self
    }

    pub fn build(self) -> Result<ApiClient, ApiError> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let timeout = Duration::from_secs(self.timeout_secs);
        let proxy = match &self.proxy {
            Some(p) => Some(
                reqwest::Proxy::all(p.as_str()).map_err(|e| ApiError::InvalidProxy {
                    proxy: p.clone(),
                    source: e,
                })?,
            ),
            None => None,
        };

        let mut inner = reqwest::blocking::Client::builder()
            .user_agent(user_agent.clone())
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));
        let mut stream = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .timeout(self.stream_timeout_secs.map(Duration::from_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));
        if let Some(p) = proxy {
            inner = inner.proxy(p.clone());
            stream = stream.proxy(p);
        }

        Ok(ApiClient {
            inner: inner.build().map_err(ApiError::ClientBuild)?,
            stream: stream.build().map_err(ApiError::ClientBuild)?,
            signer: self.signer,
        })
    }
}
