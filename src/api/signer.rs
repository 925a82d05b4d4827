//! Request signing. The canonical form is fixed by the remote service:
//! sort keys, concatenate `key=value` with no separator, append the shared
//! secret, MD5, lowercase hex.

use md5::{Digest, Md5};
use std::collections::BTreeMap;

/// Shared secret appended to every canonical string.
pub const DEFAULT_SIGNING_KEY: &str = "d3dGiJc651gSQ8w1";

/// Package name reported in the `application-id` header.
pub const DEFAULT_APPLICATION_ID: &str = "com.kmxs.reader";

/// Client versions known to be accepted by the service.
pub const DEFAULT_APP_VERSIONS: &[&str] = &[
    "73720", "73700", "73620", "73600", "73500", "73420", "73400", "73328", "73325", "73320",
    "73300", "73220", "73200", "73100", "73000", "72900", "72820", "72800", "70720", "62010",
    "62112", "62172", "62212", "62202", "62312", "62302", "62410", "62510", "62612", "62710",
];

/// Parameter (and header) name carrying the signature.
pub const SIGN_FIELD: &str = "sign";

/// Signs query parameters and derives per-book request headers.
///
/// Secret, version list and application id are injected so tests and config
/// can substitute their own values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    secret: String,
    versions: Vec<String>,
    application_id: String,
}

impl Default for Signer {
    fn default() -> Self {
        Self {
            secret: DEFAULT_SIGNING_KEY.to_string(),
            versions: DEFAULT_APP_VERSIONS.iter().map(|v| v.to_string()).collect(),
            application_id: DEFAULT_APPLICATION_ID.to_string(),
        }
    }
}

impl Signer {
    /// Build a signer. An empty version list falls back to the built-in list.
    pub fn new(secret: impl Into<String>, versions: Vec<String>) -> Self {
        let versions = if versions.is_empty() {
            DEFAULT_APP_VERSIONS.iter().map(|v| v.to_string()).collect()
        } else {
            versions
        };
        Self {
            secret: secret.into(),
            versions,
            application_id: DEFAULT_APPLICATION_ID.to_string(),
        }
    }

    pub fn with_application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = id.into();
        self
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Signature of a parameter set. A `sign` entry already present is part of the input.
    pub fn signature(&self, params: &BTreeMap<String, String>) -> String {
        let mut canonical = String::new();
        for (k, v) in params {
            canonical.push_str(k);
            canonical.push('=');
            canonical.push_str(v);
        }
        canonical.push_str(&self.secret);
        hex::encode(Md5::digest(canonical.as_bytes()))
    }

    /// Return `params` augmented with its `sign` field.
    pub fn sign(&self, mut params: BTreeMap<String, String>) -> BTreeMap<String, String> {
        let signature = self.signature(&params);
        params.insert(SIGN_FIELD.to_string(), signature);
        params
    }

    /// Client version selected for `book_id`. Stable across runs and platforms.
    pub fn version_for(&self, book_id: &str) -> &str {
        &self.versions[version_index(book_id, self.versions.len())]
    }

    /// Signed header set impersonating the mobile client for `book_id`.
    pub fn headers_for(&self, book_id: &str) -> BTreeMap<String, String> {
        let headers: BTreeMap<String, String> = [
            ("AUTHORIZATION", ""),
            ("app-version", self.version_for(book_id)),
            ("application-id", self.application_id.as_str()),
            ("channel", "unknown"),
            ("net-env", "1"),
            ("platform", "android"),
            ("qm-params", ""),
            ("reg", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        self.sign(headers)
    }
}

/// Deterministic hash-to-index: first 8 bytes of MD5(seed), big-endian, modulo `len`.
/// `len` must be non-zero.
pub fn version_index(seed: &str, len: usize) -> usize {
    let digest = Md5::digest(seed.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % len as u64) as usize
}

/// Build an owned parameter map from string pairs.
pub fn params<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
