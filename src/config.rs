//! Optional config file loading. Search order: ./qimao-dl.toml, then
//! $XDG_CONFIG_HOME/qimao-dl/config.toml (or ~/.config/qimao-dl/config.toml).

use crate::api::Signer;
use crate::archive::Throttle;
use crate::assemble::Provenance;
use crate::decrypt::Decryptor;
use crate::pipeline::Settings;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Default output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// Default output format: txt, chapters, or epub.
    pub format: Option<String>,
    /// Text output encoding label (e.g. utf-8, gbk, gb18030).
    pub encoding: Option<String>,
    /// Request timeout in seconds (default 12).
    pub timeout_secs: Option<u64>,
    /// Ceiling for the archive transfer in seconds (default 600, 0 disables it).
    pub stream_timeout_secs: Option<u64>,
    /// Proxy URL for all requests.
    pub proxy: Option<String>,
    /// Bytes per archive read (default 1024).
    pub chunk_size: Option<usize>,
    /// Pause after each archive chunk in milliseconds (default 3).
    pub chunk_delay_ms: Option<u64>,
    /// Request signing secret.
    pub signing_key: Option<String>,
    /// App versions advertised in request headers.
    pub app_versions: Option<Vec<String>>,
    pub application_id: Option<String>,
    /// Chapter cipher key as 32 hex digits.
    pub cipher_key_hex: Option<String>,
    /// Replacement attribution text.
    pub provenance: Option<String>,
}

impl Config {
    /// Session settings with this file's overrides applied to the defaults.
    pub fn settings(&self) -> Result<Settings, String> {
        let mut settings = Settings::default();
        if let Some(secs) = self.timeout_secs {
            settings.timeout_secs = secs;
        }
        if let Some(secs) = self.stream_timeout_secs {
            settings.stream_timeout_secs = (secs > 0).then_some(secs);
        }
        settings.proxy = self.proxy.clone();
        settings.throttle = Throttle {
            chunk_size: self.chunk_size.unwrap_or(settings.throttle.chunk_size),
            chunk_delay: self
                .chunk_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(settings.throttle.chunk_delay),
        };
        if self.signing_key.is_some() || self.app_versions.is_some() {
            let defaults = Signer::default();
            let secret = self
                .signing_key
                .clone()
                .unwrap_or_else(|| defaults.secret().to_string());
            settings.signer = Signer::new(secret, self.app_versions.clone().unwrap_or_default());
        }
        if let Some(id) = &self.application_id {
            settings.signer = settings.signer.with_application_id(id.clone());
        }
        if let Some(key) = &self.cipher_key_hex {
            settings.decryptor =
                Decryptor::from_hex(key).map_err(|e| format!("Invalid cipher_key_hex: {}", e))?;
        }
        if let Some(text) = &self.provenance {
            settings.provenance = Provenance::new(text);
        }
        Ok(settings)
    }
}

/// Search order: (1) ./qimao-dl.toml, (2) $XDG_CONFIG_HOME/qimao-dl/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("qimao-dl.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("qimao-dl").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            return Ok(Some(config));
        }
    }
    Ok(None)
}
