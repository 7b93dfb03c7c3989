//! Client configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/graphql/";
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_AUTH_SCHEME: &str = "Bearer";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid API url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid timeout {0:?}: expected milliseconds")]
    InvalidTimeout(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    /// Bounded wait for a single transport call, refresh included.
    pub timeout: Duration,
    /// Prefix of the Authorization header value.
    pub auth_scheme: String,
    /// Credential directory; `None` means the platform config dir.
    pub storage_dir: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(api_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: parse_url(api_url)?,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            auth_scheme: DEFAULT_AUTH_SCHEME.to_string(),
            storage_dir: None,
        })
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TASKBOARD_API_URL`: GraphQL endpoint (default: "http://localhost:8000/graphql/")
    /// - `TASKBOARD_TIMEOUT_MS`: per-request bounded wait (default: 15000)
    /// - `TASKBOARD_AUTH_SCHEME`: Authorization prefix (default: "Bearer")
    /// - `TASKBOARD_STORAGE_DIR`: credential directory (default: platform config dir)
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url =
            std::env::var("TASKBOARD_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let mut config = Self::new(&api_url)?;

        if let Ok(raw) = std::env::var("TASKBOARD_TIMEOUT_MS") {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(raw.clone()))?;
            config.timeout = Duration::from_millis(ms);
        }
        if let Ok(scheme) = std::env::var("TASKBOARD_AUTH_SCHEME") {
            if !scheme.trim().is_empty() {
                config.auth_scheme = scheme.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("TASKBOARD_STORAGE_DIR") {
            if !dir.trim().is_empty() {
                config.storage_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auth_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.auth_scheme = scheme.into();
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}
