//! Runtime configuration loaded from `PARTIFY_*` environment variables.
//!
//! Semantics:
//! - Unset or blank variables take their defaults.
//! - Malformed values are errors, never silently replaced.

use std::path::PathBuf;
use std::time::Duration;

use partify_core::DisplayOrder;
use partify_upload::{ServiceEndpoints, UploadError};
use thiserror::Error;

/// Default analysis service base URL.
pub const DEFAULT_API_BASE: &str = "https://partify-backend.onrender.com";

/// Default per-request HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Env var overriding the service base URL.
pub const ENV_API_BASE: &str = "PARTIFY_API_BASE";
/// Env var overriding the HTTP timeout.
pub const ENV_HTTP_TIMEOUT_SECS: &str = "PARTIFY_HTTP_TIMEOUT_SECS";
/// Env var selecting the defect display order.
pub const ENV_DISPLAY_ORDER: &str = "PARTIFY_DISPLAY_ORDER";
/// Env var selecting the download directory.
pub const ENV_DOWNLOAD_DIR: &str = "PARTIFY_DOWNLOAD_DIR";
/// Env var enabling per-run log files in a directory.
pub const ENV_LOG_DIR: &str = "PARTIFY_LOG_DIR";

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Analysis service endpoints.
    pub endpoints: ServiceEndpoints,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Ordering of the truncated defect list.
    pub display_order: DisplayOrder,
    /// Directory downloads are written to.
    pub download_dir: PathBuf,
    /// Directory for per-run log files, when file logging is enabled.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a variable holds a malformed value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a variable holds a malformed value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let endpoints = ServiceEndpoints::new(
            read(ENV_API_BASE).as_deref().unwrap_or(DEFAULT_API_BASE),
        )?;

        let http_timeout = match read(ENV_HTTP_TIMEOUT_SECS) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(ConfigError::InvalidTimeout(raw)),
            },
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        let display_order = match read(ENV_DISPLAY_ORDER) {
            Some(raw) => parse_display_order(&raw)?,
            None => DisplayOrder::default(),
        };

        Ok(Self {
            endpoints,
            http_timeout,
            display_order,
            download_dir: read(ENV_DOWNLOAD_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            log_dir: read(ENV_LOG_DIR).map(PathBuf::from),
        })
    }
}

/// Parses `source` or `confidence` (case-insensitive) into a [`DisplayOrder`].
///
/// # Errors
/// Returns [`ConfigError::InvalidDisplayOrder`] for any other value.
pub fn parse_display_order(raw: &str) -> Result<DisplayOrder, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "source" => Ok(DisplayOrder::SourceOrder),
        "confidence" => Ok(DisplayOrder::ConfidenceDescending),
        _ => Err(ConfigError::InvalidDisplayOrder(raw.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Service base URL rejected.
    #[error("invalid service base: {0}")]
    Endpoint(#[from] UploadError),
    /// Timeout is not a positive integer number of seconds.
    #[error("invalid HTTP timeout '{0}': expected positive seconds")]
    InvalidTimeout(String),
    /// Display order is not `source` or `confidence`.
    #[error("invalid display order '{0}': expected 'source' or 'confidence'")]
    InvalidDisplayOrder(String),
}
