//! Client configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_API_PREFIX: &str = "/api/v1";
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:5173";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

const TOKEN_DIR: &str = ".cinema-session";
const TOKEN_FILE: &str = "tokens.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid URL in {var}: {message}")]
    InvalidUrl { var: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
    /// Upper bound on one token refresh round trip.
    pub refresh_secs: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            request_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            refresh_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub api_prefix: String,
    /// Origin the payment provider redirects back to.
    pub frontend_url: String,
    pub token_file: PathBuf,
    pub timeouts: ClientTimeouts,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            api_prefix: DEFAULT_API_PREFIX.to_owned(),
            frontend_url: DEFAULT_FRONTEND_URL.to_owned(),
            token_file: default_token_file(std::env::var("HOME").ok().as_deref()),
            timeouts: ClientTimeouts::default(),
        }
    }
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `CINEMA_API_BASE_URL`: default `http://localhost:8000`
    /// - `CINEMA_API_PREFIX`: default `/api/v1`
    /// - `CINEMA_FRONTEND_URL`: default `http://localhost:5173`
    /// - `CINEMA_TOKEN_FILE`: default `$HOME/.cinema-session/tokens.json`
    /// - `CINEMA_REQUEST_TIMEOUT_SECS`: default 30
    /// - `CINEMA_CONNECT_TIMEOUT_SECS`: default 10
    /// - `CINEMA_REFRESH_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] when a URL variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] when a URL variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = parse_url(
            "CINEMA_API_BASE_URL",
            lookup("CINEMA_API_BASE_URL").as_deref().unwrap_or(DEFAULT_API_BASE_URL),
        )?;
        let frontend_url = parse_url(
            "CINEMA_FRONTEND_URL",
            lookup("CINEMA_FRONTEND_URL").as_deref().unwrap_or(DEFAULT_FRONTEND_URL),
        )?;
        let api_prefix = normalize_prefix(lookup("CINEMA_API_PREFIX").as_deref().unwrap_or(DEFAULT_API_PREFIX));
        let token_file = lookup("CINEMA_TOKEN_FILE")
            .filter(|path| !path.trim().is_empty())
            .map_or_else(|| default_token_file(lookup("HOME").as_deref()), PathBuf::from);
        let timeouts = ClientTimeouts {
            request_secs: parse_secs(lookup("CINEMA_REQUEST_TIMEOUT_SECS"), DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: parse_secs(lookup("CINEMA_CONNECT_TIMEOUT_SECS"), DEFAULT_CONNECT_TIMEOUT_SECS),
            refresh_secs: parse_secs(lookup("CINEMA_REFRESH_TIMEOUT_SECS"), DEFAULT_REFRESH_TIMEOUT_SECS),
        };

        Ok(Self { api_base_url, api_prefix, frontend_url, token_file, timeouts })
    }

    /// Base URL joined with the API prefix, without a trailing slash.
    #[must_use]
    pub fn api_root(&self) -> String {
        format!("{}{}", self.api_base_url, self.api_prefix)
    }

    #[must_use]
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.refresh_secs)
    }
}

fn parse_url(var: &'static str, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    url::Url::parse(trimmed).map_err(|e| ConfigError::InvalidUrl { var, message: e.to_string() })?;
    Ok(trimmed.to_owned())
}

fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() { String::new() } else { format!("/{trimmed}") }
}

fn parse_secs(raw: Option<String>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default)
}

fn default_token_file(home: Option<&str>) -> PathBuf {
    match home.filter(|h| !h.trim().is_empty()) {
        Some(home) => PathBuf::from(home).join(TOKEN_DIR).join(TOKEN_FILE),
        None => PathBuf::from(TOKEN_DIR).join(TOKEN_FILE),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
