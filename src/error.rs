//! Client error taxonomy.
//!
//! DESIGN
//! ======
//! The backend reports failures in several shapes (`{"detail": ...}`,
//! `{"error": ...}`, per-field arrays from form validation). They are
//! flattened here so feature code matches on a fixed set of variants instead
//! of probing JSON bodies.

use std::collections::BTreeMap;

use serde_json::Value;

const MESSAGE_KEYS: [&str; 3] = ["detail", "error", "message"];
const NON_FIELD_KEY: &str = "non_field_errors";

// =============================================================================
// TRANSPORT
// =============================================================================

/// Failures below HTTP: no response was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection, DNS, TLS or body-read failure.
    #[error("request failed: {0}")]
    Network(String),

    /// The transport gave up waiting for a response.
    #[error("request timed out")]
    Timeout,

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    ClientBuild(String),
}

// =============================================================================
// API
// =============================================================================

/// Errors surfaced to feature code by the session client and REST helpers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// No response from the backend.
    #[error("network error: {0}")]
    Network(String),

    /// The session is gone: a 401 survived a refresh attempt, or the refresh
    /// itself failed. Callers treat this as logged out.
    #[error("not authenticated")]
    Unauthenticated,

    /// 403: the session is valid but lacks privilege.
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// 409: carries the raw body because callers (checkout) read fields from it.
    #[error("conflict: {message}")]
    Conflict { message: String, body: Value },

    /// Other 4xx, with field-level messages when the backend provided them.
    #[error("validation failed: {message}")]
    Validation {
        status: u16,
        message: String,
        fields: BTreeMap<String, Vec<String>>,
    },

    /// 5xx.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// A 2xx body did not match the expected shape.
    #[error("unexpected response payload: {0}")]
    Decode(String),
}

impl ApiError {
    /// Classify a non-success HTTP status and body.
    #[must_use]
    pub fn from_response(status: u16, body: &Value) -> Self {
        let message = error_message(body).unwrap_or_else(|| request_failed_message(status));
        match status {
            401 => Self::Unauthenticated,
            403 => Self::Forbidden { message },
            404 => Self::NotFound { message },
            409 => Self::Conflict { message, body: body.clone() },
            429 => Self::RateLimited { message },
            400..=499 => Self::Validation { status, message, fields: field_errors(body) },
            _ => Self::Server { status, message },
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Network(_) => "E_NETWORK",
            Self::Unauthenticated => "E_UNAUTHENTICATED",
            Self::Forbidden { .. } => "E_FORBIDDEN",
            Self::NotFound { .. } => "E_NOT_FOUND",
            Self::RateLimited { .. } => "E_RATE_LIMITED",
            Self::Conflict { .. } => "E_CONFLICT",
            Self::Validation { .. } => "E_VALIDATION",
            Self::Server { .. } => "E_SERVER",
            Self::Decode(_) => "E_DECODE",
        }
    }

    /// Whether repeating the same call later may succeed.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. })
    }

    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }
}

impl From<TransportError> for ApiError {
    fn from(error: TransportError) -> Self {
        Self::Network(error.to_string())
    }
}

pub(crate) fn request_failed_message(status: u16) -> String {
    format!("request failed with status {status}")
}

/// Pull a human-readable message out of an error body.
pub(crate) fn error_message(body: &Value) -> Option<String> {
    match body {
        Value::String(text) => non_empty(text),
        Value::Array(items) => items.iter().find_map(error_message),
        Value::Object(map) => {
            for key in MESSAGE_KEYS {
                if let Some(message) = map.get(key).and_then(error_message) {
                    return Some(message);
                }
            }
            if let Some(message) = map.get(NON_FIELD_KEY).and_then(error_message) {
                return Some(message);
            }
            map.iter()
                .find_map(|(field, value)| error_message(value).map(|message| format!("{field}: {message}")))
        }
        _ => None,
    }
}

/// Collect per-field validation messages (`{"email": ["already taken"]}`).
pub(crate) fn field_errors(body: &Value) -> BTreeMap<String, Vec<String>> {
    let Value::Object(map) = body else {
        return BTreeMap::new();
    };
    map.iter()
        .filter(|(key, _)| !MESSAGE_KEYS.contains(&key.as_str()))
        .filter_map(|(key, value)| {
            let messages: Vec<String> = match value {
                Value::String(text) => non_empty(text).into_iter().collect(),
                Value::Array(items) => items.iter().filter_map(error_message).collect(),
                _ => Vec::new(),
            };
            (!messages.is_empty()).then(|| (key.clone(), messages))
        })
        .collect()
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
