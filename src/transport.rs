//! HTTP transport seam.
//!
//! DESIGN
//! ======
//! `Transport` is the only place bytes leave the process. The session client
//! speaks to it in terms of `ApiRequest`/`ApiResponse`, so tests script the
//! backend with an in-memory transport and the binary plugs in reqwest.
//! Non-2xx responses are not errors at this layer; only the absence of a
//! response is.

use std::fmt;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{ApiError, TransportError};

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// Whether the session client should attach the stored access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAuth {
    Bearer,
    /// Login, registration and token refresh go out without credentials.
    Anonymous,
}

/// One backend call. Paths are relative to the API prefix (`/auth/login/`).
#[derive(Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub auth: RequestAuth,
    bearer: Option<String>,
    retried: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, auth: RequestAuth::Bearer, bearer: None, retried: false }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.auth = RequestAuth::Anonymous;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a serialized JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] when `body` cannot be represented as JSON.
    pub fn with_json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(self.with_body(value))
    }

    /// Access token the session client attached, if any.
    #[must_use]
    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    /// Whether this request already went through one refresh-and-retry cycle.
    #[must_use]
    pub fn retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn set_bearer(&mut self, token: Option<String>) {
        self.bearer = token;
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("auth", &self.auth)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .field("retried", &self.retried)
            .finish_non_exhaustive()
    }
}

/// A response the backend actually produced, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Pass 2xx through; classify anything else into the error taxonomy.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] variant matching a non-success status.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() { Ok(self) } else { Err(ApiError::from_response(self.status, &self.body)) }
    }

    /// Check the status and decode the body.
    ///
    /// # Errors
    ///
    /// Returns the status error, or [`ApiError::Decode`] on a shape mismatch.
    pub fn json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let ok = self.error_for_status()?;
        serde_json::from_value(ok.body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

// =============================================================================
// TRANSPORT TRAIT
// =============================================================================

/// Capability "send request, get response or error". Enables mocking in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `request` and return whatever the backend answered.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] only when no response was received.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

// =============================================================================
// REQWEST
// =============================================================================

/// Production transport over a pooled `reqwest::Client`.
pub struct ReqwestTransport {
    http: reqwest::Client,
    api_root: String,
}

impl ReqwestTransport {
    /// Build a transport rooted at `config.api_root()`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ClientBuild`] if the HTTP client fails to build.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        Ok(Self { http, api_root: config.api_root() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_root, path.trim_start_matches('/'))
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self.http.request(request.method.clone(), self.url(&request.path));
        if let Some(token) = request.bearer() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(map_reqwest_error)?;

        tracing::debug!(method = %request.method, path = %request.path, status, "api response");
        Ok(ApiResponse { status, body: parse_body(&text) })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() { TransportError::Timeout } else { TransportError::Network(error.to_string()) }
}

/// Decode a response body: JSON when possible, otherwise the raw text.
pub(crate) fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
