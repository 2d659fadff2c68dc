//! Session client: bearer attachment and refresh-on-401.
//!
//! DESIGN
//! ======
//! Every authenticated call goes through [`SessionClient::send`]. A 401 on a
//! first attempt triggers one token refresh and exactly one resend. Refreshes
//! are single-flight per client: the first caller to see a 401 spawns the
//! refresh onto its own task and parks a shared handle in `flight`; every
//! later caller awaits that same handle. Because the refresh lives on its own
//! task, dropping a waiting caller (a view unmounting) never cancels it.
//!
//! The refresh task owns the store update. On success it writes the new pair
//! before the shared handle resolves, so waiters retry with a token that is
//! already persisted. On failure it clears the store and fires the expiry
//! hooks, which is how `AuthSession` falls back to anonymous.
//!
//! A refresh compares the stored refresh token before writing. If the pair
//! changed underneath it (logout, or a fresh login) the result is discarded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::{BoxFuture, Shared};
use serde::de::DeserializeOwned;

use crate::api::REFRESH_ENDPOINT;
use crate::error::ApiError;
use crate::store::TokenStore;
use crate::transport::{ApiRequest, ApiResponse, RequestAuth, Transport};
use crate::types::{RefreshResponse, TokenPair};

type RefreshFlight = Shared<BoxFuture<'static, Result<String, RefreshFailure>>>;
type ExpiryHook = Arc<dyn Fn() + Send + Sync>;

/// Why a token refresh did not produce a usable access token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshFailure {
    #[error("no refresh token stored")]
    MissingToken,
    #[error("refresh rejected with status {0}")]
    Rejected(u16),
    #[error("refresh request failed: {0}")]
    Transport(String),
    #[error("refresh timed out after {0:?}")]
    TimedOut(Duration),
    #[error("malformed refresh response: {0}")]
    Malformed(String),
    /// The stored pair changed while the refresh was in flight.
    #[error("session replaced during refresh")]
    Superseded,
    #[error("refresh task aborted")]
    Aborted,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    refresh_timeout: Duration,
    flight: Mutex<Option<RefreshFlight>>,
    expiry_hooks: RwLock<Vec<ExpiryHook>>,
}

/// Cheap-to-clone handle; clones share one store and one refresh slot.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

impl SessionClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn TokenStore>, refresh_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                store,
                refresh_timeout,
                flight: Mutex::new(None),
                expiry_hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.inner.store
    }

    /// Register a callback run after a failed refresh has cleared the store.
    pub fn on_session_expired(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.expiry_hooks.write().unwrap_or_else(PoisonError::into_inner).push(Arc::new(hook));
    }

    /// Send `request`, refreshing the access token and resending once on 401.
    ///
    /// Non-401 responses come back unchanged, whatever their status.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Network`] when the transport produced no response
    /// - [`ApiError::Unauthenticated`] when the refresh failed or the resend
    ///   was also rejected
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if request.auth == RequestAuth::Anonymous {
            request.set_bearer(None);
            return Ok(self.inner.transport.send(&request).await?);
        }

        let sent_with = self.inner.store.get().map(|pair| pair.access);
        request.set_bearer(sent_with.clone());
        let response = self.inner.transport.send(&request).await?;
        if response.status != 401 {
            return Ok(response);
        }
        if request.retried() {
            return Err(ApiError::Unauthenticated);
        }

        request.mark_retried();
        let access = self.refresh_after_unauthorized(sent_with.as_deref()).await?;
        request.set_bearer(Some(access));

        let retry = self.inner.transport.send(&request).await?;
        if retry.status == 401 {
            tracing::info!(path = %request.path, "request rejected after token refresh");
            return Err(ApiError::Unauthenticated);
        }
        Ok(retry)
    }

    /// Send and decode a 2xx body, classifying any other status.
    ///
    /// # Errors
    ///
    /// Propagates [`SessionClient::send`] errors, the status classification of
    /// [`ApiResponse::error_for_status`], and [`ApiError::Decode`].
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.send(request).await?.json()
    }

    /// # Errors
    ///
    /// Same as [`SessionClient::send_json`].
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(ApiRequest::get(path)).await
    }

    /// Join (or start) the refresh for a request that was sent with `stale`.
    async fn refresh_after_unauthorized(&self, stale: Option<&str>) -> Result<String, ApiError> {
        let flight = {
            let mut slot = lock(&self.inner.flight);
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    match self.inner.store.get().map(|pair| pair.access) {
                        // A refresh already finished after this request went out.
                        Some(current) if stale != Some(current.as_str()) => return Ok(current),
                        // Tokens were cleared after this request went out; the session already ended.
                        None if stale.is_some() => return Err(ApiError::Unauthenticated),
                        _ => {}
                    }
                    let flight = spawn_refresh(Arc::clone(&self.inner));
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        match flight.await {
            Ok(access) => Ok(access),
            Err(RefreshFailure::Superseded) => {
                self.inner.store.get().map(|pair| pair.access).ok_or(ApiError::Unauthenticated)
            }
            Err(_) => Err(ApiError::Unauthenticated),
        }
    }
}

fn spawn_refresh(inner: Arc<ClientInner>) -> RefreshFlight {
    let task = tokio::spawn(async move {
        let outcome = run_refresh(&inner).await;
        *lock(&inner.flight) = None;
        outcome
    });
    async move { task.await.unwrap_or(Err(RefreshFailure::Aborted)) }.boxed().shared()
}

async fn run_refresh(inner: &ClientInner) -> Result<String, RefreshFailure> {
    let Some(pair) = inner.store.get() else {
        tracing::info!("no refresh token stored; session expired");
        inner.store.clear();
        fire_expired(inner);
        return Err(RefreshFailure::MissingToken);
    };

    let attempt = tokio::time::timeout(inner.refresh_timeout, request_refresh(inner, &pair.refresh)).await;
    let result = attempt.unwrap_or(Err(RefreshFailure::TimedOut(inner.refresh_timeout)));
    let still_current = inner.store.get().is_some_and(|current| current.refresh == pair.refresh);

    match result {
        Ok(_) if !still_current => {
            tracing::info!("session changed during token refresh; discarding result");
            Err(RefreshFailure::Superseded)
        }
        Ok(body) => {
            let rotated_refresh = body.refresh.filter(|token| !token.is_empty());
            let rotated = rotated_refresh.is_some();
            let refresh = rotated_refresh.unwrap_or(pair.refresh);
            inner.store.set(TokenPair::new(body.access.clone(), refresh));
            tracing::info!(rotated, "access token refreshed");
            Ok(body.access)
        }
        Err(failure) => {
            tracing::warn!(%failure, "token refresh failed");
            if still_current {
                inner.store.clear();
                fire_expired(inner);
            }
            Err(failure)
        }
    }
}

async fn request_refresh(inner: &ClientInner, refresh: &str) -> Result<RefreshResponse, RefreshFailure> {
    let request = ApiRequest::post(REFRESH_ENDPOINT)
        .anonymous()
        .with_body(serde_json::json!({ "refresh": refresh }));
    let response = inner
        .transport
        .send(&request)
        .await
        .map_err(|e| RefreshFailure::Transport(e.to_string()))?;
    if !response.is_success() {
        return Err(RefreshFailure::Rejected(response.status));
    }
    let body: RefreshResponse =
        serde_json::from_value(response.body).map_err(|e| RefreshFailure::Malformed(e.to_string()))?;
    if body.access.is_empty() {
        return Err(RefreshFailure::Malformed("empty access token".into()));
    }
    Ok(body)
}

fn fire_expired(inner: &ClientInner) {
    let hooks = inner.expiry_hooks.read().unwrap_or_else(PoisonError::into_inner).clone();
    for hook in hooks {
        hook();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
