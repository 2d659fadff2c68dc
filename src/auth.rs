//! Auth-session state for the current user.
//!
//! SYSTEM CONTEXT
//! ==============
//! Route guards and subscription tracking subscribe to the watch channel
//! exposed here; every transition is pushed to them. Identity is only ever
//! taken from the backend: a profile comes from the login/registration
//! response or a live `GET /auth/profile/`, never from local storage.

use std::sync::Arc;

use tokio::sync::watch;

use crate::api;
use crate::client::SessionClient;
use crate::error::ApiError;
use crate::types::{AuthResponse, ProfilePatch, RegisterForm, TokenPair, UserProfile};

/// Resolved identity.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum AuthState {
    /// Not yet checked. Only ever the initial state.
    #[default]
    Unknown,
    Anonymous,
    Authenticated(UserProfile),
}

impl AuthState {
    #[must_use]
    pub fn profile(&self) -> Option<&UserProfile> {
        match self {
            Self::Authenticated(profile) => Some(profile),
            Self::Unknown | Self::Anonymous => None,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// Outcome of [`AuthSession::register`].
#[derive(Clone, Debug, PartialEq)]
pub enum Registration {
    /// The backend issued tokens with the new account; the session is live.
    Authenticated(UserProfile),
    /// Account created without tokens; the caller must log in explicitly.
    Created { message: Option<String> },
}

#[derive(Clone)]
pub struct AuthSession {
    client: SessionClient,
    state: Arc<watch::Sender<AuthState>>,
}

impl AuthSession {
    /// Wrap `client`. A refresh failure inside the client resolves this
    /// session to `Anonymous`.
    #[must_use]
    pub fn new(client: SessionClient) -> Self {
        let state = Arc::new(watch::Sender::new(AuthState::Unknown));
        let hook_state = Arc::clone(&state);
        client.on_session_expired(move || transition(&hook_state, AuthState::Anonymous));
        Self { client, state }
    }

    #[must_use]
    pub fn client(&self) -> &SessionClient {
        &self.client
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Resolve `Unknown` into `Anonymous` or `Authenticated`.
    ///
    /// - no stored access token: `Anonymous` without touching the network
    /// - profile fetched: `Authenticated`
    /// - session rejected: tokens cleared, `Anonymous`
    /// - any other failure: `Anonymous`, tokens kept for a later retry
    pub async fn bootstrap(&self) -> AuthState {
        let has_access = self.client.store().get().is_some_and(|pair| !pair.access.is_empty());
        if !has_access {
            tracing::debug!("no stored session");
            transition(&self.state, AuthState::Anonymous);
            return self.state();
        }

        match api::fetch_profile(&self.client).await {
            Ok(profile) => transition(&self.state, AuthState::Authenticated(profile)),
            Err(ApiError::Unauthenticated) => {
                self.client.store().clear();
                transition(&self.state, AuthState::Anonymous);
            }
            Err(error) => {
                tracing::warn!(%error, code = error.error_code(), "profile fetch failed during bootstrap");
                transition(&self.state, AuthState::Anonymous);
            }
        }
        self.state()
    }

    /// Store a backend-issued pair and mark the session authenticated.
    /// Performs no validation of its own.
    pub fn login(&self, pair: TokenPair, profile: UserProfile) {
        self.client.store().set(pair);
        transition(&self.state, AuthState::Authenticated(profile));
    }

    /// `POST /auth/login/` then [`AuthSession::login`].
    ///
    /// # Errors
    ///
    /// Returns the backend's rejection, or [`ApiError::Decode`] when the
    /// response lacks a token pair.
    pub async fn login_with_credentials(&self, email: &str, password: &str) -> Result<UserProfile, ApiError> {
        let response = api::login(&self.client, email, password).await?;
        self.authenticate_from(response).await
    }

    /// Create an account. When the backend answers with tokens the new user
    /// is signed in immediately.
    ///
    /// # Errors
    ///
    /// Field-level problems come back as [`ApiError::Validation`].
    pub async fn register(&self, form: &RegisterForm) -> Result<Registration, ApiError> {
        let response = api::register(&self.client, form).await?;
        if response.tokens().is_none() {
            tracing::info!("account created; explicit login required");
            return Ok(Registration::Created { message: response.message });
        }
        self.authenticate_from(response).await.map(Registration::Authenticated)
    }

    /// Best-effort backend logout, then clear local state. Never fails.
    pub async fn logout(&self) {
        if let Some(pair) = self.client.store().get() {
            if let Err(error) = api::logout(&self.client, &pair.refresh).await {
                tracing::debug!(%error, "backend logout failed; clearing local session anyway");
            }
        }
        self.client.store().clear();
        transition(&self.state, AuthState::Anonymous);
    }

    /// Re-fetch the profile and replace the authenticated state with it.
    ///
    /// # Errors
    ///
    /// On [`ApiError::Unauthenticated`] the session is also cleared. Other
    /// failures leave the state untouched.
    pub async fn refresh_profile(&self) -> Result<UserProfile, ApiError> {
        match api::fetch_profile(&self.client).await {
            Ok(profile) => {
                transition(&self.state, AuthState::Authenticated(profile.clone()));
                Ok(profile)
            }
            Err(ApiError::Unauthenticated) => {
                self.client.store().clear();
                transition(&self.state, AuthState::Anonymous);
                Err(ApiError::Unauthenticated)
            }
            Err(error) => Err(error),
        }
    }

    /// `PATCH /auth/profile/` followed by an explicit re-fetch.
    ///
    /// # Errors
    ///
    /// Returns the update's validation failure or the re-fetch failure.
    pub async fn update_profile(&self, patch: &ProfilePatch) -> Result<UserProfile, ApiError> {
        if !patch.is_empty() {
            api::update_profile(&self.client, patch).await?;
        }
        self.refresh_profile().await
    }

    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] for a wrong old password or mismatch.
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        new_password_confirm: &str,
    ) -> Result<Option<String>, ApiError> {
        api::change_password(&self.client, old_password, new_password, new_password_confirm).await
    }

    async fn authenticate_from(&self, response: AuthResponse) -> Result<UserProfile, ApiError> {
        let Some(pair) = response.tokens() else {
            return Err(ApiError::Decode("auth response missing token pair".into()));
        };
        if let Some(profile) = response.user {
            self.login(pair, profile.clone());
            return Ok(profile);
        }

        self.client.store().set(pair);
        match api::fetch_profile(&self.client).await {
            Ok(profile) => {
                transition(&self.state, AuthState::Authenticated(profile.clone()));
                Ok(profile)
            }
            Err(error) => {
                self.client.store().clear();
                transition(&self.state, AuthState::Anonymous);
                Err(error)
            }
        }
    }
}

/// Publish `next` unless it equals the current state.
fn transition(state: &watch::Sender<AuthState>, next: AuthState) {
    state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        tracing::info!(from = state_name(current), to = state_name(&next), "auth state changed");
        *current = next;
        true
    });
}

fn state_name(state: &AuthState) -> &'static str {
    match state {
        AuthState::Unknown => "unknown",
        AuthState::Anonymous => "anonymous",
        AuthState::Authenticated(_) => "authenticated",
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
