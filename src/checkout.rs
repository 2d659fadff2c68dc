//! Payment-provider redirect handling.
//!
//! DESIGN
//! ======
//! Starting a checkout asks the backend for a hosted payment URL whose
//! success and cancel targets point back at `/subscribe` with query flags.
//! On return, [`CheckoutReconciler::reconcile`] reads those flags once,
//! replaces the location with a clean one so a reload cannot replay them,
//! and confirms or reports the outcome.
//!
//! Each session id is confirmed at most once per reconciler even if the
//! location could not be replaced (a view remounting on the same URL).

use std::sync::{Mutex, PoisonError, RwLock};

use url::Url;

use crate::api;
use crate::client::SessionClient;
use crate::error::ApiError;
use crate::subscription::SubscriptionStatus;
use crate::types::{CheckoutSessionRequest, CheckoutSessionResponse};

/// Literal the payment provider substitutes with the real session id.
pub const CHECKOUT_SESSION_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

const SUBSCRIBE_PATH: &str = "/subscribe";
const SUCCESS_PARAM: &str = "success";
const SESSION_PARAM: &str = "session_id";
const CANCELED_PARAM: &str = "canceled";

// =============================================================================
// RETURN URL
// =============================================================================

/// Flags carried in the payment return URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutContext {
    pub success: bool,
    pub session_id: Option<String>,
    pub canceled: bool,
}

impl CheckoutContext {
    /// Read the flags from `url`; `None` when it carries none of them.
    #[must_use]
    pub fn from_url(url: &Url) -> Option<Self> {
        let mut context = Self { success: false, session_id: None, canceled: false };
        let mut seen = false;
        for (key, value) in url.query_pairs() {
            match &*key {
                SUCCESS_PARAM => {
                    seen = true;
                    context.success = value == "1";
                }
                CANCELED_PARAM => {
                    seen = true;
                    context.canceled = value == "1";
                }
                SESSION_PARAM => {
                    seen = true;
                    let id = value.trim();
                    if !id.is_empty() && id != CHECKOUT_SESSION_PLACEHOLDER {
                        context.session_id = Some(id.to_owned());
                    }
                }
                _ => {}
            }
        }
        seen.then_some(context)
    }
}

/// `url` without the checkout flags; unrelated query pairs are kept.
#[must_use]
pub fn strip_checkout_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| ![SUCCESS_PARAM, SESSION_PARAM, CANCELED_PARAM].contains(&&**key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

/// Current location plus replace-without-new-entry navigation.
pub trait History: Send + Sync {
    fn location(&self) -> Url;
    fn replace(&self, url: Url);
}

/// History held in memory; used by the CLI and tests.
#[derive(Debug)]
pub struct MemoryHistory {
    current: RwLock<Url>,
}

impl MemoryHistory {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self { current: RwLock::new(url) }
    }
}

impl History for MemoryHistory {
    fn location(&self) -> Url {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn replace(&self, url: Url) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = url;
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

#[derive(Debug, Clone)]
pub enum CheckoutOutcome {
    /// The location carried no checkout flags.
    NoReturn,
    Activated { session_id: String },
    /// Confirmation failed; [`CheckoutReconciler::retry_confirm`] may succeed.
    ConfirmFailed { session_id: String, error: ApiError },
    AlreadyProcessed { session_id: String },
    Canceled,
    /// Flags present but unusable, such as success without a session id.
    Incomplete,
}

impl CheckoutOutcome {
    /// User-facing message for the outcome, if any.
    #[must_use]
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            Self::Activated { .. } => Some("Subscription activated"),
            Self::ConfirmFailed { .. } => Some("Could not confirm the payment. Try again."),
            Self::Canceled => Some("Payment canceled"),
            Self::Incomplete => Some("Payment return was incomplete"),
            Self::NoReturn | Self::AlreadyProcessed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutStart {
    /// Send the browser here to pay.
    Redirect { url: String, session_id: Option<String> },
    /// A payment is already pending. Resume it via `resume_url` when
    /// present, or cancel it and start again.
    PendingConflict { resume_url: Option<String>, session_id: Option<String>, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("invalid plan id: {0}")]
    InvalidPlan(i64),
    #[error("checkout session response carried no payment URL")]
    MissingRedirect,
    #[error(transparent)]
    Api(#[from] ApiError),
}

// =============================================================================
// RECONCILER
// =============================================================================

pub struct CheckoutReconciler {
    client: SessionClient,
    subscription: SubscriptionStatus,
    frontend_url: String,
    /// Last session id handed to confirm; one return URL is live at a time.
    claimed: Mutex<Option<String>>,
}

impl CheckoutReconciler {
    #[must_use]
    pub fn new(client: SessionClient, subscription: SubscriptionStatus, frontend_url: impl Into<String>) -> Self {
        Self {
            client,
            subscription,
            frontend_url: frontend_url.into().trim_end_matches('/').to_owned(),
            claimed: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn success_url(&self) -> String {
        format!(
            "{}{SUBSCRIBE_PATH}?{SUCCESS_PARAM}=1&{SESSION_PARAM}={}",
            self.frontend_url, CHECKOUT_SESSION_PLACEHOLDER
        )
    }

    #[must_use]
    pub fn cancel_url(&self) -> String {
        format!("{}{SUBSCRIBE_PATH}?{CANCELED_PARAM}=1", self.frontend_url)
    }

    /// Consume checkout flags from the current location.
    pub async fn reconcile(&self, history: &dyn History) -> CheckoutOutcome {
        let location = history.location();
        let Some(context) = CheckoutContext::from_url(&location) else {
            return CheckoutOutcome::NoReturn;
        };
        history.replace(strip_checkout_params(&location));

        if context.success {
            let Some(session_id) = context.session_id else {
                tracing::warn!("checkout success without session id");
                return CheckoutOutcome::Incomplete;
            };
            if !self.claim(&session_id) {
                tracing::debug!(%session_id, "checkout session already processed");
                return CheckoutOutcome::AlreadyProcessed { session_id };
            }
            return self.confirm(session_id).await;
        }
        if context.canceled {
            tracing::info!("checkout canceled by user");
            return CheckoutOutcome::Canceled;
        }
        CheckoutOutcome::Incomplete
    }

    /// Confirm `session_id` again after a failed attempt.
    pub async fn retry_confirm(&self, session_id: &str) -> CheckoutOutcome {
        self.claim(session_id);
        self.confirm(session_id.to_owned()).await
    }

    /// Ask the backend for a hosted checkout for `plan_id`.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::InvalidPlan`] for a non-positive id, with no call made
    /// - [`CheckoutError::MissingRedirect`] when the backend sent no URL
    /// - [`CheckoutError::Api`] for any other backend failure
    pub async fn start_checkout(&self, plan_id: i64) -> Result<CheckoutStart, CheckoutError> {
        if plan_id <= 0 {
            return Err(CheckoutError::InvalidPlan(plan_id));
        }
        let request = CheckoutSessionRequest {
            subscription_plan_id: plan_id,
            success_url: self.success_url(),
            cancel_url: self.cancel_url(),
        };
        match api::create_checkout_session(&self.client, &request).await {
            Ok(session) => {
                let url = session.redirect_url().ok_or(CheckoutError::MissingRedirect)?.to_owned();
                tracing::info!(plan_id, "checkout session created");
                Ok(CheckoutStart::Redirect { url, session_id: session.session_id })
            }
            Err(ApiError::Conflict { message, body }) => {
                let pending: CheckoutSessionResponse = serde_json::from_value(body).unwrap_or_default();
                tracing::info!(plan_id, resumable = pending.redirect_url().is_some(), "pending payment exists");
                Ok(CheckoutStart::PendingConflict {
                    resume_url: pending.redirect_url().map(str::to_owned),
                    session_id: pending.session_id,
                    message,
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Cancel any pending payment, then start once more. A second conflict
    /// is returned as is.
    ///
    /// # Errors
    ///
    /// Same as [`CheckoutReconciler::start_checkout`], plus the cancel failure.
    pub async fn start_checkout_replacing_pending(&self, plan_id: i64) -> Result<CheckoutStart, CheckoutError> {
        match self.start_checkout(plan_id).await? {
            CheckoutStart::PendingConflict { .. } => {
                api::cancel_pending_payment(&self.client).await?;
                self.start_checkout(plan_id).await
            }
            start @ CheckoutStart::Redirect { .. } => Ok(start),
        }
    }

    /// # Errors
    ///
    /// Returns any failure from `POST /payment/cancel-pending/`.
    pub async fn cancel_pending(&self) -> Result<(), ApiError> {
        api::cancel_pending_payment(&self.client).await
    }

    async fn confirm(&self, session_id: String) -> CheckoutOutcome {
        match api::confirm_checkout(&self.client, &session_id).await {
            Ok(_) => {
                self.subscription.mark_active();
                tracing::info!(%session_id, "checkout confirmed");
                // Settle the optimistic flag and pick up the purchased plan.
                self.subscription.refresh().await;
                CheckoutOutcome::Activated { session_id }
            }
            Err(error) => {
                tracing::warn!(%session_id, %error, "checkout confirmation failed");
                CheckoutOutcome::ConfirmFailed { session_id, error }
            }
        }
    }

    /// Record `session_id` as the live return; false if it already was.
    fn claim(&self, session_id: &str) -> bool {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if claimed.as_deref() == Some(session_id) {
            return false;
        }
        *claimed = Some(session_id.to_owned());
        true
    }
}

#[cfg(test)]
#[path = "checkout_test.rs"]
mod tests;
