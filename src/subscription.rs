//! Subscription status derived from the backend.
//!
//! SYSTEM CONTEXT
//! ==============
//! The paywall reads this through the route guard. The client never
//! decides on its own that a subscription is active, apart from the
//! optimistic flip right after a confirmed checkout. Anything unknown or
//! failed reads as inactive.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api;
use crate::auth::{AuthSession, AuthState};
use crate::client::SessionClient;
use crate::error::ApiError;
use crate::types::{Plan, PlanDescriptor};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionState {
    pub active: bool,
    pub plan: Option<PlanDescriptor>,
}

impl SubscriptionState {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// What observers see: still loading, or a resolved state.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum SubscriptionView {
    #[default]
    Loading,
    Ready(SubscriptionState),
}

impl SubscriptionView {
    /// Fail-closed: loading counts as inactive.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Ready(state) if state.active)
    }
}

#[derive(Clone)]
pub struct SubscriptionStatus {
    client: SessionClient,
    auth: watch::Receiver<AuthState>,
    state: Arc<watch::Sender<SubscriptionView>>,
    /// Bumped by every refresh start and every optimistic write. A refresh
    /// publishes only if it is still the latest writer when it lands.
    generation: Arc<AtomicU64>,
}

impl SubscriptionStatus {
    #[must_use]
    pub fn new(auth: &AuthSession) -> Self {
        Self {
            client: auth.client().clone(),
            auth: auth.subscribe(),
            state: Arc::new(watch::Sender::new(SubscriptionView::Loading)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn view(&self) -> SubscriptionView {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.borrow().is_active()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SubscriptionView> {
        self.state.subscribe()
    }

    /// Re-derive the state from `GET /subscribe/status/`.
    ///
    /// Without an authenticated user this publishes inactive and makes no
    /// call. Any failure also publishes inactive. A result overtaken by a
    /// later refresh or by [`SubscriptionStatus::mark_active`] is dropped and
    /// the newer state returned instead.
    pub async fn refresh(&self) -> SubscriptionState {
        let generation = self.bump();
        let Some(user_id) = self.current_user() else {
            self.publish(SubscriptionView::Ready(SubscriptionState::inactive()));
            return SubscriptionState::inactive();
        };

        let next = match api::subscription_status(&self.client).await {
            Ok(status) => SubscriptionState { active: status.active(), plan: status.plan() },
            Err(error) => {
                tracing::warn!(%error, code = error.error_code(), "subscription status unavailable; treating as inactive");
                SubscriptionState::inactive()
            }
        };

        // The user may have changed while the call was in flight.
        if self.current_user() != Some(user_id) {
            tracing::debug!(user_id, "discarding subscription status for previous user");
            return SubscriptionState::inactive();
        }
        if !self.publish_if_current(generation, &next) {
            tracing::debug!(user_id, "discarding subscription status overtaken by a newer write");
            return match self.view() {
                SubscriptionView::Ready(state) => state,
                SubscriptionView::Loading => SubscriptionState::inactive(),
            };
        }
        tracing::info!(user_id, active = next.active, "subscription status loaded");
        next
    }

    /// Optimistically mark the subscription active after a confirmed checkout.
    pub fn mark_active(&self) {
        self.state.send_if_modified(|current| {
            self.bump();
            let plan = match current {
                SubscriptionView::Ready(state) => state.plan.clone(),
                SubscriptionView::Loading => None,
            };
            let next = SubscriptionView::Ready(SubscriptionState { active: true, plan });
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// # Errors
    ///
    /// Returns any failure from `GET /subscribe/plans/`.
    pub async fn plans(&self) -> Result<Vec<Plan>, ApiError> {
        api::list_plans(&self.client).await
    }

    /// Stop auto-renewal, then reload the status from the backend.
    ///
    /// # Errors
    ///
    /// Returns the cancel call's failure; the status is not reloaded then.
    pub async fn cancel_at_period_end(&self) -> Result<SubscriptionState, ApiError> {
        api::cancel_subscription(&self.client).await?;
        Ok(self.refresh().await)
    }

    /// Track auth transitions: loading while unknown, inactive when
    /// anonymous, and a fresh status load on every sign-in or user switch.
    ///
    /// Runs until aborted or the auth session is dropped.
    #[must_use]
    pub fn follow(&self) -> JoinHandle<()> {
        let this = self.clone();
        let mut auth = self.auth.clone();
        tokio::spawn(async move {
            let mut loaded_for: Option<i64> = None;
            loop {
                let current = auth.borrow_and_update().clone();
                match current {
                    AuthState::Unknown => {
                        loaded_for = None;
                        this.publish(SubscriptionView::Loading);
                    }
                    AuthState::Anonymous => {
                        loaded_for = None;
                        this.publish(SubscriptionView::Ready(SubscriptionState::inactive()));
                    }
                    AuthState::Authenticated(profile) => {
                        if loaded_for != Some(profile.id) {
                            loaded_for = Some(profile.id);
                            this.publish(SubscriptionView::Loading);
                            this.refresh().await;
                        }
                    }
                }
                if auth.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_user(&self) -> Option<i64> {
        self.auth.borrow().profile().map(|profile| profile.id)
    }

    /// Publish `next` unless another writer moved the generation past
    /// `generation`. The check runs under the channel lock.
    fn publish_if_current(&self, generation: u64, next: &SubscriptionState) -> bool {
        let mut current_generation = true;
        self.state.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation {
                current_generation = false;
                return false;
            }
            let next = SubscriptionView::Ready(next.clone());
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        current_generation
    }

    fn publish(&self, next: SubscriptionView) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

#[cfg(test)]
#[path = "subscription_test.rs"]
mod tests;
