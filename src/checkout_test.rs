use super::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use crate::api::{
    CANCEL_PENDING_ENDPOINT, CONFIRM_CHECKOUT_ENDPOINT, CREATE_CHECKOUT_ENDPOINT, SUBSCRIPTION_STATUS_ENDPOINT,
};
use crate::auth::AuthSession;
use crate::mock::{MockReply, MockTransport};
use crate::store::MemoryTokenStore;
use crate::transport::ApiRequest;
use crate::subscription::{SubscriptionState, SubscriptionView};
use crate::types::{TokenPair, UserProfile};

const FRONTEND: &str = "https://watch.example";

fn viewer() -> UserProfile {
    serde_json::from_value(json!({ "id": 1, "username": "viewer", "email": "v@example.com" })).unwrap()
}

fn active_status() -> Value {
    json!({ "is_active": true, "plan": { "id": 2, "name": "Premium", "price": "14.99" } })
}

fn setup_signed_in(
    handler: impl Fn(&ApiRequest) -> MockReply + Send + Sync + 'static,
) -> (CheckoutReconciler, AuthSession, SubscriptionStatus, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new(handler));
    let client = SessionClient::new(transport.clone(), Arc::new(MemoryTokenStore::new()), Duration::from_secs(1));
    let auth = AuthSession::new(client.clone());
    let subscription = SubscriptionStatus::new(&auth);
    let reconciler = CheckoutReconciler::new(client, subscription.clone(), format!("{FRONTEND}/"));
    (reconciler, auth, subscription, transport)
}

fn setup(
    handler: impl Fn(&ApiRequest) -> MockReply + Send + Sync + 'static,
) -> (CheckoutReconciler, SubscriptionStatus, Arc<MockTransport>) {
    let (reconciler, auth, subscription, transport) = setup_signed_in(handler);
    auth.login(TokenPair::new("a1", "r1"), viewer());
    (reconciler, subscription, transport)
}

fn at(path_and_query: &str) -> MemoryHistory {
    MemoryHistory::new(Url::parse(&format!("{FRONTEND}{path_and_query}")).unwrap())
}

/// History whose replace never takes effect, as when a view remounts
/// before navigation lands.
struct StuckHistory(Url);

impl History for StuckHistory {
    fn location(&self) -> Url {
        self.0.clone()
    }

    fn replace(&self, _url: Url) {}
}

// =============================================================================
// return URL parsing
// =============================================================================

#[test]
fn context_reads_flags() {
    let url = Url::parse("https://w.example/subscribe?success=1&session_id=cs_1").unwrap();
    assert_eq!(
        CheckoutContext::from_url(&url),
        Some(CheckoutContext { success: true, session_id: Some("cs_1".into()), canceled: false })
    );
    let plain = Url::parse("https://w.example/subscribe?tab=plans").unwrap();
    assert_eq!(CheckoutContext::from_url(&plain), None);
}

#[test]
fn unsubstituted_placeholder_is_not_a_session_id() {
    let url = Url::parse("https://w.example/subscribe?success=1&session_id={CHECKOUT_SESSION_ID}").unwrap();
    assert_eq!(CheckoutContext::from_url(&url).and_then(|c| c.session_id), None);
}

#[test]
fn strip_keeps_unrelated_params() {
    let url = Url::parse("https://w.example/subscribe?success=1&tab=plans&session_id=x").unwrap();
    assert_eq!(strip_checkout_params(&url).as_str(), "https://w.example/subscribe?tab=plans");

    let only = Url::parse("https://w.example/subscribe?canceled=1").unwrap();
    assert_eq!(strip_checkout_params(&only).as_str(), "https://w.example/subscribe");
}

// =============================================================================
// reconcile
// =============================================================================

#[tokio::test]
async fn success_confirms_activates_and_strips() {
    let (reconciler, subscription, transport) = setup(|req| match req.path.as_str() {
        SUBSCRIPTION_STATUS_ENDPOINT => MockReply::json(200, active_status()),
        _ => MockReply::json(200, json!({ "detail": "ok" })),
    });
    let history = at("/subscribe?success=1&session_id=abc");

    let outcome = reconciler.reconcile(&history).await;
    assert!(matches!(outcome, CheckoutOutcome::Activated { ref session_id } if session_id == "abc"));
    assert_eq!(transport.calls()[0].body, Some(json!({ "session_id": "abc" })));
    assert!(subscription.is_active());

    let location = history.location();
    assert_eq!(location.as_str(), format!("{FRONTEND}/subscribe"));
    assert!(CheckoutContext::from_url(&location).is_none());
}

#[tokio::test]
async fn confirmed_checkout_reloads_status_with_plan() {
    let (reconciler, subscription, transport) = setup(|req| match req.path.as_str() {
        SUBSCRIPTION_STATUS_ENDPOINT => MockReply::json(200, active_status()),
        _ => MockReply::json(200, json!({ "detail": "ok" })),
    });

    reconciler.reconcile(&at("/subscribe?success=1&session_id=abc")).await;

    assert_eq!(transport.count(SUBSCRIPTION_STATUS_ENDPOINT), 1);
    let SubscriptionView::Ready(SubscriptionState { active, plan }) = subscription.view() else {
        panic!("subscription still loading");
    };
    assert!(active);
    assert_eq!(plan.map(|plan| plan.id()), Some(2));
}

#[tokio::test]
async fn status_load_started_before_confirm_cannot_deactivate() {
    let confirmed = Arc::new(AtomicBool::new(false));
    let confirmed_in = confirmed.clone();
    let (reconciler, auth, subscription, transport) = setup_signed_in(move |req| match req.path.as_str() {
        CONFIRM_CHECKOUT_ENDPOINT => {
            confirmed_in.store(true, Ordering::SeqCst);
            MockReply::json(200, json!({ "detail": "ok" }))
        }
        SUBSCRIPTION_STATUS_ENDPOINT if confirmed_in.load(Ordering::SeqCst) => {
            MockReply::json(200, active_status()).delayed(Duration::from_millis(80))
        }
        _ => MockReply::json(200, json!({ "is_active": false, "plan": null })).delayed(Duration::from_millis(80)),
    });
    let follower = subscription.follow();

    // Sign-in kicks off a status load; the payment return lands while it is in flight.
    auth.login(TokenPair::new("a1", "r1"), viewer());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.count(SUBSCRIPTION_STATUS_ENDPOINT), 1);

    let outcome = reconciler.reconcile(&at("/subscribe?success=1&session_id=abc")).await;
    assert!(matches!(outcome, CheckoutOutcome::Activated { .. }));
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(confirmed.load(Ordering::SeqCst));
    assert_eq!(transport.count(SUBSCRIPTION_STATUS_ENDPOINT), 2);
    assert!(subscription.is_active(), "paid user ended inactive: {:?}", subscription.view());
    follower.abort();
}

#[tokio::test]
async fn remount_after_strip_is_noop() {
    let (reconciler, _, transport) = setup(|_| MockReply::json(200, json!({})));
    let history = at("/subscribe?success=1&session_id=abc");

    reconciler.reconcile(&history).await;
    let again = reconciler.reconcile(&history).await;
    assert!(matches!(again, CheckoutOutcome::NoReturn));
    assert_eq!(transport.count(CONFIRM_CHECKOUT_ENDPOINT), 1);
}

#[tokio::test]
async fn remount_on_same_url_confirms_once() {
    let (reconciler, _, transport) = setup(|_| MockReply::json(200, json!({})));
    let history = StuckHistory(Url::parse(&format!("{FRONTEND}/subscribe?success=1&session_id=abc")).unwrap());

    reconciler.reconcile(&history).await;
    let again = reconciler.reconcile(&history).await;
    assert!(matches!(again, CheckoutOutcome::AlreadyProcessed { .. }));
    assert_eq!(again.notice(), None);
    assert_eq!(transport.count(CONFIRM_CHECKOUT_ENDPOINT), 1);
}

#[tokio::test]
async fn next_return_with_new_session_is_confirmed() {
    let (reconciler, _, transport) = setup(|_| MockReply::json(200, json!({})));
    let stuck = StuckHistory(Url::parse(&format!("{FRONTEND}/subscribe?success=1&session_id=abc")).unwrap());
    reconciler.reconcile(&stuck).await;

    let outcome = reconciler.reconcile(&at("/subscribe?success=1&session_id=def")).await;
    assert!(matches!(outcome, CheckoutOutcome::Activated { ref session_id } if session_id == "def"));
    let again = reconciler.reconcile(&at("/subscribe?success=1&session_id=def")).await;
    assert!(matches!(again, CheckoutOutcome::AlreadyProcessed { .. }));
    assert_eq!(transport.count(CONFIRM_CHECKOUT_ENDPOINT), 2);
}

#[tokio::test]
async fn confirm_failure_is_retryable_and_still_strips() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in = attempts.clone();
    let (reconciler, subscription, _) = setup(move |req| match req.path.as_str() {
        SUBSCRIPTION_STATUS_ENDPOINT => MockReply::json(200, active_status()),
        _ if attempts_in.fetch_add(1, Ordering::SeqCst) == 0 => {
            MockReply::json(502, json!({ "detail": "provider unavailable" }))
        }
        _ => MockReply::json(200, json!({ "detail": "ok" })),
    });
    let history = at("/subscribe?success=1&session_id=abc");

    let outcome = reconciler.reconcile(&history).await;
    let CheckoutOutcome::ConfirmFailed { session_id, error } = outcome else {
        panic!("expected confirm failure");
    };
    assert!(error.retryable());
    assert!(!subscription.is_active());
    assert!(history.location().query().is_none());

    let retried = reconciler.retry_confirm(&session_id).await;
    assert!(matches!(retried, CheckoutOutcome::Activated { .. }));
    assert!(subscription.is_active());
}

#[tokio::test]
async fn cancel_return_makes_no_call() {
    let (reconciler, subscription, transport) = setup(|_| MockReply::status(500));
    let history = at("/subscribe?canceled=1");

    let outcome = reconciler.reconcile(&history).await;
    assert!(matches!(outcome, CheckoutOutcome::Canceled));
    assert_eq!(outcome.notice(), Some("Payment canceled"));
    assert_eq!(transport.total(), 0);
    assert!(!subscription.is_active());
    assert!(history.location().query().is_none());
}

#[tokio::test]
async fn plain_location_is_untouched() {
    let (reconciler, _, transport) = setup(|_| MockReply::status(500));
    let history = at("/subscribe?tab=plans");

    assert!(matches!(reconciler.reconcile(&history).await, CheckoutOutcome::NoReturn));
    assert_eq!(history.location().query(), Some("tab=plans"));
    assert_eq!(transport.total(), 0);
}

#[tokio::test]
async fn success_without_session_is_incomplete() {
    let (reconciler, _, transport) = setup(|_| MockReply::status(200));
    let history = at("/subscribe?success=1");

    assert!(matches!(reconciler.reconcile(&history).await, CheckoutOutcome::Incomplete));
    assert_eq!(transport.total(), 0);
    assert!(history.location().query().is_none());
}

// =============================================================================
// start_checkout
// =============================================================================

#[tokio::test]
async fn start_builds_return_urls() {
    let (reconciler, _, transport) = setup(|_| {
        MockReply::json(200, json!({ "checkout_url": "https://pay.example/cs_1", "session_id": "cs_1" }))
    });

    let start = reconciler.start_checkout(3).await.unwrap();
    assert_eq!(
        start,
        CheckoutStart::Redirect { url: "https://pay.example/cs_1".into(), session_id: Some("cs_1".into()) }
    );
    assert_eq!(
        transport.calls()[0].body,
        Some(json!({
            "subscription_plan_id": 3,
            "success_url": "https://watch.example/subscribe?success=1&session_id={CHECKOUT_SESSION_ID}",
            "cancel_url": "https://watch.example/subscribe?canceled=1",
        }))
    );
}

#[tokio::test]
async fn start_rejects_invalid_plan_offline() {
    let (reconciler, _, transport) = setup(|_| MockReply::status(200));
    assert!(matches!(reconciler.start_checkout(0).await, Err(CheckoutError::InvalidPlan(0))));
    assert_eq!(transport.total(), 0);
}

#[tokio::test]
async fn start_without_url_is_an_error() {
    let (reconciler, _, _) = setup(|_| MockReply::json(200, json!({ "session_id": "cs_1" })));
    assert!(matches!(reconciler.start_checkout(1).await, Err(CheckoutError::MissingRedirect)));
}

#[tokio::test]
async fn pending_payment_surfaces_resume_link() {
    let (reconciler, _, _) = setup(|_| {
        MockReply::json(
            409,
            json!({ "detail": "Pending payment exists", "checkout_url": "https://pay.example/cs_0", "session_id": "cs_0" }),
        )
    });

    let start = reconciler.start_checkout(1).await.unwrap();
    assert_eq!(
        start,
        CheckoutStart::PendingConflict {
            resume_url: Some("https://pay.example/cs_0".into()),
            session_id: Some("cs_0".into()),
            message: "Pending payment exists".into(),
        }
    );
}

#[tokio::test]
async fn replacing_pending_cancels_then_starts_once() {
    let creates = Arc::new(AtomicUsize::new(0));
    let creates_in = creates.clone();
    let (reconciler, _, transport) = setup(move |req| match req.path.as_str() {
        CANCEL_PENDING_ENDPOINT => MockReply::status(200),
        _ if creates_in.fetch_add(1, Ordering::SeqCst) == 0 => MockReply::json(409, json!({ "detail": "pending" })),
        _ => MockReply::json(200, json!({ "checkout_url": "https://pay.example/cs_2" })),
    });

    let start = reconciler.start_checkout_replacing_pending(1).await.unwrap();
    assert!(matches!(start, CheckoutStart::Redirect { ref url, .. } if url == "https://pay.example/cs_2"));
    assert_eq!(transport.count(CANCEL_PENDING_ENDPOINT), 1);
    assert_eq!(transport.count(CREATE_CHECKOUT_ENDPOINT), 2);
}

#[tokio::test]
async fn replacing_pending_never_loops() {
    let (reconciler, _, transport) = setup(|req| match req.path.as_str() {
        CANCEL_PENDING_ENDPOINT => MockReply::status(200),
        _ => MockReply::json(409, json!({ "detail": "still pending" })),
    });

    let start = reconciler.start_checkout_replacing_pending(1).await.unwrap();
    assert!(matches!(start, CheckoutStart::PendingConflict { resume_url: None, .. }));
    assert_eq!(transport.count(CREATE_CHECKOUT_ENDPOINT), 2);
}
