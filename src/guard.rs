//! Navigation gating on auth and subscription state.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every route component applies the same decision here instead of
//! re-deriving redirects locally. Decisions are pure: the caller passes in
//! the current auth and subscription snapshots.
//!
//! | state \ class               | GuestOnly         | RequireAuth   | RequireSubscription |
//! |-----------------------------|-------------------|---------------|---------------------|
//! | Unknown                     | defer             | defer         | defer               |
//! | Anonymous                   | allow             | to auth       | to auth             |
//! | Authenticated, inactive     | to subscribe      | allow         | to subscribe        |
//! | Authenticated, active       | to browse         | allow         | allow               |
//!
//! `Public` always allows. While an authenticated user's subscription is
//! still loading, classes whose outcome depends on it defer.

use url::Url;
use url::form_urlencoded;

use crate::auth::AuthState;
use crate::subscription::SubscriptionView;

/// Query parameter carrying the path to return to after signing in.
pub const RESUME_PARAM: &str = "from";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    /// Landing and sign-in pages; signed-in users are sent onward.
    GuestOnly,
    RequireAuth,
    RequireSubscription,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub to: String,
    /// Path the user was heading to, remembered for after sign-in.
    pub resume: Option<String>,
}

impl Redirect {
    fn to(path: &str) -> Self {
        Self { to: path.to_owned(), resume: None }
    }

    /// Target with the resume path encoded as `?from=`.
    #[must_use]
    pub fn location(&self) -> String {
        match &self.resume {
            Some(resume) => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair(RESUME_PARAM, resume)
                    .finish();
                format!("{}?{query}", self.to)
            }
            None => self.to.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// State not resolved yet; render a placeholder and ask again.
    Defer,
    Redirect(Redirect),
}

/// Redirect targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardRoutes {
    pub auth: String,
    pub browse: String,
    pub subscribe: String,
}

impl Default for GuardRoutes {
    fn default() -> Self {
        Self { auth: "/auth".into(), browse: "/browse".into(), subscribe: "/subscribe".into() }
    }
}

/// Default route table, matched on whole path segments.
const ROUTE_TABLE: [(&str, RouteClass); 5] = [
    ("/auth", RouteClass::GuestOnly),
    ("/subscribe", RouteClass::RequireAuth),
    ("/account", RouteClass::RequireAuth),
    ("/browse", RouteClass::RequireSubscription),
    ("/watch", RouteClass::RequireSubscription),
];

/// Decide navigation to `path` with the default redirect targets.
#[must_use]
pub fn decide(auth: &AuthState, subscription: &SubscriptionView, class: RouteClass, path: &str) -> GuardDecision {
    decide_with(&GuardRoutes::default(), auth, subscription, class, path)
}

#[must_use]
pub fn decide_with(
    routes: &GuardRoutes,
    auth: &AuthState,
    subscription: &SubscriptionView,
    class: RouteClass,
    path: &str,
) -> GuardDecision {
    if class == RouteClass::Public {
        return GuardDecision::Allow;
    }
    match auth {
        AuthState::Unknown => GuardDecision::Defer,
        AuthState::Anonymous => match class {
            RouteClass::GuestOnly | RouteClass::Public => GuardDecision::Allow,
            RouteClass::RequireAuth | RouteClass::RequireSubscription => {
                GuardDecision::Redirect(Redirect { to: routes.auth.clone(), resume: sanitize_resume(path) })
            }
        },
        AuthState::Authenticated(_) => {
            if class == RouteClass::RequireAuth {
                return GuardDecision::Allow;
            }
            let SubscriptionView::Ready(state) = subscription else {
                return GuardDecision::Defer;
            };
            match (class, state.active) {
                (RouteClass::GuestOnly, true) => GuardDecision::Redirect(Redirect::to(&routes.browse)),
                (RouteClass::GuestOnly | RouteClass::RequireSubscription, false) => {
                    GuardDecision::Redirect(Redirect::to(&routes.subscribe))
                }
                _ => GuardDecision::Allow,
            }
        }
    }
}

/// Classify `path` (query and fragment ignored) against the default table.
#[must_use]
pub fn classify(path: &str) -> RouteClass {
    let path = path_only(path);
    if path.is_empty() || path == "/" {
        return RouteClass::GuestOnly;
    }
    ROUTE_TABLE
        .iter()
        .find(|(prefix, _)| path == *prefix || path.strip_prefix(*prefix).is_some_and(|rest| rest.starts_with('/')))
        .map_or(RouteClass::Public, |(_, class)| *class)
}

/// Classify and decide in one step.
#[must_use]
pub fn guard(auth: &AuthState, subscription: &SubscriptionView, path: &str) -> GuardDecision {
    decide(auth, subscription, classify(path), path)
}

/// Where to land right after sign-in: the remembered path when subscribed,
/// otherwise the subscribe page.
#[must_use]
pub fn post_auth_destination(resume: Option<&str>, active: bool) -> String {
    let routes = GuardRoutes::default();
    if !active {
        return routes.subscribe;
    }
    resume
        .and_then(sanitize_resume)
        .filter(|path| classify(path) != RouteClass::GuestOnly)
        .unwrap_or(routes.browse)
}

/// Read the remembered path back out of a sign-in page URL.
#[must_use]
pub fn resume_from(location: &Url) -> Option<String> {
    location
        .query_pairs()
        .find(|(key, _)| key == RESUME_PARAM)
        .and_then(|(_, value)| sanitize_resume(&value))
}

/// Only same-origin absolute paths are remembered.
fn sanitize_resume(path: &str) -> Option<String> {
    let trimmed = path.trim();
    let same_origin = trimmed.starts_with('/') && !trimmed.starts_with("//") && !trimmed.contains('\\');
    (same_origin && path_only(trimmed) != "/").then(|| trimmed.to_owned())
}

fn path_only(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = &path[..end];
    if path.len() > 1 { path.trim_end_matches('/') } else { path }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
