//! Wire DTOs for the accounts, subscription and payment endpoints.
//!
//! DESIGN
//! ======
//! Response types are lenient: optional fields default, numbers that the
//! backend may render as decimal strings are accepted either way, and the
//! plan reference in a status payload may be a bare id or a nested object.
//! Request types are strict and serialize only what the backend expects.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// TOKENS
// =============================================================================

/// Access/refresh credential pair issued by the backend.
///
/// Both halves are always present; a half-populated pair is not representable
/// and [`TokenPair::from_parts`] treats it as absent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    #[must_use]
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self { access: access.into(), refresh: refresh.into() }
    }

    /// Build a pair only when both tokens are present and non-empty.
    #[must_use]
    pub fn from_parts(access: Option<String>, refresh: Option<String>) -> Option<Self> {
        match (access, refresh) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Some(Self { access, refresh })
            }
            _ => None,
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Body of `POST /auth/token/refresh/`.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    /// Present only when the backend rotates refresh tokens.
    #[serde(default)]
    pub refresh: Option<String>,
}

// =============================================================================
// ACCOUNTS
// =============================================================================

/// Account profile as returned by `GET /auth/profile/`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "deserialize_i64_from_number")]
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl UserProfile {
    /// Full name when set, otherwise the username.
    #[must_use]
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full = full.trim();
        if full.is_empty() { self.username.clone() } else { full.to_owned() }
    }
}

/// Body returned by login and registration.
#[derive(Debug, Default, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AuthResponse {
    /// The issued token pair, if the response carried both halves.
    #[must_use]
    pub fn tokens(&self) -> Option<TokenPair> {
        TokenPair::from_parts(self.access.clone(), self.refresh.clone())
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Registration form.
#[derive(Clone, Debug, Serialize)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Partial profile update for `PATCH /auth/profile/`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl ProfilePatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.first_name.is_none() && self.last_name.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordRequest<'a> {
    pub old_password: &'a str,
    pub new_password: &'a str,
    pub new_password_confirm: &'a str,
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// A purchasable subscription plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(deserialize_with = "deserialize_i64_from_number")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    /// Decimal price as rendered by the backend (`"9.99"`).
    #[serde(default, deserialize_with = "deserialize_decimal_string")]
    pub price: Option<String>,
    #[serde(default)]
    pub duration_days: Option<u32>,
    #[serde(default)]
    pub features: serde_json::Value,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Plan reference inside a status payload: either an id or the full plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanDescriptor {
    Id(i64),
    Detailed(Plan),
}

impl PlanDescriptor {
    #[must_use]
    pub fn id(&self) -> i64 {
        match self {
            Self::Id(id) => *id,
            Self::Detailed(plan) => plan.id,
        }
    }
}

/// Body of `GET /subscribe/status/`.
///
/// `plan` stays raw so an unexpected plan shape never hides `is_active`.
#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionStatusResponse {
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub plan: serde_json::Value,
}

impl SubscriptionStatusResponse {
    #[must_use]
    pub fn active(&self) -> bool {
        self.is_active.unwrap_or(false)
    }

    #[must_use]
    pub fn plan(&self) -> Option<PlanDescriptor> {
        if self.plan.is_null() {
            return None;
        }
        serde_json::from_value(self.plan.clone()).ok()
    }
}

/// `GET /subscribe/plans/` answers with a bare list or a paginated page.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PlansResponse {
    List(Vec<Plan>),
    Page { results: Vec<Plan> },
}

impl PlansResponse {
    #[must_use]
    pub fn into_plans(self) -> Vec<Plan> {
        match self {
            Self::List(plans) | Self::Page { results: plans } => plans,
        }
    }
}

// =============================================================================
// PAYMENT
// =============================================================================

#[derive(Debug, Serialize)]
pub struct CheckoutSessionRequest {
    pub subscription_plan_id: i64,
    pub success_url: String,
    pub cancel_url: String,
}

/// Body of `create-checkout-session`, and of its 409 pending-payment conflict.
#[derive(Debug, Default, Deserialize)]
pub struct CheckoutSessionResponse {
    #[serde(default)]
    pub checkout_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl CheckoutSessionResponse {
    /// Where the browser should go to pay.
    #[must_use]
    pub fn redirect_url(&self) -> Option<&str> {
        self.checkout_url
            .as_deref()
            .or(self.url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct ConfirmCheckoutRequest<'a> {
    pub session_id: &'a str,
}

// =============================================================================
// SERDE HELPERS
// =============================================================================

fn default_true() -> bool {
    true
}

fn deserialize_i64_from_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| D::Error::custom("expected integer id")),
        serde_json::Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| D::Error::custom(format!("expected integer id, got {text:?}"))),
        _ => Err(D::Error::custom("expected number")),
    }
}

fn deserialize_decimal_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(text)) => Ok(Some(text)),
        Some(serde_json::Value::Number(number)) => Ok(Some(number.to_string())),
        Some(_) => Err(D::Error::custom("expected decimal string or number")),
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
