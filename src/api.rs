//! REST API helpers for the accounts, subscription and payment endpoints.
//!
//! ERROR HANDLING
//! ==============
//! Every helper returns `Result<_, ApiError>`. Status classification and
//! error-body flattening happen in `ApiResponse::json`, so callers only
//! match on the taxonomy. Paths carry the trailing slash the backend
//! requires.

use serde_json::Value;

use crate::client::SessionClient;
use crate::error::ApiError;
use crate::transport::ApiRequest;
use crate::types::{
    AuthResponse, ChangePasswordRequest, CheckoutSessionRequest, CheckoutSessionResponse, ConfirmCheckoutRequest,
    LoginRequest, Plan, PlansResponse, ProfilePatch, RegisterForm, SubscriptionStatusResponse, UserProfile,
};

pub const REGISTER_ENDPOINT: &str = "/auth/register/";
pub const LOGIN_ENDPOINT: &str = "/auth/login/";
pub const REFRESH_ENDPOINT: &str = "/auth/token/refresh/";
pub const LOGOUT_ENDPOINT: &str = "/auth/logout/";
pub const PROFILE_ENDPOINT: &str = "/auth/profile/";
pub const CHANGE_PASSWORD_ENDPOINT: &str = "/auth/change-password/";
pub const SUBSCRIPTION_STATUS_ENDPOINT: &str = "/subscribe/status/";
pub const PLANS_ENDPOINT: &str = "/subscribe/plans/";
pub const CANCEL_SUBSCRIPTION_ENDPOINT: &str = "/subscribe/cancel/";
pub const CREATE_CHECKOUT_ENDPOINT: &str = "/payment/create-checkout-session/";
pub const CONFIRM_CHECKOUT_ENDPOINT: &str = "/payment/confirm-checkout/";
pub const CANCEL_PENDING_ENDPOINT: &str = "/payment/cancel-pending/";

// =============================================================================
// ACCOUNTS
// =============================================================================

/// Create an account via `POST /auth/register/`.
///
/// # Errors
///
/// Field-level problems (duplicate email, password mismatch) come back as
/// [`ApiError::Validation`] with `fields` populated.
pub async fn register(client: &SessionClient, form: &RegisterForm) -> Result<AuthResponse, ApiError> {
    let request = ApiRequest::post(REGISTER_ENDPOINT).anonymous().with_json(form)?;
    client.send_json(request).await
}

/// Exchange credentials for a token pair via `POST /auth/login/`.
///
/// # Errors
///
/// Bad credentials surface as the backend's 4xx classification.
pub async fn login(client: &SessionClient, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
    let request = ApiRequest::post(LOGIN_ENDPOINT)
        .anonymous()
        .with_json(&LoginRequest { email, password })?;
    client.send_json(request).await
}

/// Blacklist `refresh` server-side via `POST /auth/logout/`.
///
/// # Errors
///
/// Returns any failure; logout callers treat it as best-effort.
pub async fn logout(client: &SessionClient, refresh: &str) -> Result<(), ApiError> {
    let request = ApiRequest::post(LOGOUT_ENDPOINT).with_body(serde_json::json!({ "refresh": refresh }));
    client.send(request).await?.error_for_status()?;
    Ok(())
}

/// Fetch the signed-in user via `GET /auth/profile/`.
///
/// # Errors
///
/// [`ApiError::Unauthenticated`] once the session cannot be refreshed.
pub async fn fetch_profile(client: &SessionClient) -> Result<UserProfile, ApiError> {
    client.get_json(PROFILE_ENDPOINT).await
}

/// # Errors
///
/// Returns validation or auth failures from `PATCH /auth/profile/`.
pub async fn update_profile(client: &SessionClient, patch: &ProfilePatch) -> Result<UserProfile, ApiError> {
    let request = ApiRequest::patch(PROFILE_ENDPOINT).with_json(patch)?;
    client.send_json(request).await
}

/// Change the password via `POST /auth/change-password/`, returning the
/// backend's confirmation message when it sends one.
///
/// # Errors
///
/// A wrong old password or mismatched confirmation is [`ApiError::Validation`].
pub async fn change_password(
    client: &SessionClient,
    old_password: &str,
    new_password: &str,
    new_password_confirm: &str,
) -> Result<Option<String>, ApiError> {
    let request = ApiRequest::post(CHANGE_PASSWORD_ENDPOINT).with_json(&ChangePasswordRequest {
        old_password,
        new_password,
        new_password_confirm,
    })?;
    let body: Value = client.send_json(request).await?;
    Ok(body.get("message").and_then(Value::as_str).map(str::to_owned))
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// # Errors
///
/// Returns any failure from `GET /subscribe/status/`.
pub async fn subscription_status(client: &SessionClient) -> Result<SubscriptionStatusResponse, ApiError> {
    client.get_json(SUBSCRIPTION_STATUS_ENDPOINT).await
}

/// List purchasable plans, accepting a bare array or a paginated page.
///
/// # Errors
///
/// Returns any failure from `GET /subscribe/plans/`.
pub async fn list_plans(client: &SessionClient) -> Result<Vec<Plan>, ApiError> {
    let plans: PlansResponse = client.get_json(PLANS_ENDPOINT).await?;
    Ok(plans.into_plans())
}

/// Stop auto-renewal via `POST /subscribe/cancel/`.
///
/// # Errors
///
/// Returns any failure from the backend.
pub async fn cancel_subscription(client: &SessionClient) -> Result<Value, ApiError> {
    client.send_json(ApiRequest::post(CANCEL_SUBSCRIPTION_ENDPOINT)).await
}

// =============================================================================
// PAYMENT
// =============================================================================

/// Open a hosted checkout via `POST /payment/create-checkout-session/`.
///
/// # Errors
///
/// An existing pending payment is [`ApiError::Conflict`] carrying the raw
/// body, which may include a resumable `checkout_url` and `session_id`.
pub async fn create_checkout_session(
    client: &SessionClient,
    body: &CheckoutSessionRequest,
) -> Result<CheckoutSessionResponse, ApiError> {
    let request = ApiRequest::post(CREATE_CHECKOUT_ENDPOINT).with_json(body)?;
    client.send_json(request).await
}

/// Ask the backend to verify a completed checkout and activate the plan.
///
/// # Errors
///
/// Returns any failure from `POST /payment/confirm-checkout/`.
pub async fn confirm_checkout(client: &SessionClient, session_id: &str) -> Result<Value, ApiError> {
    let request = ApiRequest::post(CONFIRM_CHECKOUT_ENDPOINT).with_json(&ConfirmCheckoutRequest { session_id })?;
    client.send_json(request).await
}

/// # Errors
///
/// Returns any failure from `POST /payment/cancel-pending/`.
pub async fn cancel_pending_payment(client: &SessionClient) -> Result<(), ApiError> {
    client.send(ApiRequest::post(CANCEL_PENDING_ENDPOINT)).await?.error_for_status()?;
    Ok(())
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
