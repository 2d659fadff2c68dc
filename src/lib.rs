//! Client-side session and authorization core for the streaming front-end.
//!
//! The crate owns everything between "the user has credentials" and "this
//! view may render": persisting the token pair, attaching it to requests,
//! refreshing it transparently on a 401, resolving who the user is and
//! whether they are subscribed, gating navigation on that, and consuming
//! the payment provider's return redirect.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`store`] | Token pair persistence ([`store::TokenStore`]) |
//! | [`transport`] | HTTP seam ([`transport::Transport`]) and the reqwest implementation |
//! | [`client`] | [`client::SessionClient`]: bearer attachment and single-flight refresh |
//! | [`api`] | One helper per backend endpoint |
//! | [`auth`] | [`auth::AuthSession`]: identity state and login/logout/bootstrap |
//! | [`subscription`] | [`subscription::SubscriptionStatus`]: fail-closed paywall state |
//! | [`guard`] | Pure route decisions |
//! | [`checkout`] | [`checkout::CheckoutReconciler`]: payment start and return handling |
//! | [`scope`] | [`scope::ViewScope`]: abort view work on unmount |
//! | [`config`] | Environment configuration |
//! | [`error`] | Error taxonomy |
//! | [`types`] | Wire DTOs |

pub mod api;
pub mod auth;
pub mod checkout;
pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod scope;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use auth::{AuthSession, AuthState};
pub use client::SessionClient;
pub use config::ClientConfig;
pub use error::ApiError;
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use subscription::{SubscriptionStatus, SubscriptionView};
pub use transport::{ReqwestTransport, Transport};
