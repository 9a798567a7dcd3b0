//! Shared application state for the web server.
//!
//! [`AppState`] is cloned into every request handler. Per-request cookie
//! sessions are built from it on demand.

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::Key;
use passgate_auth::{AuthorizationAttempt, FlowController, ReplayGuard, SpentAttempts};

use crate::WebConfig;
use crate::cookies::{CookieSession, SessionCookies};

/// Shared state accessible from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// The sign-in flow.
    pub flow: Arc<FlowController>,

    /// Encrypts and decrypts session cookies.
    pub key: Key,

    /// Authorization attempts that have already been consumed.
    pub spent: SpentAttempts,

    /// Whether cookies carry the `Secure` attribute.
    pub secure_cookies: bool,

    /// Web server configuration.
    pub config: WebConfig,
}

// PrivateCookieJar extracts its key from state.
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.key.clone()
    }
}

impl AppState {
    /// Build the state. Cookies are `Secure` when the redirect URI is https.
    pub fn new(config: WebConfig, flow: FlowController, key: Key) -> Self {
        let secure_cookies = flow.config().uses_https();
        Self {
            flow: Arc::new(flow),
            key,
            spent: SpentAttempts::new(),
            secure_cookies,
            config,
        }
    }

    /// Wrap the request's cookie jar.
    pub fn cookies(&self, jar: PrivateCookieJar) -> SessionCookies {
        SessionCookies::new(jar, self.key.clone(), self.secure_cookies)
    }

    /// The authorization session, guarded against replays.
    pub fn attempts(
        &self,
        cookies: &SessionCookies,
    ) -> ReplayGuard<CookieSession<AuthorizationAttempt>> {
        ReplayGuard::new(cookies.authorization(), self.spent.clone())
    }
}
