//! OpenID Connect relying party for Passgate.
//!
//! This crate signs users in against an external OIDC provider using the
//! Authorization Code Flow with PKCE:
//!
//! - **Initiate**: fresh `state`, `nonce` and PKCE verifier are stored in a
//!   short-lived authorization session and the browser is sent to the
//!   provider.
//! - **Callback**: state, PKCE, token exchange, ID token signature and claims,
//!   and nonce are checked in that order before the user directory is
//!   touched and a login session is written.
//!
//! Sessions, the user directory, the token source, the token endpoint and
//! the ID token verifier are all injected, so the pipeline runs unchanged
//! against cookies in production and in-memory fakes in tests.
//!
//! # Architecture
//!
//! ```text
//! FlowController
//! ├── TokenSource       (state / nonce / PKCE verifier)
//! ├── TokenExchanger    (authorization code → tokens)
//! ├── IdTokenVerifier   (JWKS, cached, refresh on unknown kid)
//! ├── UserDirectory     (passgate-store)
//! └── SessionStore<T>   (AuthorizationAttempt, LoginPrincipal)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use passgate_auth::{AuthorizationAttempt, FlowController, MemorySession, OidcConfig};
//! use passgate_store::{Database, UserStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OidcConfig::from_env()?;
//! let users = UserStore::new(Database::open_and_migrate("data/passgate.db").await?);
//! let flow = FlowController::from_config(config, Arc::new(users))?;
//!
//! let mut attempts = MemorySession::<AuthorizationAttempt>::new();
//! let redirect = flow.initiate(&mut attempts).await?;
//! println!("send the browser to {redirect}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod flow;
pub mod id_token;
pub mod oauth;
pub mod pkce;
pub mod session;

// Re-export key types at the crate root for convenience.
pub use config::OidcConfig;
pub use error::{AuthError, Result};
pub use flow::{
    CallbackError, CallbackFailure, CallbackOutcome, CallbackParams, CallbackResult,
    CallbackStage, CurrentUser, FlowController, LOGOUT_PATH,
};
pub use id_token::{IdTokenVerifier, JwksVerifier, VerifiedClaims};
pub use oauth::{ProviderTokenResponse, TokenExchangeClient, TokenExchanger};
pub use pkce::{PkcePair, SystemTokenSource, TokenSource};
pub use session::{
    AUTH_SESSION_TTL, AuthorizationAttempt, Expiring, LOGIN_SESSION_TTL, LoginPrincipal,
    MemorySession, ReplayGuard, SessionStore, SpentAttempts,
};
