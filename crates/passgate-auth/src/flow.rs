//! The authorization flow controller.
//!
//! [`FlowController`] owns the two halves of a sign-in:
//!
//! - [`FlowController::initiate`] starts an attempt and returns the provider
//!   URL to redirect the browser to.
//! - [`FlowController::callback`] runs the returned query through an ordered
//!   validation pipeline:
//!
//! ```text
//! StateChecked → PkceChecked → TokenExchanged → IdTokenVerified
//!              → NonceChecked → UserResolved → SessionEstablished
//! ```
//!
//! Each arrow is a check that either advances the attempt or stops it with a
//! [`CallbackFailure`] naming the stage it could not reach. Nothing outside
//! the attempt itself is written until the first six stages have passed, and
//! the attempt is destroyed whatever the outcome.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use passgate_store::{NewUser, UserDirectory, UserRecord};
use passgate_vault::crypto::constant_time_eq;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OidcConfig;
use crate::error::{AuthError, Result};
use crate::id_token::{IdTokenVerifier, JwksVerifier};
use crate::oauth::{TokenExchangeClient, TokenExchanger, authorization_url};
use crate::pkce::{PkcePair, STATE_BYTES, SystemTokenSource, TokenSource};
use crate::session::{AuthorizationAttempt, LoginPrincipal, SessionStore};

// ---------------------------------------------------------------------------
// Callback input
// ---------------------------------------------------------------------------

/// Query parameters the provider appends to the redirect URI.
#[derive(Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    /// Set by the provider instead of `code` when it refused the request.
    pub error: Option<String>,
}

impl fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackParams")
            .field("has_state", &self.state.is_some())
            .field("has_code", &self.code.is_some())
            .field("error", &self.error)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages and failures
// ---------------------------------------------------------------------------

/// Progress of one callback through the validation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStage {
    StateChecked,
    PkceChecked,
    TokenExchanged,
    IdTokenVerified,
    NonceChecked,
    UserResolved,
    SessionEstablished,
}

impl fmt::Display for CallbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StateChecked => "state_checked",
            Self::PkceChecked => "pkce_checked",
            Self::TokenExchanged => "token_exchanged",
            Self::IdTokenVerified => "id_token_verified",
            Self::NonceChecked => "nonce_checked",
            Self::UserResolved => "user_resolved",
            Self::SessionEstablished => "session_established",
        };
        f.write_str(name)
    }
}

/// Why a callback was rejected.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("state missing, expired or mismatched")]
    InvalidState,

    #[error("authorization attempt carries no code verifier")]
    CodeVerifierNotFound,

    #[error("token exchange failed: {0}")]
    TokenFetchFailed(#[source] AuthError),

    #[error("id token rejected: {0}")]
    InvalidIdToken(#[source] AuthError),

    #[error("nonce missing or mismatched")]
    InvalidNonce,

    /// A session store or the user directory failed.
    #[error("storage failure: {0}")]
    Storage(#[source] AuthError),
}

impl CallbackError {
    /// The code shown to the browser in `/?error=<code>`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidState => "invalid_state",
            Self::CodeVerifierNotFound => "code_verifier_not_found",
            Self::TokenFetchFailed(_) => "token_fetch_failed",
            Self::InvalidIdToken(_) => "invalid_id_token",
            Self::InvalidNonce => "invalid_nonce",
            Self::Storage(_) => "storage_failure",
        }
    }
}

/// A rejected callback: the stage that was not reached and why.
#[derive(Debug, thiserror::Error)]
#[error("callback rejected before {stage}: {error}")]
pub struct CallbackFailure {
    pub stage: CallbackStage,
    #[source]
    pub error: CallbackError,
}

impl CallbackFailure {
    pub fn new(stage: CallbackStage, error: CallbackError) -> Self {
        Self { stage, error }
    }

    /// Where the browser goes after this failure.
    ///
    /// Storage failures end the session entirely; everything else lands on
    /// the landing page with an error code.
    pub fn redirect_target(&self) -> String {
        match self.error {
            CallbackError::Storage(_) => LOGOUT_PATH.to_string(),
            ref other => format!("/?error={}", other.code()),
        }
    }
}

trait FailAt<T> {
    fn fail_at(self, stage: CallbackStage) -> std::result::Result<T, CallbackFailure>;
}

impl<T> FailAt<T> for std::result::Result<T, CallbackError> {
    fn fail_at(self, stage: CallbackStage) -> std::result::Result<T, CallbackFailure> {
        self.map_err(|error| CallbackFailure::new(stage, error))
    }
}

/// Path the browser is sent to when its session can no longer be trusted.
pub const LOGOUT_PATH: &str = "/auth/logout";

// ---------------------------------------------------------------------------
// Callback output
// ---------------------------------------------------------------------------

/// How a callback ended.
#[derive(Debug)]
pub enum CallbackOutcome {
    SignedIn(UserRecord),
    Rejected(CallbackFailure),
}

/// Result of [`FlowController::callback`].
#[derive(Debug)]
pub struct CallbackResult {
    /// Relative URL to redirect the browser to.
    pub redirect_to: String,
    pub outcome: CallbackOutcome,
}

impl CallbackResult {
    /// The browser-visible error code, if the callback was rejected.
    pub fn error_code(&self) -> Option<&'static str> {
        match &self.outcome {
            CallbackOutcome::SignedIn(_) => None,
            CallbackOutcome::Rejected(failure) => Some(failure.error.code()),
        }
    }
}

/// Who the login session belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentUser {
    /// No login session.
    Guest,
    SignedIn(UserRecord),
    /// The session names a user the directory does not know.
    Dangling { user_id: String },
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Orchestrates initiate and callback over injected capabilities.
#[derive(Clone)]
pub struct FlowController {
    config: OidcConfig,
    tokens: Arc<dyn TokenSource>,
    exchanger: Arc<dyn TokenExchanger>,
    verifier: Arc<dyn IdTokenVerifier>,
    users: Arc<dyn UserDirectory>,
}

impl fmt::Debug for FlowController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FlowController {
    /// Assemble a controller from explicit capabilities.
    pub fn new(
        config: OidcConfig,
        tokens: Arc<dyn TokenSource>,
        exchanger: Arc<dyn TokenExchanger>,
        verifier: Arc<dyn IdTokenVerifier>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            config,
            tokens,
            exchanger,
            verifier,
            users,
        }
    }

    /// Assemble a controller that talks to the provider in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NetworkError`] if an HTTP client cannot be built.
    pub fn from_config(config: OidcConfig, users: Arc<dyn UserDirectory>) -> Result<Self> {
        let exchanger = Arc::new(TokenExchangeClient::new(&config)?);
        let verifier = Arc::new(JwksVerifier::new(&config)?);
        Ok(Self::new(
            config,
            Arc::new(SystemTokenSource),
            exchanger,
            verifier,
            users,
        ))
    }

    /// Replace the token source.
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Start a new authorization attempt, replacing any unconsumed one.
    ///
    /// Returns the provider authorization URL.
    pub async fn initiate(
        &self,
        attempts: &mut dyn SessionStore<AuthorizationAttempt>,
    ) -> Result<Url> {
        let state = self.tokens.generate(STATE_BYTES)?;
        let nonce = self.tokens.generate(STATE_BYTES)?;
        let pkce = PkcePair::generate(self.tokens.as_ref())?;

        let url = authorization_url(&self.config, &state, &nonce, &pkce.code_challenge);

        let attempt = AuthorizationAttempt::new(state, nonce, pkce.code_verifier);
        debug!(attempt_id = %attempt.id, "authorization attempt started");
        attempts.save(attempt).await?;

        Ok(url)
    }

    /// Complete an authorization attempt from the provider's redirect.
    pub async fn callback(
        &self,
        params: &CallbackParams,
        attempts: &mut dyn SessionStore<AuthorizationAttempt>,
        logins: &mut dyn SessionStore<LoginPrincipal>,
    ) -> CallbackResult {
        let result = self.run_pipeline(params, &*attempts, logins).await;

        // Single use: the attempt is gone whatever the pipeline decided.
        let destroyed = attempts.destroy().await;

        let outcome = match (result, destroyed) {
            (Ok(user), Ok(())) => CallbackOutcome::SignedIn(user),
            (Ok(_), Err(err)) => CallbackOutcome::Rejected(CallbackFailure::new(
                CallbackStage::SessionEstablished,
                CallbackError::Storage(err),
            )),
            (Err(failure), Ok(())) => CallbackOutcome::Rejected(failure),
            (Err(failure), Err(err)) => {
                warn!(%err, "failed to destroy rejected authorization attempt");
                CallbackOutcome::Rejected(failure)
            }
        };

        match outcome {
            CallbackOutcome::SignedIn(user) => {
                info!(
                    user_id = %user.id,
                    login_count = user.login_count,
                    "login succeeded"
                );
                CallbackResult {
                    redirect_to: "/".to_string(),
                    outcome: CallbackOutcome::SignedIn(user),
                }
            }
            CallbackOutcome::Rejected(failure) => {
                warn!(
                    stage = %failure.stage,
                    code = failure.error.code(),
                    error = %failure.error,
                    "callback rejected"
                );
                CallbackResult {
                    redirect_to: failure.redirect_target(),
                    outcome: CallbackOutcome::Rejected(failure),
                }
            }
        }
    }

    /// End the login session.
    pub async fn logout(&self, logins: &mut dyn SessionStore<LoginPrincipal>) -> Result<()> {
        let principal = logins.load().await;
        logins.destroy().await?;

        match principal {
            Ok(Some(principal)) => info!(user_id = %principal.user_id, "logged out"),
            Ok(None) => debug!("logout without a login session"),
            Err(err) => debug!(%err, "logged out an unreadable login session"),
        }
        Ok(())
    }

    /// Resolve the login session to a user record.
    pub async fn current_user(
        &self,
        logins: &dyn SessionStore<LoginPrincipal>,
    ) -> Result<CurrentUser> {
        let Some(principal) = logins.load().await? else {
            return Ok(CurrentUser::Guest);
        };

        match self.users.get(&principal.user_id).await? {
            Some(user) => Ok(CurrentUser::SignedIn(user)),
            None => Ok(CurrentUser::Dangling {
                user_id: principal.user_id,
            }),
        }
    }

    async fn run_pipeline(
        &self,
        params: &CallbackParams,
        attempts: &dyn SessionStore<AuthorizationAttempt>,
        logins: &mut dyn SessionStore<LoginPrincipal>,
    ) -> std::result::Result<UserRecord, CallbackFailure> {
        use CallbackStage::*;

        // Step 1: the returned state must match the stored attempt.
        let stored = attempts
            .load()
            .await
            .map_err(CallbackError::Storage)
            .fail_at(StateChecked)?;
        let now = Utc::now().timestamp();
        let attempt = match (stored, non_empty(&params.state)) {
            (Some(attempt), Some(returned))
                if attempt.expires_at > now
                    && !attempt.state.is_empty()
                    && constant_time_eq(attempt.state.as_bytes(), returned.as_bytes()) =>
            {
                attempt
            }
            _ => return Err(CallbackFailure::new(StateChecked, CallbackError::InvalidState)),
        };

        // Step 2: a consumed attempt has lost its verifier.
        let code_verifier = attempt
            .code_verifier
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(CallbackError::CodeVerifierNotFound)
            .fail_at(PkceChecked)?;

        // Step 3: the code, or the provider's reason for not sending one.
        let code = non_empty(&params.code)
            .ok_or_else(|| {
                let reason = match non_empty(&params.error) {
                    Some(error) => format!("provider returned error {error:?}"),
                    None => "callback carried no authorization code".to_string(),
                };
                CallbackError::TokenFetchFailed(AuthError::TokenExchange { reason })
            })
            .fail_at(TokenExchanged)?;

        // Step 4: redeem the code.
        let tokens = self
            .exchanger
            .exchange(code, code_verifier)
            .await
            .map_err(CallbackError::TokenFetchFailed)
            .fail_at(TokenExchanged)?;

        // Step 5: verify the ID token.
        let claims = self
            .verifier
            .verify(&tokens.id_token, &self.config.issuer, &self.config.client_id)
            .await
            .map_err(CallbackError::InvalidIdToken)
            .fail_at(IdTokenVerified)?;

        // Step 6: the token must answer this attempt's nonce.
        let nonce_ok = claims
            .nonce
            .as_deref()
            .is_some_and(|n| !n.is_empty() && constant_time_eq(n.as_bytes(), attempt.nonce.as_bytes()));
        if !nonce_ok {
            return Err(CallbackFailure::new(NonceChecked, CallbackError::InvalidNonce));
        }

        // Step 7: find-or-create the user and count the login.
        let user = self
            .users
            .record_login(NewUser {
                external_id: claims.sub,
                name: claims.name.unwrap_or_default(),
                picture_url: claims.picture.unwrap_or_default(),
            })
            .await
            .map_err(|e| CallbackError::Storage(e.into()))
            .fail_at(UserResolved)?;

        // Step 8: remember who is signed in. The login above is already
        // counted, so a failed save leaves login_count one ahead.
        logins
            .save(LoginPrincipal::new(user.id.clone()))
            .await
            .map_err(CallbackError::Storage)
            .fail_at(SessionEstablished)?;

        Ok(user)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
