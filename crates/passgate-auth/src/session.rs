//! Session payloads and the storage capability they live behind.
//!
//! Two values are kept per browser:
//!
//! - an [`AuthorizationAttempt`] for the ten minutes between redirecting to
//!   the provider and receiving the callback, and
//! - a [`LoginPrincipal`] for the seven days after a successful sign-in.
//!
//! Both sit behind [`SessionStore`]. The web crate stores them in encrypted
//! cookies; tests use [`MemorySession`].
//!
//! A cookie cannot be revoked from the server side, so a browser (or an
//! attacker) that kept a copy of the authorization cookie could present it
//! again, possibly while the first callback is still running. [`ReplayGuard`]
//! claims each attempt in a [`SpentAttempts`] registry the first time it is
//! loaded and hands every later load back without the code verifier, which
//! makes the replay fail at the PKCE check.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;

/// Lifetime of an authorization attempt.
pub const AUTH_SESSION_TTL: Duration = Duration::from_secs(10 * 60);

/// Lifetime of a login session.
pub const LOGIN_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Upper bound on remembered spent attempts.
const SPENT_CAPACITY: u64 = 100_000;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A session payload that carries its own expiry.
pub trait Expiring {
    /// Unix timestamp from which the value counts as absent.
    fn expires_at(&self) -> i64;

    fn is_expired(&self, now: i64) -> bool {
        self.expires_at() <= now
    }
}

/// One in-flight authorization round trip.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationAttempt {
    /// Local identifier used to remember consumed attempts.
    pub id: String,
    pub state: String,
    pub nonce: String,
    /// `None` once the attempt has been consumed.
    pub code_verifier: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl std::fmt::Debug for AuthorizationAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationAttempt")
            .field("id", &self.id)
            .field("has_code_verifier", &self.code_verifier.is_some())
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl AuthorizationAttempt {
    /// Start a new attempt valid for [`AUTH_SESSION_TTL`].
    pub fn new(state: String, nonce: String, code_verifier: String) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            state,
            nonce,
            code_verifier: Some(code_verifier),
            created_at: now,
            expires_at: now + AUTH_SESSION_TTL.as_secs() as i64,
        }
    }
}

impl Expiring for AuthorizationAttempt {
    fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

/// The signed-in user, by reference to the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPrincipal {
    pub user_id: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl LoginPrincipal {
    /// Start a login session valid for [`LOGIN_SESSION_TTL`].
    pub fn new(user_id: String) -> Self {
        let now = Utc::now().timestamp();
        Self {
            user_id,
            created_at: now,
            expires_at: now + LOGIN_SESSION_TTL.as_secs() as i64,
        }
    }
}

impl Expiring for LoginPrincipal {
    fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Storage capability
// ---------------------------------------------------------------------------

/// Request-scoped storage for one session value.
///
/// Implementations must treat expired, tampered or unreadable data as
/// absent. Errors are reserved for storage that is actually broken.
#[async_trait]
pub trait SessionStore<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Load the current value, if any.
    async fn load(&self) -> Result<Option<T>>;

    /// Replace the current value.
    async fn save(&mut self, value: T) -> Result<()>;

    /// Remove the current value. Removing nothing is not an error.
    async fn destroy(&mut self) -> Result<()>;
}

/// In-memory [`SessionStore`]. Clones share the same slot.
#[derive(Debug)]
pub struct MemorySession<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for MemorySession<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for MemorySession<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> MemorySession<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session already holding `value`.
    pub fn with_value(value: T) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(value))),
        }
    }
}

#[async_trait]
impl<T> SessionStore<T> for MemorySession<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn load(&self) -> Result<Option<T>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&mut self, value: T) -> Result<()> {
        *self.slot.lock().await = Some(value);
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        self.slot.lock().await.take();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Spent-attempt registry
// ---------------------------------------------------------------------------

/// Process-wide record of consumed authorization attempts.
///
/// Entries outlive the attempts they describe by at most
/// [`AUTH_SESSION_TTL`], after which the attempt cookie has expired anyway.
#[derive(Clone)]
pub struct SpentAttempts {
    ids: Cache<String, ()>,
}

impl std::fmt::Debug for SpentAttempts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpentAttempts")
            .field("entries", &self.ids.entry_count())
            .finish()
    }
}

impl Default for SpentAttempts {
    fn default() -> Self {
        Self::new()
    }
}

impl SpentAttempts {
    pub fn new() -> Self {
        Self {
            ids: Cache::builder()
                .max_capacity(SPENT_CAPACITY)
                .time_to_live(AUTH_SESSION_TTL)
                .build(),
        }
    }

    /// Remember `attempt_id` as consumed.
    pub async fn mark_spent(&self, attempt_id: &str) {
        self.ids.insert(attempt_id.to_string(), ()).await;
    }

    /// Mark `attempt_id` as consumed, returning `true` only for the first
    /// caller. Concurrent claims of one id are resolved atomically.
    pub async fn claim(&self, attempt_id: &str) -> bool {
        self.ids
            .entry(attempt_id.to_string())
            .or_insert(())
            .await
            .is_fresh()
    }
}

/// Wraps an attempt store so each attempt can be completed at most once.
///
/// Loading an attempt claims it. Only the first load anywhere in the process
/// sees the code verifier.
#[derive(Debug)]
pub struct ReplayGuard<S> {
    inner: S,
    spent: SpentAttempts,
}

impl<S> ReplayGuard<S> {
    pub fn new(inner: S, spent: SpentAttempts) -> Self {
        Self { inner, spent }
    }
}

#[async_trait]
impl<S> SessionStore<AuthorizationAttempt> for ReplayGuard<S>
where
    S: SessionStore<AuthorizationAttempt>,
{
    async fn load(&self) -> Result<Option<AuthorizationAttempt>> {
        let Some(mut attempt) = self.inner.load().await? else {
            return Ok(None);
        };

        if !self.spent.claim(&attempt.id).await {
            debug!(attempt_id = %attempt.id, "presented authorization attempt was already consumed");
            attempt.code_verifier = None;
        }

        Ok(Some(attempt))
    }

    async fn save(&mut self, value: AuthorizationAttempt) -> Result<()> {
        self.inner.save(value).await
    }

    async fn destroy(&mut self) -> Result<()> {
        match self.inner.load().await {
            Ok(Some(attempt)) => self.spent.mark_spent(&attempt.id).await,
            Ok(None) => {}
            Err(err) => debug!(%err, "destroying an unreadable authorization attempt"),
        }
        self.inner.destroy().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
