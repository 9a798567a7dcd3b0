//! Encrypted cookie sessions.
//!
//! [`SessionCookies`] wraps the request's [`PrivateCookieJar`] so several
//! [`CookieSession`]s can read and write it during one handler, after which
//! [`SessionCookies::take_jar`] hands the accumulated changes back to axum.
//!
//! The private jar encrypts every value with the application [`Key`] and
//! authenticates the cookie name alongside it, so an `auth_session` value
//! cannot be replayed as a `login_session`. Anything that fails to decrypt,
//! fails to parse or has passed its `expires_at` loads as absent.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use passgate_auth::{
    AUTH_SESSION_TTL, AuthError, AuthorizationAttempt, Expiring, LOGIN_SESSION_TTL,
    LoginPrincipal, SessionStore,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Cookie holding the in-flight [`AuthorizationAttempt`].
pub const AUTH_COOKIE: &str = "auth_session";

/// Cookie holding the [`LoginPrincipal`].
pub const LOGIN_COOKIE: &str = "login_session";

/// Minimum length of the secret the cookie key is derived from.
pub const MIN_SECRET_LEN: usize = 32;

/// Derive the cookie encryption key from the session password.
///
/// Returns `None` if `secret` is shorter than [`MIN_SECRET_LEN`] bytes.
pub fn cookie_key(secret: &[u8]) -> Option<Key> {
    (secret.len() >= MIN_SECRET_LEN).then(|| Key::derive_from(secret))
}

/// A request's private cookie jar, shared by the sessions stored in it.
#[derive(Clone)]
pub struct SessionCookies {
    jar: Arc<Mutex<PrivateCookieJar>>,
    key: Key,
    secure: bool,
}

impl SessionCookies {
    pub fn new(jar: PrivateCookieJar, key: Key, secure: bool) -> Self {
        Self {
            jar: Arc::new(Mutex::new(jar)),
            key,
            secure,
        }
    }

    /// A session stored in the cookie `name`, living for `ttl`.
    pub fn session<T>(&self, name: &'static str, ttl: Duration) -> CookieSession<T> {
        CookieSession {
            cookies: self.clone(),
            name,
            ttl,
            _value: PhantomData,
        }
    }

    pub fn authorization(&self) -> CookieSession<AuthorizationAttempt> {
        self.session(AUTH_COOKIE, AUTH_SESSION_TTL)
    }

    pub fn login(&self) -> CookieSession<LoginPrincipal> {
        self.session(LOGIN_COOKIE, LOGIN_SESSION_TTL)
    }

    /// Take the jar with every change made so far, ready to return from a
    /// handler. The shared jar is left empty.
    pub fn take_jar(&self) -> PrivateCookieJar {
        std::mem::replace(&mut *self.lock(), PrivateCookieJar::new(self.key.clone()))
    }

    fn update(&self, change: impl FnOnce(PrivateCookieJar) -> PrivateCookieJar) {
        let mut jar = self.lock();
        let current = std::mem::replace(&mut *jar, PrivateCookieJar::new(self.key.clone()));
        *jar = change(current);
    }

    fn lock(&self) -> MutexGuard<'_, PrivateCookieJar> {
        // The jar is only ever replaced wholesale, so a poisoned lock still
        // holds a consistent value.
        self.jar.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A [`SessionStore`] kept in one encrypted cookie.
pub struct CookieSession<T> {
    cookies: SessionCookies,
    name: &'static str,
    ttl: Duration,
    _value: PhantomData<fn() -> T>,
}

impl<T> CookieSession<T> {
    fn cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.name, value))
            .http_only(true)
            .secure(self.cookies.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(self.ttl.as_secs() as i64))
            .build()
    }
}

#[async_trait]
impl<T> SessionStore<T> for CookieSession<T>
where
    T: Serialize + DeserializeOwned + Expiring + Send + Sync + 'static,
{
    async fn load(&self) -> passgate_auth::Result<Option<T>> {
        // `get` decrypts; undecryptable cookies come back as `None`.
        let raw = self
            .cookies
            .lock()
            .get(self.name)
            .map(|c| c.value().to_string());

        let Some(raw) = raw.filter(|v| !v.is_empty()) else {
            return Ok(None);
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) if value.is_expired(unix_now()) => {
                tracing::debug!(cookie = self.name, "ignoring expired session cookie");
                Ok(None)
            }
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::debug!(cookie = self.name, error = %err, "ignoring unreadable session cookie");
                Ok(None)
            }
        }
    }

    async fn save(&mut self, value: T) -> passgate_auth::Result<()> {
        let json = serde_json::to_string(&value).map_err(|e| AuthError::Session {
            reason: format!("failed to encode {}: {e}", self.name),
        })?;
        let cookie = self.cookie(json);

        self.cookies.update(|jar| jar.add(cookie));
        Ok(())
    }

    async fn destroy(&mut self) -> passgate_auth::Result<()> {
        let removal = Cookie::build((self.name, "")).path("/").build();

        self.cookies.update(|jar| jar.remove(removal));
        Ok(())
    }
}

fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::http::header::{COOKIE, SET_COOKIE};
    use axum::http::{HeaderMap, HeaderValue};
    use axum::response::IntoResponse;

    use super::*;

    const SECRET: &[u8] = b"complex_password_at_least_32_characters_long";

    fn key() -> Key {
        cookie_key(SECRET).unwrap()
    }

    fn cookies(secure: bool) -> SessionCookies {
        SessionCookies::new(PrivateCookieJar::new(key()), key(), secure)
    }

    /// Cookies as a browser would send them back.
    fn incoming(pairs: &[(&str, &str)]) -> SessionCookies {
        let header = pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&header).unwrap());
        SessionCookies::new(PrivateCookieJar::from_headers(&headers, key()), key(), false)
    }

    /// The encrypted value a response sets for `name`.
    fn set_cookie_value(cookies: &SessionCookies, name: &str) -> String {
        let response = cookies.take_jar().into_response();
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| v.strip_prefix(&format!("{name}=")).map(String::from))
            .and_then(|v| v.split(';').next().map(String::from))
            .unwrap()
    }

    fn attempt() -> AuthorizationAttempt {
        AuthorizationAttempt::new("S1".into(), "N1".into(), "V1".into())
    }

    #[tokio::test]
    async fn save_then_load() {
        let cookies = cookies(false);
        let mut session = cookies.authorization();

        session.save(attempt()).await.unwrap();
        let loaded = session.load().await.unwrap().unwrap();
        assert_eq!(loaded.state, "S1");
    }

    #[tokio::test]
    async fn cookie_attributes() {
        let cookies = cookies(true);
        cookies.login().save(LoginPrincipal::new("user-1".into())).await.unwrap();

        let header = cookies
            .take_jar()
            .into_response()
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(header.starts_with("login_session="));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Secure"));
        assert!(header.contains("SameSite=Lax"));
        assert!(header.contains("Path=/"));
        assert!(header.contains("Max-Age=604800"));
        assert!(!header.contains("user-1"));
    }

    #[tokio::test]
    async fn plain_http_cookies_are_not_secure() {
        let cookies = cookies(false);
        cookies.authorization().save(attempt()).await.unwrap();

        let jar = cookies.take_jar();
        let cookie = jar.get(AUTH_COOKIE).unwrap();
        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(cookie.max_age(), Some(time::Duration::minutes(10)));
    }

    #[tokio::test]
    async fn sessions_share_one_jar() {
        let cookies = cookies(false);
        let mut attempts = cookies.authorization();
        let mut logins = cookies.login();

        attempts.save(attempt()).await.unwrap();
        logins.save(LoginPrincipal::new("user-1".into())).await.unwrap();
        attempts.destroy().await.unwrap();

        let jar = cookies.take_jar();
        assert!(jar.get(AUTH_COOKIE).is_none());
        assert!(jar.get(LOGIN_COOKIE).is_some());
    }

    #[tokio::test]
    async fn sent_back_cookie_loads() {
        let outgoing = cookies(false);
        outgoing.login().save(LoginPrincipal::new("user-1".into())).await.unwrap();
        let value = set_cookie_value(&outgoing, LOGIN_COOKIE);

        let cookies = incoming(&[(LOGIN_COOKIE, &value)]);
        let principal = cookies.login().load().await.unwrap().unwrap();
        assert_eq!(principal.user_id, "user-1");
    }

    #[tokio::test]
    async fn tampered_cookie_loads_as_absent() {
        let cookies = incoming(&[(LOGIN_COOKIE, "not-an-encrypted-value")]);
        assert!(cookies.login().load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn value_encrypted_for_other_cookie_loads_as_absent() {
        let outgoing = cookies(false);
        outgoing
            .session::<LoginPrincipal>(AUTH_COOKIE, AUTH_SESSION_TTL)
            .save(LoginPrincipal::new("user-1".into()))
            .await
            .unwrap();
        let value = set_cookie_value(&outgoing, AUTH_COOKIE);

        let cookies = incoming(&[(LOGIN_COOKIE, &value)]);
        assert!(cookies.login().load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn value_under_other_key_loads_as_absent() {
        let other = cookie_key(b"another_password_that_is_also_32_bytes_long").unwrap();
        let outgoing = SessionCookies::new(PrivateCookieJar::new(other.clone()), other, false);
        outgoing.login().save(LoginPrincipal::new("user-1".into())).await.unwrap();
        let value = set_cookie_value(&outgoing, LOGIN_COOKIE);

        let cookies = incoming(&[(LOGIN_COOKIE, &value)]);
        assert!(cookies.login().load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_value_loads_as_absent() {
        let cookies = cookies(false);
        let mut logins = cookies.login();
        let mut principal = LoginPrincipal::new("user-1".into());
        principal.expires_at = unix_now() - 1;

        logins.save(principal).await.unwrap();
        assert!(logins.load().await.unwrap().is_none());
    }

    #[test]
    fn short_secret_has_no_key() {
        assert!(cookie_key(b"too-short").is_none());
        assert!(cookie_key(SECRET).is_some());
    }
}
