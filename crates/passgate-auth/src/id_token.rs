//! ID token verification against the provider's published keys.
//!
//! [`JwksVerifier`] fetches the provider's JSON Web Key Set, caches it for an
//! hour, and validates ID tokens with `jsonwebtoken`. A token signed with a
//! key id missing from the cached set triggers exactly one refetch, which is
//! how provider key rotation is picked up without a restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use moka::future::Cache;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;
use url::Url;

use crate::config::OidcConfig;
use crate::error::{AuthError, Result};

/// Tolerated clock difference between Passgate and the provider.
pub const CLOCK_SKEW_SECS: u64 = 60;

/// How long a fetched key set is trusted before it is refetched.
pub const JWKS_TTL: Duration = Duration::from_secs(60 * 60);

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Claims of an ID token whose signature and registered claims checked out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    /// Provider subject identifier.
    pub sub: String,
    /// Issuer.
    pub iss: String,
    /// Audience. A single string on the wire is read as a one-element list.
    #[serde(deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    /// Expiry, unix seconds.
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(aud) => vec![aud],
        OneOrMany::Many(auds) => auds,
    })
}

// ---------------------------------------------------------------------------
// Verifier capability
// ---------------------------------------------------------------------------

/// Validates ID tokens and surfaces their claims.
#[async_trait]
pub trait IdTokenVerifier: Send + Sync {
    /// Check signature, `iss`, `aud`, `exp`, `nbf` and `iat` of `id_token`.
    async fn verify(
        &self,
        id_token: &str,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> Result<VerifiedClaims>;
}

/// [`IdTokenVerifier`] backed by the provider's JWKS endpoint.
#[derive(Clone)]
pub struct JwksVerifier {
    jwks_endpoint: Url,
    client: reqwest::Client,
    cache: Cache<String, Arc<JwkSet>>,
}

impl std::fmt::Debug for JwksVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksVerifier")
            .field("jwks_endpoint", &self.jwks_endpoint.as_str())
            .field("cached_sets", &self.cache.entry_count())
            .finish()
    }
}

impl JwksVerifier {
    /// Create a verifier for the JWKS endpoint in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NetworkError`] if the HTTP client cannot be built.
    pub fn new(config: &OidcConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        let cache = Cache::builder()
            .max_capacity(4)
            .time_to_live(JWKS_TTL)
            .build();

        Ok(Self {
            jwks_endpoint: config.jwks_endpoint.clone(),
            client,
            cache,
        })
    }

    /// Return the key set, from cache unless `refresh` is set.
    async fn key_set(&self, refresh: bool) -> Result<Arc<JwkSet>> {
        let cache_key = self.jwks_endpoint.to_string();

        if !refresh && let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        let fetched = Arc::new(self.fetch().await?);
        self.cache.insert(cache_key, Arc::clone(&fetched)).await;
        Ok(fetched)
    }

    async fn fetch(&self) -> Result<JwkSet> {
        debug!(jwks_endpoint = %self.jwks_endpoint, "fetching provider key set");

        let response = self.client.get(self.jwks_endpoint.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Jwks {
                reason: format!("HTTP {status}"),
            });
        }

        let body = response.bytes().await?;
        let jwks: JwkSet = serde_json::from_slice(&body).map_err(|e| AuthError::Jwks {
            reason: format!("invalid key set document: {e}"),
        })?;

        debug!(keys = jwks.keys.len(), "provider key set loaded");
        Ok(jwks)
    }
}

#[async_trait]
impl IdTokenVerifier for JwksVerifier {
    async fn verify(
        &self,
        id_token: &str,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> Result<VerifiedClaims> {
        let header = decode_header(id_token)?;
        let kid = header.kid.as_deref();

        let cached = self.key_set(false).await?;
        let jwk = match select_key(&cached, kid) {
            Some(jwk) => jwk.clone(),
            None => {
                debug!(?kid, "signing key not in cached key set, refreshing");
                let refreshed = self.key_set(true).await?;
                select_key(&refreshed, kid)
                    .cloned()
                    .ok_or_else(|| AuthError::IdToken {
                        reason: format!("no provider key matches kid {kid:?}"),
                    })?
            }
        };

        validate(
            id_token,
            &jwk,
            header.alg,
            expected_issuer,
            expected_audience,
            Utc::now().timestamp(),
        )
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Pick the key named by `kid`, or the only key when the token names none.
fn select_key<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => jwks.find(kid),
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
}

/// Validate `token` against one key. `now` is unix seconds.
fn validate(
    token: &str,
    jwk: &Jwk,
    alg: Algorithm,
    expected_issuer: &str,
    expected_audience: &str,
    now: i64,
) -> Result<VerifiedClaims> {
    let key = DecodingKey::from_jwk(jwk)?;

    let mut validation = Validation::new(alg);
    validation.leeway = CLOCK_SKEW_SECS;
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.set_issuer(&[expected_issuer]);
    validation.set_audience(&[expected_audience]);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

    let claims = decode::<VerifiedClaims>(token, &key, &validation)?.claims;

    if let Some(iat) = claims.iat
        && iat > now + CLOCK_SKEW_SECS as i64
    {
        return Err(AuthError::IdToken {
            reason: format!("issued in the future (iat {iat}, now {now})"),
        });
    }

    if claims.sub.is_empty() {
        return Err(AuthError::IdToken {
            reason: "empty subject".to_string(),
        });
    }

    Ok(claims)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
