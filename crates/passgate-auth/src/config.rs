//! Relying-party configuration.
//!
//! [`OidcConfig`] is read once at startup. Every required value must be
//! present and non-empty, and every endpoint must parse as an absolute URL,
//! so a misconfigured deployment fails before it accepts a request.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{AuthError, Result};

/// Default upstream HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Scopes requested at the authorization endpoint.
pub const SCOPES: &str = "openid profile";

/// Configuration for talking to one OpenID Connect provider.
#[derive(Clone)]
pub struct OidcConfig {
    /// The OAuth client ID. Also the expected `aud` of ID tokens.
    pub client_id: String,

    /// The confidential client secret, sent at token exchange.
    pub client_secret: String,

    /// The callback URL registered with the provider, exactly as configured.
    ///
    /// Kept as a string so it reaches the provider byte for byte.
    pub redirect_uri: String,

    /// The expected `iss` of ID tokens.
    pub issuer: String,

    /// The provider's authorization endpoint.
    pub auth_endpoint: Url,

    /// The provider's token endpoint.
    pub token_endpoint: Url,

    /// The provider's JWKS endpoint.
    pub jwks_endpoint: Url,

    /// Timeout for every request to the token and JWKS endpoints.
    pub http_timeout: Duration,
}

impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("issuer", &self.issuer)
            .field("auth_endpoint", &self.auth_endpoint.as_str())
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("jwks_endpoint", &self.jwks_endpoint.as_str())
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl OidcConfig {
    /// Build the configuration from environment-style variables.
    ///
    /// `lookup` returns the raw value of a variable; empty values are treated
    /// as missing.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] naming the first variable that is
    /// missing or malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout_secs = match optional_var(&lookup, "OIDC_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().ok().filter(|s| *s > 0).ok_or_else(|| {
                AuthError::InvalidConfig {
                    reason: format!(
                        "OIDC_HTTP_TIMEOUT_SECS must be a positive integer, got {raw:?}"
                    ),
                }
            })?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        let config = Self {
            client_id: required_var(&lookup, "OIDC_CLIENT_ID")?,
            client_secret: required_var(&lookup, "OIDC_CLIENT_SECRET")?,
            redirect_uri: required_raw_url(&lookup, "OIDC_CLIENT_REDIRECT_URI")?,
            issuer: required_var(&lookup, "OIDC_ISSUER")?,
            auth_endpoint: required_url(&lookup, "OIDC_ISSUER_AUTH_ENDPOINT")?,
            token_endpoint: required_url(&lookup, "OIDC_ISSUER_TOKEN_ENDPOINT")?,
            jwks_endpoint: required_url(&lookup, "OIDC_ISSUER_JWKS_ENDPOINT")?,
            http_timeout: Duration::from_secs(timeout_secs),
        };

        Ok(config)
    }

    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Whether cookies should carry the `Secure` attribute.
    pub fn uses_https(&self) -> bool {
        Url::parse(&self.redirect_uri).is_ok_and(|url| url.scheme() == "https")
    }
}

// ---------------------------------------------------------------------------
// Variable helpers
// ---------------------------------------------------------------------------

/// Read a variable, treating empty or whitespace-only values as absent.
pub fn optional_var<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a variable that must be present.
pub fn required_var<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    optional_var(lookup, name).ok_or_else(|| AuthError::InvalidConfig {
        reason: format!("{name} is not set"),
    })
}

/// Read a variable that must be present and parse as an http(s) URL.
pub fn required_url<F>(lookup: &F, name: &str) -> Result<Url>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = required_var(lookup, name)?;
    parse_http_url(name, &raw)
}

/// Like [`required_url`], but return the value as written.
pub fn required_raw_url<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = required_var(lookup, name)?;
    parse_http_url(name, &raw)?;
    Ok(raw)
}

fn parse_http_url(name: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| AuthError::InvalidConfig {
        reason: format!("{name} is not a valid URL: {e}"),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AuthError::InvalidConfig {
            reason: format!("{name} must use http or https, got {}", url.scheme()),
        });
    }

    Ok(url)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
