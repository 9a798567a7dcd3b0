//! OpenID Connect Authorization Code Flow with PKCE.
//!
//! This module builds the provider authorization URL and performs the
//! authorization-code-for-tokens exchange (RFC 6749 §4.1, RFC 7636, OIDC
//! Core §3.1). It holds no per-attempt state: everything an attempt needs is
//! passed in by the caller.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::{OidcConfig, SCOPES};
use crate::error::{AuthError, Result};
use crate::pkce::CHALLENGE_METHOD;

// ---------------------------------------------------------------------------
// Token types
// ---------------------------------------------------------------------------

/// Tokens returned by the provider after a successful exchange.
///
/// Only `id_token` is used; nothing here is ever persisted.
#[derive(Clone, Deserialize)]
pub struct ProviderTokenResponse {
    /// The signed ID token.
    pub id_token: String,

    /// The access token. Unused by Passgate.
    #[serde(default)]
    pub access_token: String,

    /// The token type (typically "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: Option<i64>,

    /// The scopes that were granted.
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for ProviderTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTokenResponse")
            .field("id_token", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Raw error response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

// ---------------------------------------------------------------------------
// Authorization URL
// ---------------------------------------------------------------------------

/// Build the authorization URL the browser is redirected to.
///
/// Query parameters already present on the configured endpoint are kept.
pub fn authorization_url(
    config: &OidcConfig,
    state: &str,
    nonce: &str,
    code_challenge: &str,
) -> Url {
    let mut url = config.auth_endpoint.clone();

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("scope", SCOPES)
        .append_pair("state", state)
        .append_pair("nonce", nonce)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", CHALLENGE_METHOD);

    url
}

// ---------------------------------------------------------------------------
// Token exchange
// ---------------------------------------------------------------------------

/// Exchanges an authorization code for provider tokens.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Redeem `code`, proving possession of `code_verifier`.
    async fn exchange(&self, code: &str, code_verifier: &str) -> Result<ProviderTokenResponse>;
}

/// [`TokenExchanger`] that posts to the provider's token endpoint.
///
/// Every request is bounded by the configured timeout and never retried.
#[derive(Clone)]
pub struct TokenExchangeClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    token_endpoint: Url,
    client: reqwest::Client,
}

impl std::fmt::Debug for TokenExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl TokenExchangeClient {
    /// Create a client for the token endpoint in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NetworkError`] if the HTTP client cannot be built.
    pub fn new(config: &OidcConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            token_endpoint: config.token_endpoint.clone(),
            client,
        })
    }

    /// Parse the HTTP response from the token endpoint.
    async fn parse_token_response(response: reqwest::Response) -> Result<ProviderTokenResponse> {
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await?;
            let tokens: ProviderTokenResponse =
                serde_json::from_slice(&body).map_err(|e| AuthError::TokenExchange {
                    reason: format!("unexpected token response: {e}"),
                })?;
            tracing::debug!(token_type = %tokens.token_type, "token exchange successful");
            return Ok(tokens);
        }

        let body = response.text().await.unwrap_or_default();

        // Prefer the OAuth error code over the raw body, which may echo input.
        let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(err) => match err.error_description {
                Some(description) => format!("{}: {description}", err.error),
                None => err.error,
            },
            Err(_) => format!("HTTP {status}"),
        };

        Err(AuthError::TokenExchange { reason })
    }
}

#[async_trait]
impl TokenExchanger for TokenExchangeClient {
    async fn exchange(&self, code: &str, code_verifier: &str) -> Result<ProviderTokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code_verifier", code_verifier),
        ];

        tracing::debug!(token_endpoint = %self.token_endpoint, "exchanging authorization code");

        let response = self
            .client
            .post(self.token_endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        Self::parse_token_response(response).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    fn test_config() -> OidcConfig {
        OidcConfig {
            client_id: "test-client-id".to_string(),
            client_secret: "test-secret".to_string(),
            redirect_uri: "http://127.0.0.1:3000/auth/callback".to_string(),
            issuer: "https://id.example.com".to_string(),
            auth_endpoint: Url::parse("https://id.example.com/authorize").unwrap(),
            token_endpoint: Url::parse("https://id.example.com/token").unwrap(),
            jwks_endpoint: Url::parse("https://id.example.com/jwks").unwrap(),
            http_timeout: Duration::from_secs(10),
        }
    }

    fn params(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn authorization_url_includes_all_params() {
        let url = authorization_url(&test_config(), "S1", "N1", "challenge");
        let params = params(&url);

        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "test-client-id");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:3000/auth/callback");
        assert_eq!(params["scope"], "openid profile");
        assert_eq!(params["state"], "S1");
        assert_eq!(params["nonce"], "N1");
        assert_eq!(params["code_challenge"], "challenge");
        assert_eq!(params["code_challenge_method"], "S256");
        assert!(!params.contains_key("code_verifier"));
    }

    #[test]
    fn authorization_url_sends_redirect_uri_unnormalized() {
        let mut config = test_config();
        config.redirect_uri = "https://app.example.com".to_string();
        let url = authorization_url(&config, "S1", "N1", "challenge");

        assert_eq!(params(&url)["redirect_uri"], "https://app.example.com");
    }

    #[test]
    fn authorization_url_preserves_existing_query_params() {
        let mut config = test_config();
        config.auth_endpoint = Url::parse("https://id.example.com/authorize?tenant=acme").unwrap();
        let url = authorization_url(&config, "state", "nonce", "challenge");
        let params = params(&url);

        assert_eq!(params["tenant"], "acme");
        assert_eq!(params["response_type"], "code");
    }

    #[test]
    fn token_response_parsing() {
        let json = r#"{
            "id_token": "eyJ.a.b",
            "access_token": "at_abc123",
            "expires_in": 3600,
            "token_type": "Bearer",
            "scope": "openid profile"
        }"#;

        let tokens: ProviderTokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.id_token, "eyJ.a.b");
        assert_eq!(tokens.expires_in, Some(3600));
        assert_eq!(tokens.scope.as_deref(), Some("openid profile"));
    }

    #[test]
    fn token_response_minimal() {
        let json = r#"{ "id_token": "eyJ.a.b", "access_token": "at" }"#;
        let tokens: ProviderTokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.expires_in.is_none());
    }

    #[test]
    fn token_response_without_id_token_is_rejected() {
        let json = r#"{ "access_token": "at", "token_type": "Bearer" }"#;
        assert!(serde_json::from_str::<ProviderTokenResponse>(json).is_err());
    }

    #[test]
    fn token_response_debug_redacts_tokens() {
        let json = r#"{ "id_token": "secret-id", "access_token": "secret-at" }"#;
        let tokens: ProviderTokenResponse = serde_json::from_str(json).unwrap();
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret-id"));
        assert!(!debug.contains("secret-at"));
    }

    #[test]
    fn token_error_response_parsing() {
        let json = r#"{
            "error": "invalid_grant",
            "error_description": "PKCE verification failed"
        }"#;

        let err: TokenErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(err.error, "invalid_grant");
        assert_eq!(
            err.error_description.as_deref(),
            Some("PKCE verification failed")
        );
    }

    #[test]
    fn exchange_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TokenExchangeClient>();
        assert_send_sync::<ProviderTokenResponse>();
    }

    #[test]
    fn exchange_client_debug_hides_secret() {
        let client = TokenExchangeClient::new(&test_config()).unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("test-client-id"));
        assert!(!debug.contains("test-secret"));
    }
}
