//! In-process OpenID provider for integration tests.
//!
//! Binds an axum router to `127.0.0.1:0` and implements just enough of a
//! provider to drive the relying party end to end:
//!
//! - `GET /authorize` records the PKCE challenge and nonce, mints a code and
//!   redirects back to the client.
//! - `POST /token` recomputes the S256 challenge from the presented verifier
//!   and signs an ES256 ID token.
//! - `GET /jwks` publishes the current signing key.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use passgate_auth::OidcConfig;
use passgate_auth::pkce::pkce_challenge;
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;

pub const CLIENT_ID: &str = "passgate";
pub const CLIENT_SECRET: &str = "s3cret";

// ── state ────────────────────────────────────────────────────────────────────

/// What the provider says about the signed-in user.
#[derive(Debug, Clone)]
pub struct Identity {
    pub sub: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    /// Sign this nonce instead of the one the client sent.
    pub nonce_override: Option<String>,
    /// Sign this audience instead of the client id.
    pub audience_override: Option<String>,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            sub: "ext-42".to_string(),
            name: Some("Ada".to_string()),
            picture: Some("https://example.com/ada.png".to_string()),
            nonce_override: None,
            audience_override: None,
        }
    }
}

struct SigningKey {
    kid: String,
    pkcs8: Vec<u8>,
    jwk: Value,
}

impl SigningKey {
    fn generate(kid: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("generate P-256 key");
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
            .expect("parse generated key");

        // Uncompressed point: 0x04 || x || y.
        let point = pair.public_key().as_ref();
        let jwk = json!({
            "kty": "EC",
            "crv": "P-256",
            "kid": kid,
            "use": "sig",
            "alg": "ES256",
            "x": URL_SAFE_NO_PAD.encode(&point[1..33]),
            "y": URL_SAFE_NO_PAD.encode(&point[33..65]),
        });

        Self {
            kid: kid.to_string(),
            pkcs8: pkcs8.as_ref().to_vec(),
            jwk,
        }
    }
}

struct Grant {
    code_challenge: String,
    nonce: Option<String>,
    redirect_uri: String,
}

struct ProviderState {
    issuer: String,
    signing: Mutex<SigningKey>,
    identity: Mutex<Identity>,
    grants: Mutex<HashMap<String, Grant>>,
    next_codes: Mutex<Vec<String>>,
    issued: AtomicUsize,
    key_generation: AtomicUsize,
    jwks_fetches: AtomicUsize,
    token_delay: Mutex<Option<Duration>>,
}

// ── handle ───────────────────────────────────────────────────────────────────

/// A running stub provider. Dropping it stops nothing; the runtime does.
pub struct StubProvider {
    pub base: String,
    state: Arc<ProviderState>,
    _handle: tokio::task::JoinHandle<()>,
}

impl StubProvider {
    /// Bind to 127.0.0.1:0 and start serving.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to port 0");
        let addr: SocketAddr = listener.local_addr().expect("get local addr");
        let base = format!("http://127.0.0.1:{}", addr.port());

        let state = Arc::new(ProviderState {
            issuer: base.clone(),
            signing: Mutex::new(SigningKey::generate("key-1")),
            identity: Mutex::new(Identity::default()),
            grants: Mutex::new(HashMap::new()),
            next_codes: Mutex::new(Vec::new()),
            issued: AtomicUsize::new(0),
            key_generation: AtomicUsize::new(1),
            jwks_fetches: AtomicUsize::new(0),
            token_delay: Mutex::new(None),
        });

        let app = Router::new()
            .route("/authorize", get(authorize))
            .route("/token", post(token))
            .route("/jwks", get(jwks))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        // Small yield so the listener is ready.
        tokio::time::sleep(Duration::from_millis(10)).await;

        Self {
            base,
            state,
            _handle: handle,
        }
    }

    /// Relying-party configuration pointing at this provider.
    pub fn config(&self, redirect_uri: &str) -> OidcConfig {
        OidcConfig {
            client_id: CLIENT_ID.to_string(),
            client_secret: CLIENT_SECRET.to_string(),
            redirect_uri: redirect_uri.to_string(),
            issuer: self.base.clone(),
            auth_endpoint: Url::parse(&format!("{}/authorize", self.base)).unwrap(),
            token_endpoint: Url::parse(&format!("{}/token", self.base)).unwrap(),
            jwks_endpoint: Url::parse(&format!("{}/jwks", self.base)).unwrap(),
            http_timeout: Duration::from_secs(5),
        }
    }

    pub fn set_identity(&self, identity: Identity) {
        *self.state.identity.lock().unwrap() = identity;
    }

    /// Use `code` for the next authorization instead of a generated one.
    pub fn set_next_code(&self, code: &str) {
        self.state.next_codes.lock().unwrap().push(code.to_string());
    }

    /// Make the token endpoint wait before answering.
    pub fn set_token_delay(&self, delay: Duration) {
        *self.state.token_delay.lock().unwrap() = Some(delay);
    }

    /// Replace the signing key with a new one under a new `kid`.
    pub fn rotate_key(&self) {
        let generation = self.state.key_generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.signing.lock().unwrap() = SigningKey::generate(&format!("key-{generation}"));
    }

    pub fn jwks_fetches(&self) -> usize {
        self.state.jwks_fetches.load(Ordering::SeqCst)
    }

    /// Play the browser: follow `authorize_url` and return the query the
    /// provider sends back to the client.
    pub async fn authorize(&self, authorize_url: &Url) -> HashMap<String, String> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        let resp = client
            .get(authorize_url.clone())
            .send()
            .await
            .expect("authorize request");
        assert!(resp.status().is_redirection(), "status {}", resp.status());

        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .expect("location header")
            .to_str()
            .unwrap();
        let callback = Url::parse(location).expect("callback url");
        callback.query_pairs().into_owned().collect()
    }
}

// ── handlers ─────────────────────────────────────────────────────────────────

async fn authorize(
    State(state): State<Arc<ProviderState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let ok = params.get("response_type").map(String::as_str) == Some("code")
        && params.get("client_id").map(String::as_str) == Some(CLIENT_ID)
        && params.get("code_challenge_method").map(String::as_str) == Some("S256")
        && params
            .get("scope")
            .is_some_and(|s| s.split(' ').any(|scope| scope == "openid"));
    let (Some(redirect_uri), Some(code_challenge), true) = (
        params.get("redirect_uri"),
        params.get("code_challenge"),
        ok,
    ) else {
        return (StatusCode::BAD_REQUEST, "invalid authorization request").into_response();
    };

    let code = state.next_codes.lock().unwrap().pop().unwrap_or_else(|| {
        let n = state.issued.fetch_add(1, Ordering::SeqCst);
        format!("code-{n}")
    });

    state.grants.lock().unwrap().insert(
        code.clone(),
        Grant {
            code_challenge: code_challenge.clone(),
            nonce: params.get("nonce").cloned(),
            redirect_uri: redirect_uri.clone(),
        },
    );

    let mut target = Url::parse(redirect_uri).expect("redirect uri");
    target.query_pairs_mut().append_pair("code", &code);
    if let Some(s) = params.get("state") {
        target.query_pairs_mut().append_pair("state", s);
    }
    Redirect::to(target.as_str()).into_response()
}

async fn token(
    State(state): State<Arc<ProviderState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let delay = *state.token_delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let field = |name: &str| form.get(name).map(String::as_str).unwrap_or_default();

    if field("grant_type") != "authorization_code"
        || field("client_id") != CLIENT_ID
        || field("client_secret") != CLIENT_SECRET
    {
        return invalid("invalid_client");
    }

    // Codes are single use.
    let Some(grant) = state.grants.lock().unwrap().remove(field("code")) else {
        return invalid("invalid_grant");
    };

    if grant.redirect_uri != field("redirect_uri") {
        return invalid("invalid_grant");
    }
    if pkce_challenge(field("code_verifier")) != grant.code_challenge {
        return invalid("invalid_grant");
    }

    let identity = state.identity.lock().unwrap().clone();
    let now = chrono::Utc::now().timestamp();
    let mut claims = json!({
        "iss": state.issuer,
        "aud": identity.audience_override.clone().unwrap_or_else(|| CLIENT_ID.to_string()),
        "sub": identity.sub,
        "iat": now,
        "exp": now + 300,
    });
    if let Some(nonce) = identity.nonce_override.or(grant.nonce) {
        claims["nonce"] = json!(nonce);
    }
    if let Some(name) = identity.name {
        claims["name"] = json!(name);
    }
    if let Some(picture) = identity.picture {
        claims["picture"] = json!(picture);
    }

    let id_token = {
        let signing = state.signing.lock().unwrap();
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(signing.kid.clone());
        encode(&header, &claims, &EncodingKey::from_ec_der(&signing.pkcs8)).expect("sign id token")
    };

    Json(json!({
        "id_token": id_token,
        "access_token": "stub-access-token",
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "openid profile",
    }))
    .into_response()
}

async fn jwks(State(state): State<Arc<ProviderState>>) -> Json<Value> {
    state.jwks_fetches.fetch_add(1, Ordering::SeqCst);
    let signing = state.signing.lock().unwrap();
    Json(json!({ "keys": [signing.jwk.clone()] }))
}

fn invalid(error: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response()
}
