//! Random tokens and Proof Key for Code Exchange (RFC 7636).
//!
//! `state`, `nonce` and the PKCE `code_verifier` all come from a
//! [`TokenSource`]. Production code uses [`SystemTokenSource`]; tests inject
//! a source that yields known values so provider interactions are
//! reproducible.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;

use crate::error::Result;

/// Random bytes behind `state` and `nonce` (128 bits each).
pub const STATE_BYTES: usize = 16;

/// Random bytes behind the PKCE verifier. Encodes to 43 characters.
pub const PKCE_VERIFIER_BYTES: usize = 32;

/// The only challenge method Passgate sends.
pub const CHALLENGE_METHOD: &str = "S256";

// ---------------------------------------------------------------------------
// Token source
// ---------------------------------------------------------------------------

/// Produces opaque URL-safe strings from `len_bytes` of randomness.
pub trait TokenSource: Send + Sync {
    /// Return a fresh token. Output is base64url without padding.
    fn generate(&self, len_bytes: usize) -> Result<String>;
}

/// [`TokenSource`] backed by the operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTokenSource;

impl TokenSource for SystemTokenSource {
    fn generate(&self, len_bytes: usize) -> Result<String> {
        Ok(passgate_vault::crypto::random_token(len_bytes)?)
    }
}

// ---------------------------------------------------------------------------
// PKCE
// ---------------------------------------------------------------------------

/// A code verifier together with its S256 challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct PkcePair {
    /// Kept in the authorization session; sent only at token exchange.
    pub code_verifier: String,
    /// Sent in the authorization URL.
    pub code_challenge: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .finish()
    }
}

impl PkcePair {
    /// Draw a new verifier from `source` and derive its challenge.
    pub fn generate(source: &dyn TokenSource) -> Result<Self> {
        let code_verifier = source.generate(PKCE_VERIFIER_BYTES)?;
        Ok(Self::from_verifier(code_verifier))
    }

    /// Derive the challenge for an existing verifier.
    pub fn from_verifier(code_verifier: String) -> Self {
        let code_challenge = pkce_challenge(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
        }
    }
}

/// Derive the PKCE code challenge from a code verifier using SHA-256.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn pkce_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
