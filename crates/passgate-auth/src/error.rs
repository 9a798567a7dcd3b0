//! Error types for the auth crate.
//!
//! Every fallible operation in this crate returns [`AuthError`]. The callback
//! pipeline translates these into the small set of browser-visible codes in
//! [`crate::flow::CallbackError`]; the detailed variant is only ever logged.

/// Unified error type for the Passgate auth crate.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The token endpoint rejected the authorization code exchange.
    #[error("token exchange rejected: {reason}")]
    TokenExchange {
        /// Explanation from the authorization server, or the HTTP status.
        reason: String,
    },

    /// The ID token failed signature or claims validation.
    #[error("id token rejected: {reason}")]
    IdToken {
        /// Which check failed.
        reason: String,
    },

    /// Signature or claims validation failed inside `jsonwebtoken`.
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The provider's key set could not be fetched or used.
    #[error("jwks error: {reason}")]
    Jwks {
        /// What went wrong fetching or reading the key set.
        reason: String,
    },

    /// A session store failed to load, save or destroy its value.
    #[error("session store error: {reason}")]
    Session {
        /// What the store was doing when it failed.
        reason: String,
    },

    /// An HTTP request to the provider failed (transport error or timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// An error propagated from the vault crate.
    #[error("vault error: {0}")]
    VaultError(#[from] passgate_vault::VaultError),

    /// An error propagated from the user directory.
    #[error("store error: {0}")]
    StoreError(#[from] passgate_store::StoreError),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
