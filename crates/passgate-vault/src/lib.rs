//! Cryptographic vault for Passgate.
//!
//! This crate holds the primitives the sign-in flow needs from `ring`:
//! opaque random tokens for `state`, `nonce` and PKCE verifiers, and a
//! constant-time comparison for checking them against what the browser
//! returns.
//!
//! # Modules
//!
//! - [`crypto`]: CSPRNG bytes and tokens, constant-time equality.
//! - [`error`]: Unified error types.
//!
//! # Quick Start
//!
//! ```rust
//! use passgate_vault::crypto;
//!
//! # fn example() -> passgate_vault::Result<()> {
//! let state = crypto::random_token(16)?;
//! assert_eq!(state.len(), 22);
//! assert!(crypto::constant_time_eq(state.as_bytes(), state.as_bytes()));
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod error;

pub use error::{Result, VaultError};
