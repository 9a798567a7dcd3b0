//! Vault error types.

/// Unified error type for the Passgate vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The system CSPRNG failed.
    #[error("random generation failed: {reason}")]
    RandomFailed { reason: String },
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
