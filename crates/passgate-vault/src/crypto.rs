//! Random generation and comparison using the `ring` crate.
//!
//! - **Random generation**: cryptographically secure random bytes and
//!   URL-safe opaque tokens from the system CSPRNG.
//! - **Comparison**: constant-time equality for secrets checked against
//!   attacker-controlled input.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, VaultError};

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`VaultError::RandomFailed`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf).map_err(|_| VaultError::RandomFailed {
        reason: format!("system rng could not fill {len} bytes"),
    })?;
    Ok(buf)
}

/// Generate an opaque URL-safe token from `len_bytes` random bytes.
///
/// The output is base64url without padding, so it can be embedded in a
/// query string as-is. 16 bytes yield 22 characters, 32 bytes yield 43.
///
/// # Errors
///
/// Returns [`VaultError::RandomFailed`] if the system CSPRNG fails.
pub fn random_token(len_bytes: usize) -> Result<String> {
    let bytes = random_bytes(len_bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Constant-time equality for secrets compared against attacker input.
#[allow(deprecated)]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    ring::constant_time::verify_slices_are_equal(a, b).is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_have_requested_length() {
        assert_eq!(random_bytes(0).unwrap().len(), 0);
        assert_eq!(random_bytes(32).unwrap().len(), 32);
    }

    #[test]
    fn random_token_lengths() {
        assert_eq!(random_token(16).unwrap().len(), 22);
        assert_eq!(random_token(32).unwrap().len(), 43);
    }

    #[test]
    fn random_token_is_url_safe_and_unique() {
        let t1 = random_token(32).unwrap();
        let t2 = random_token(32).unwrap();
        assert_ne!(t1, t2);
        for c in t1.chars() {
            assert!(
                c.is_ascii_alphanumeric() || c == '-' || c == '_',
                "unexpected character in token: {c}"
            );
        }
    }

    #[test]
    fn constant_time_eq_behaviour() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
