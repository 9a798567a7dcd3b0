//! Startup settings read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use passgate_auth::OidcConfig;
use passgate_auth::config::{optional_var, required_var};

/// Minimum length of `SESSION_PASSWORD` in bytes.
pub const MIN_SESSION_PASSWORD_LEN: usize = passgate_web::cookies::MIN_SECRET_LEN;

pub const DEFAULT_DATABASE: &str = "data/passgate.db";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Everything `passgate serve` needs.
pub struct Settings {
    pub oidc: OidcConfig,
    pub session_password: String,
    pub database: PathBuf,
    pub bind: SocketAddr,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("oidc", &self.oidc)
            .field("session_password", &"<redacted>")
            .field("database", &self.database)
            .field("bind", &self.bind)
            .finish()
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`. Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let oidc = OidcConfig::from_lookup(&lookup)?;

        let session_password = required_var(&lookup, "SESSION_PASSWORD")?;
        if session_password.len() < MIN_SESSION_PASSWORD_LEN {
            bail!("SESSION_PASSWORD must be at least {MIN_SESSION_PASSWORD_LEN} bytes");
        }

        let database = optional_var(&lookup, "PASSGATE_DATABASE")
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string())
            .into();

        let bind = optional_var(&lookup, "PASSGATE_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind
            .parse()
            .with_context(|| format!("PASSGATE_BIND is not a socket address: {bind:?}"))?;

        Ok(Self {
            oidc,
            session_password,
            database,
            bind,
        })
    }
}
