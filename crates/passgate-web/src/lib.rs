//! Web front end for Passgate.
//!
//! This crate serves the browser side of the sign-in flow:
//!
//! - `GET /auth/login` starts an authorization attempt.
//! - `GET /auth/callback` completes it and sets the login session.
//! - `GET /auth/logout` clears the login session.
//! - `GET /` renders the landing page.
//!
//! Both sessions live in encrypted cookies (see [`cookies`]).

pub mod cookies;
pub mod frontend;
pub mod routes;
pub mod server;
pub mod state;

pub use cookies::{AUTH_COOKIE, CookieSession, LOGIN_COOKIE, SessionCookies, cookie_key};
pub use server::{WebServer, build_router};
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

impl From<std::net::SocketAddr> for WebConfig {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self {
            bind_addr: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}
