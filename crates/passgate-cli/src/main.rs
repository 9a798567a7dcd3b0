//! CLI entry point for Passgate.
//!
//! This binary provides the `passgate` command with subcommands for serving
//! the sign-in front end and validating its configuration.

mod settings;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use passgate_auth::FlowController;
use passgate_store::{Database, UserStore};
use passgate_web::{WebConfig, WebServer, cookie_key};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Passgate: OpenID Connect sign-in for a small web application.
#[derive(Parser)]
#[command(
    name = "passgate",
    version,
    about = "Passgate: OpenID Connect sign-in with PKCE",
    long_about = "Runs the relying-party side of an OpenID Connect authorization code flow \
                  with PKCE, keeping users in SQLite and sessions in encrypted cookies."
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server.
    Serve,

    /// Validate the configuration and exit.
    CheckConfig,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load `.env` before the filter reads `RUST_LOG`.
    let env_file = dotenvy::dotenv();
    init_tracing("info", cli.json_logs);

    match env_file {
        Ok(path) => info!(path = %path.display(), "loaded environment file"),
        Err(err) if err.not_found() => {}
        Err(err) => return Err(err).context("failed to read .env"),
    }

    match cli.command {
        Commands::Serve => cmd_serve().await,
        Commands::CheckConfig => cmd_check_config(),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve() -> Result<()> {
    // 1. Load config.
    let settings = Settings::from_env().context("invalid configuration")?;
    info!(
        issuer = %settings.oidc.issuer,
        redirect_uri = %settings.oidc.redirect_uri,
        "configuration loaded"
    );

    // 2. Initialize the store (SQLite).
    let db = Database::open_and_migrate(settings.database.clone())
        .await
        .context("failed to open database")?;
    let users = UserStore::new(db);
    let known_users = users.count().await.context("failed to read user directory")?;
    info!(path = %settings.database.display(), users = known_users, "store initialized");

    // 3. Assemble the sign-in flow.
    let flow = FlowController::from_config(settings.oidc, Arc::new(users))
        .context("failed to build provider clients")?;
    let key = cookie_key(settings.session_password.as_bytes())
        .context("SESSION_PASSWORD is too short to derive a cookie key")?;

    // 4. Serve until ctrl-c.
    WebServer::new(WebConfig::from(settings.bind), flow, key)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("web server failed")
}

// ---------------------------------------------------------------------------
// Subcommand: check-config
// ---------------------------------------------------------------------------

fn cmd_check_config() -> Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;
    cookie_key(settings.session_password.as_bytes())
        .context("SESSION_PASSWORD is too short to derive a cookie key")?;

    println!();
    println!("  Passgate configuration");
    println!("  ======================");
    println!();
    println!("  Client id:        {}", settings.oidc.client_id);
    println!("  Redirect URI:     {}", settings.oidc.redirect_uri);
    println!("  Issuer:           {}", settings.oidc.issuer);
    println!("  Token endpoint:   {}", settings.oidc.token_endpoint);
    println!("  JWKS endpoint:    {}", settings.oidc.jwks_endpoint);
    println!("  HTTP timeout:     {}s", settings.oidc.http_timeout.as_secs());
    println!("  Database:         {}", settings.database.display());
    println!("  Listen address:   {}", settings.bind);
    println!(
        "  Secure cookies:   {}",
        if settings.oidc.uses_https() { "yes" } else { "no" }
    );
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
