//! # passgate-store
//!
//! Storage engine for Passgate.
//!
//! Provides the SQLite-backed user directory that maps provider subjects to
//! local user records and counts their logins.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  UserDirectory (async trait)            │
//! │    └─ UserStore (users table)           │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL, blocking pool) │
//! │  Migrations (versioned, transactional)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use passgate_store::{Database, NewUser, UserDirectory, UserStore};
//!
//! let db = Database::open_and_migrate("data/passgate.db").await?;
//! let users = UserStore::new(db);
//! let user = users.record_login(NewUser {
//!     external_id: "ext-42".into(),
//!     name: "Ada".into(),
//!     picture_url: String::new(),
//! }).await?;
//! assert_eq!(user.login_count, 1);
//! ```

pub mod db;
pub mod error;
pub mod migration;
pub mod user_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use user_store::{NewUser, UserDirectory, UserRecord, UserStore};
