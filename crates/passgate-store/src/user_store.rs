//! User directory persistence.
//!
//! Maps provider subject identifiers (`external_id`) to local user records.
//! A record is created the first time a subject signs in and its
//! `login_count` grows by one on every successful login afterwards.
//!
//! The `external_id` column carries a UNIQUE constraint, and
//! [`UserDirectory::record_login`] folds find-or-create and the increment
//! into one `INSERT … ON CONFLICT DO UPDATE` statement, so two callbacks
//! racing for the same subject can neither duplicate the record nor lose
//! a login.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A local user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable local identifier (UUID v4), never reused.
    pub id: String,
    /// The provider's subject identifier.
    pub external_id: String,
    /// Display name as reported by the provider at first sign-in.
    pub name: String,
    /// Profile picture URL as reported by the provider at first sign-in.
    pub picture_url: String,
    /// Number of successful logins.
    pub login_count: i64,
    /// Unix timestamp when the record was created.
    pub created_at: i64,
    /// Unix timestamp of the last change (usually the last login).
    pub updated_at: i64,
}

/// Profile fields taken from verified ID token claims.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUser {
    pub external_id: String,
    pub name: String,
    pub picture_url: String,
}

// ═══════════════════════════════════════════════════════════════════════
//  Capability
// ═══════════════════════════════════════════════════════════════════════

/// The user directory as seen by the sign-in flow.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fetch a record by its local id.
    async fn get(&self, user_id: &str) -> StoreResult<Option<UserRecord>>;

    /// Fetch a record by provider subject.
    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<UserRecord>>;

    /// Create a record with `login_count = 0`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the subject is known.
    async fn create(&self, user: NewUser) -> StoreResult<UserRecord>;

    /// Add one to a record's `login_count`.
    async fn increment_login(&self, user_id: &str) -> StoreResult<UserRecord>;

    /// Find-or-create the record for `user.external_id` and count one login,
    /// as a single atomic unit.
    async fn record_login(&self, user: NewUser) -> StoreResult<UserRecord>;
}

// ═══════════════════════════════════════════════════════════════════════
//  UserStore
// ═══════════════════════════════════════════════════════════════════════

const USER_COLUMNS: &str = "id, external_id, name, picture_url, login_count, created_at, updated_at";

/// SQLite-backed [`UserDirectory`].
#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    /// Create a new user store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the total number of users.
    #[instrument(skip(self))]
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
    }
}

#[async_trait]
impl UserDirectory for UserStore {
    #[instrument(skip(self))]
    async fn get(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        let user_id = user_id.to_string();
        self.db
            .execute(move |conn| select_one(conn, "id", &user_id))
            .await
    }

    #[instrument(skip(self))]
    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<UserRecord>> {
        let external_id = external_id.to_string();
        self.db
            .execute(move |conn| select_one(conn, "external_id", &external_id))
            .await
    }

    #[instrument(skip(self, user), fields(external_id = %user.external_id))]
    async fn create(&self, user: NewUser) -> StoreResult<UserRecord> {
        validate(&user)?;

        let now = Utc::now().timestamp();
        let record = UserRecord {
            id: Uuid::new_v4().to_string(),
            external_id: user.external_id,
            name: user.name,
            picture_url: user.picture_url,
            login_count: 0,
            created_at: now,
            updated_at: now,
        };

        let row = record.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, external_id, name, picture_url, login_count, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
                    rusqlite::params![row.id, row.external_id, row.name, row.picture_url, row.created_at],
                )
                .map_err(|e| {
                    if let rusqlite::Error::SqliteFailure(ref err, _) = e
                        && err.code == rusqlite::ErrorCode::ConstraintViolation
                    {
                        return StoreError::AlreadyExists {
                            entity: "user",
                            key: row.external_id.clone(),
                        };
                    }
                    StoreError::Sqlite(e)
                })?;
                Ok(())
            })
            .await?;

        debug!(user_id = %record.id, "user created");
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn increment_login(&self, user_id: &str) -> StoreResult<UserRecord> {
        let user_id = user_id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn
                    .query_row(
                        &format!(
                            "UPDATE users SET login_count = login_count + 1, updated_at = ?2 \
                             WHERE id = ?1 RETURNING {USER_COLUMNS}"
                        ),
                        rusqlite::params![user_id, now],
                        map_user,
                    )
                    .optional()?;
                updated.ok_or(StoreError::NotFound {
                    entity: "user",
                    id: user_id,
                })
            })
            .await
    }

    #[instrument(skip(self, user), fields(external_id = %user.external_id))]
    async fn record_login(&self, user: NewUser) -> StoreResult<UserRecord> {
        validate(&user)?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        let record = self
            .db
            .execute(move |conn| {
                let record = conn.query_row(
                    &format!(
                        "INSERT INTO users (id, external_id, name, picture_url, login_count, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5) \
                         ON CONFLICT(external_id) DO UPDATE SET \
                             login_count = login_count + 1, \
                             updated_at = excluded.updated_at \
                         RETURNING {USER_COLUMNS}"
                    ),
                    rusqlite::params![id, user.external_id, user.name, user.picture_url, now],
                    map_user,
                )?;
                Ok(record)
            })
            .await?;

        if record.login_count == 1 {
            debug!(user_id = %record.id, "first login, user created");
        } else {
            debug!(user_id = %record.id, login_count = record.login_count, "returning user");
        }
        Ok(record)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

fn validate(user: &NewUser) -> StoreResult<()> {
    if user.external_id.is_empty() {
        return Err(StoreError::InvalidArgument(
            "external_id must not be empty".into(),
        ));
    }
    Ok(())
}

fn select_one(conn: &Connection, column: &str, value: &str) -> StoreResult<Option<UserRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"),
            rusqlite::params![value],
            map_user,
        )
        .optional()?;
    Ok(record)
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        picture_url: row.get(3)?,
        login_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> UserStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        UserStore::new(db)
    }

    fn ada() -> NewUser {
        NewUser {
            external_id: "ext-42".into(),
            name: "Ada".into(),
            picture_url: "https://example.com/ada.png".into(),
        }
    }

    #[tokio::test]
    async fn create_and_find() {
        let store = setup_store().await;

        let created = store.create(ada()).await.unwrap();
        assert_eq!(created.login_count, 0);
        assert_eq!(created.external_id, "ext-42");
        assert!(Uuid::parse_str(&created.id).is_ok());

        let found = store.find_by_external_id("ext-42").await.unwrap().unwrap();
        assert_eq!(found, created);

        let by_id = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(by_id, created);
    }

    #[tokio::test]
    async fn unknown_subject_returns_none() {
        let store = setup_store().await;
        assert!(store.find_by_external_id("nobody").await.unwrap().is_none());
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let store = setup_store().await;
        store.create(ada()).await.unwrap();

        let err = store.create(ada()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn increment_login_counts_up() {
        let store = setup_store().await;
        let user = store.create(ada()).await.unwrap();

        store.increment_login(&user.id).await.unwrap();
        let after = store.increment_login(&user.id).await.unwrap();
        assert_eq!(after.login_count, 2);
    }

    #[tokio::test]
    async fn increment_unknown_user_is_not_found() {
        let store = setup_store().await;
        let err = store.increment_login("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "user", .. }));
    }

    #[tokio::test]
    async fn record_login_creates_then_increments() {
        let store = setup_store().await;

        let first = store.record_login(ada()).await.unwrap();
        assert_eq!(first.login_count, 1);
        assert_eq!(first.name, "Ada");

        let second = store.record_login(ada()).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.login_count, 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn record_login_keeps_profile_from_first_sign_in() {
        let store = setup_store().await;
        store.record_login(ada()).await.unwrap();

        let renamed = NewUser {
            name: "Countess".into(),
            ..ada()
        };
        let record = store.record_login(renamed).await.unwrap();
        assert_eq!(record.name, "Ada");
    }

    #[tokio::test]
    async fn record_login_rejects_empty_subject() {
        let store = setup_store().await;
        let err = store.record_login(NewUser::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }
}
