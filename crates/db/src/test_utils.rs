//! Test utilities for database operations.
//!
//! Each [`TestDatabase`] is a migrated SQLite file in its own temporary
//! directory, removed when the value is dropped.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, DbErr, Set};
use sea_orm_migration::MigratorTrait;
use tempfile::TempDir;
use tracing::info;

use crate::entities::user;
use crate::migrations::Migrator;

/// A throwaway migrated database.
pub struct TestDatabase {
    /// Database connection.
    pub conn: DatabaseConnection,
    _dir: TempDir,
}

impl TestDatabase {
    /// Create and migrate a new database.
    ///
    /// The pool holds a single connection so that transactions from concurrent
    /// tasks queue up instead of failing with `SQLITE_BUSY`.
    pub async fn new() -> Result<Self, DbErr> {
        let dir = tempfile::tempdir().map_err(|e| DbErr::Custom(e.to_string()))?;
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("atrium.db").display());

        let mut opt = ConnectOptions::new(url);
        opt.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;
        Migrator::up(&conn, None).await?;

        info!(path = %dir.path().display(), "Created test database");

        Ok(Self { conn, _dir: dir })
    }

    /// Get the database connection.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Shared handle as taken by repositories.
    #[must_use]
    pub fn shared(&self) -> Arc<DatabaseConnection> {
        // `DatabaseConnection` loses its `Clone` impl when sea-orm's `mock`
        // feature is on (as it is for this crate's tests), so clone the pool
        // handle by variant instead.
        let conn = match &self.conn {
            DatabaseConnection::SqlxSqlitePoolConnection(c) => {
                DatabaseConnection::SqlxSqlitePoolConnection(c.clone())
            }
            DatabaseConnection::SqlxPostgresPoolConnection(c) => {
                DatabaseConnection::SqlxPostgresPoolConnection(c.clone())
            }
            _ => DatabaseConnection::Disconnected,
        };
        Arc::new(conn)
    }
}

/// Insert a user whose token is `token-{username}`.
pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    display_name: &str,
) -> Result<user::Model, DbErr> {
    user::ActiveModel {
        username: Set(username.to_string()),
        display_name: Set(display_name.to_string()),
        avatar_url: Set(None),
        token: Set(Some(format!("token-{username}"))),
        created_at: Set(Utc::now().into()),
        ..Default::default()
    }
    .insert(db)
    .await
}
