//! Database layer for atrium.
//!
//! PostgreSQL and SQLite are both supported; the backend is picked from the
//! URL scheme.

pub mod entities;
pub mod migrations;
pub mod repositories;
pub mod test_utils;

use std::time::Duration;

use atrium_common::{AppError, AppResult, config::DatabaseConfig};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tracing::info;
use tracing::log::LevelFilter;

/// Whether `url` points at a SQLite database.
#[must_use]
pub fn is_sqlite_url(url: &str) -> bool {
    url.starts_with("sqlite:")
}

/// Open the connection pool.
///
/// SQLite gets a single pooled connection: it allows one writer at a time and
/// concurrent transactions would otherwise fail with `SQLITE_BUSY`.
pub async fn init(config: &DatabaseConfig) -> AppResult<DatabaseConnection> {
    let mut opt = ConnectOptions::new(&config.url);

    let (max, min) = if is_sqlite_url(&config.url) {
        (1, 1)
    } else {
        (config.max_connections, config.min_connections.min(config.max_connections))
    };

    opt.max_connections(max)
        .min_connections(min)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Debug);

    let db = Database::connect(opt)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    info!(backend = ?db.get_database_backend(), max_connections = max, "Database pool opened");
    Ok(db)
}

/// Run pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> AppResult<()> {
    let pending = migrations::Migrator::get_pending_migrations(db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    if pending.is_empty() {
        return Ok(());
    }

    info!(count = pending.len(), "Applying migrations");
    migrations::Migrator::up(db, None)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}
