//! # Gallery Data Store
//!
//! Opens the SQLite database that holds albums, media objects, their metadata
//! and the synchronization run history. Every pool handed out by this module
//! has the gallery schema applied.
//!
//! Connections run in WAL mode with foreign keys on, since album deletion
//! relies on `ON DELETE CASCADE` to remove descendant albums and their media
//! objects.
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//! use core_library::session::DbSession;
//!
//! let pool = create_pool(DatabaseConfig::new("/var/lib/gallery/gallery.db")).await?;
//! let session = std::sync::Arc::new(DbSession::new(pool));
//! ```
//!
//! Tests use [`create_test_pool`], an in-memory store with the same schema.

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Where the gallery store lives and how many connections it may use.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<file>` or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    /// How long a repository call waits for a free connection
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    /// Store backed by the file at `database_path`, created on first use.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        Self {
            database_url: format!("sqlite:{}", path.display()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Store that lives as long as the pool.
    pub fn in_memory() -> Self {
        Self {
            database_url: IN_MEMORY_URL.to_string(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url == IN_MEMORY_URL
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Open the gallery store, apply the schema and check that it answers.
///
/// # Errors
///
/// Returns `Database` if the file cannot be opened or the health check
/// fails, and `Migration` if the schema cannot be applied.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Opening gallery store"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(LibraryError::Database)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true);

    // An in-memory store is dropped with its last connection, so one is kept open
    let mut pool_options = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout);
    if config.is_in_memory() {
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }

    let pool = pool_options
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Cannot open gallery store");
            LibraryError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    info!(connections = pool.size(), "Gallery store ready");
    Ok(pool)
}

/// In-memory store with the gallery schema applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Gallery schema migration failed");
            LibraryError::Migration(e.to_string())
        })?;

    debug!("Gallery schema is up to date");
    Ok(())
}

async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Gallery store health check failed");
        LibraryError::Database(e)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_targets() {
        let file = DatabaseConfig::new("/var/lib/gallery/gallery.db").max_connections(2);
        assert_eq!(file.database_url, "sqlite:/var/lib/gallery/gallery.db");
        assert_eq!(file.max_connections, 2);
        assert!(!file.is_in_memory());
        assert!(DatabaseConfig::default().is_in_memory());
    }

    #[tokio::test]
    async fn test_file_store_is_created_with_wal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gallery.db");

        let pool = create_pool(DatabaseConfig::new(&path)).await.unwrap();
        assert!(path.exists());

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_reopening_a_file_store_keeps_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gallery.db");

        let pool = create_pool(DatabaseConfig::new(&path)).await.unwrap();
        sqlx::query(
            "INSERT INTO sync_runs (id, gallery_id, root_path, state, recursive, started_by, started_at) \
             VALUES ('r1', 1, '/g', 'Complete', 1, 'admin', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        // Migrations are already applied, so the second open must not fail
        let pool = create_pool(DatabaseConfig::new(&path)).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_runs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_test_pool().await.unwrap();

        let (enabled,): (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let pool = create_test_pool().await.unwrap();

        for table in ["albums", "media_objects", "media_metadata", "sync_runs"] {
            let (count,): (i32,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();

            assert_eq!(count, 1, "{} table should exist", table);
        }
    }

    #[tokio::test]
    async fn test_album_delete_cascades_to_media_objects() {
        let pool = create_test_pool().await.unwrap();

        sqlx::query(
            "INSERT INTO albums (id, gallery_id, parent_id, directory_name, physical_path, title, \
             created_by, date_added, last_modified_by, date_last_modified) \
             VALUES (1, 1, NULL, '', '/g', 'root', 'a', 0, 'a', 0), \
                    (2, 1, 1, 'trip', '/g/trip', 'trip', 'a', 0, 'a', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO media_objects (gallery_id, album_id, kind, hash_key, mime_type, title, \
             created_by, date_added, last_modified_by, date_last_modified) \
             VALUES (1, 2, 'video', 'h1', 'video/mp4', 'vid', 'a', 0, 'a', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query("DELETE FROM albums WHERE id = 1")
            .execute(&pool)
            .await
            .unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM media_objects")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
