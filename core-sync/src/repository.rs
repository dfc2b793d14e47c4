//! # Sync Run Repository
//!
//! Persists one row per synchronization run.
//!
//! ## Overview
//!
//! A run is written twice: when it starts and when it finishes. Progress in
//! between lives only in memory (see [`SyncStatus`]), so polling never
//! touches the store. Rows give galleries a history of past runs, including
//! the items each run skipped.

use crate::status::{SkippedItem, SyncRunId, SyncState, SyncStats, SyncStatus};
use crate::{Result, SyncError};
use async_trait::async_trait;
use core_library::{AlbumId, DbSession};
use core_runtime::config::GalleryId;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::PathBuf;
use std::sync::Arc;

/// Persisted summary of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunRecord {
    pub run_id: SyncRunId,
    pub gallery_id: GalleryId,
    pub root_album_id: Option<AlbumId>,
    pub root_path: PathBuf,
    pub state: SyncState,
    pub recursive: bool,
    pub total_files: u64,
    pub files_processed: u64,
    pub stats: SyncStats,
    pub skipped: Vec<SkippedItem>,
    pub error_message: Option<String>,
    pub started_by: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl SyncRunRecord {
    pub fn from_status(status: &SyncStatus, root_album_id: Option<AlbumId>, recursive: bool) -> Self {
        Self {
            run_id: status.run_id,
            gallery_id: status.gallery_id,
            root_album_id,
            root_path: status.root_path.clone(),
            state: status.state,
            recursive,
            total_files: status.total_file_count,
            files_processed: status.current_file_index,
            stats: status.stats,
            skipped: status.skipped.clone(),
            error_message: status.error_message.clone(),
            started_by: status.started_by.clone(),
            started_at: status.started_at,
            completed_at: status.completed_at,
        }
    }
}

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for sync run persistence
#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    /// Insert a run when it starts
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn insert(&self, run: &SyncRunRecord) -> Result<()>;

    /// Overwrite a run's row when it finishes
    ///
    /// # Errors
    ///
    /// Returns an error if the run doesn't exist or the database operation fails
    async fn update(&self, run: &SyncRunRecord) -> Result<()>;

    /// Find a run by ID
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_id(&self, id: &SyncRunId) -> Result<Option<SyncRunRecord>>;

    /// Most recent run for a gallery
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_latest(&self, gallery_id: GalleryId) -> Result<Option<SyncRunRecord>>;

    /// Runs for a gallery, most recent first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn get_history(&self, gallery_id: GalleryId, limit: u32) -> Result<Vec<SyncRunRecord>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of SyncRunRepository
pub struct SqliteSyncRunRepository {
    session: Arc<DbSession>,
}

impl SqliteSyncRunRepository {
    pub fn new(session: Arc<DbSession>) -> Self {
        Self { session }
    }
}

const SYNC_RUN_COLUMNS: &str = "id, gallery_id, root_album_id, root_path, state, recursive, \
     total_files, files_processed, albums_created, albums_updated, albums_deleted, \
     media_objects_created, media_objects_updated, media_objects_deleted, \
     derived_files_deleted, files_skipped, skipped_items, error_message, started_by, \
     started_at, completed_at";

/// Database row representation of a sync run
#[derive(Debug, FromRow)]
struct SyncRunRow {
    id: String,
    gallery_id: i64,
    root_album_id: Option<i64>,
    root_path: String,
    state: String,
    recursive: bool,
    total_files: i64,
    files_processed: i64,
    albums_created: i64,
    albums_updated: i64,
    albums_deleted: i64,
    media_objects_created: i64,
    media_objects_updated: i64,
    media_objects_deleted: i64,
    derived_files_deleted: i64,
    files_skipped: i64,
    skipped_items: String,
    error_message: Option<String>,
    started_by: String,
    started_at: i64,
    completed_at: Option<i64>,
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl TryFrom<SyncRunRow> for SyncRunRecord {
    type Error = SyncError;

    fn try_from(row: SyncRunRow) -> Result<Self> {
        let skipped: Vec<SkippedItem> = serde_json::from_str(&row.skipped_items)
            .map_err(|e| SyncError::Database(format!("Invalid skipped_items: {}", e)))?;

        Ok(SyncRunRecord {
            run_id: SyncRunId::from_string(&row.id)?,
            gallery_id: GalleryId(row.gallery_id),
            root_album_id: row.root_album_id.map(AlbumId),
            root_path: PathBuf::from(row.root_path),
            state: row.state.parse()?,
            recursive: row.recursive,
            total_files: to_u64(row.total_files),
            files_processed: to_u64(row.files_processed),
            stats: SyncStats {
                albums_created: to_u64(row.albums_created),
                albums_updated: to_u64(row.albums_updated),
                albums_deleted: to_u64(row.albums_deleted),
                media_objects_created: to_u64(row.media_objects_created),
                media_objects_updated: to_u64(row.media_objects_updated),
                media_objects_deleted: to_u64(row.media_objects_deleted),
                derived_files_deleted: to_u64(row.derived_files_deleted),
                files_skipped: to_u64(row.files_skipped),
            },
            skipped,
            error_message: row.error_message,
            started_by: row.started_by,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

fn skipped_json(run: &SyncRunRecord) -> Result<String> {
    serde_json::to_string(&run.skipped)
        .map_err(|e| SyncError::Database(format!("Cannot encode skipped items: {}", e)))
}

#[async_trait]
impl SyncRunRepository for SqliteSyncRunRepository {
    async fn insert(&self, run: &SyncRunRecord) -> Result<()> {
        let skipped = skipped_json(run)?;
        let mut conn = self.session.connection().await?;

        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                id, gallery_id, root_album_id, root_path, state, recursive,
                total_files, files_processed, albums_created, albums_updated, albums_deleted,
                media_objects_created, media_objects_updated, media_objects_deleted,
                derived_files_deleted, files_skipped, skipped_items, error_message, started_by,
                started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.run_id.as_str())
        .bind(run.gallery_id.value())
        .bind(run.root_album_id)
        .bind(run.root_path.to_string_lossy().into_owned())
        .bind(run.state.as_str())
        .bind(run.recursive)
        .bind(to_i64(run.total_files))
        .bind(to_i64(run.files_processed))
        .bind(to_i64(run.stats.albums_created))
        .bind(to_i64(run.stats.albums_updated))
        .bind(to_i64(run.stats.albums_deleted))
        .bind(to_i64(run.stats.media_objects_created))
        .bind(to_i64(run.stats.media_objects_updated))
        .bind(to_i64(run.stats.media_objects_deleted))
        .bind(to_i64(run.stats.derived_files_deleted))
        .bind(to_i64(run.stats.files_skipped))
        .bind(skipped)
        .bind(&run.error_message)
        .bind(&run.started_by)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn update(&self, run: &SyncRunRecord) -> Result<()> {
        let skipped = skipped_json(run)?;
        let mut conn = self.session.connection().await?;

        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET
                root_album_id = ?,
                state = ?,
                total_files = ?,
                files_processed = ?,
                albums_created = ?,
                albums_updated = ?,
                albums_deleted = ?,
                media_objects_created = ?,
                media_objects_updated = ?,
                media_objects_deleted = ?,
                derived_files_deleted = ?,
                files_skipped = ?,
                skipped_items = ?,
                error_message = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(run.root_album_id)
        .bind(run.state.as_str())
        .bind(to_i64(run.total_files))
        .bind(to_i64(run.files_processed))
        .bind(to_i64(run.stats.albums_created))
        .bind(to_i64(run.stats.albums_updated))
        .bind(to_i64(run.stats.albums_deleted))
        .bind(to_i64(run.stats.media_objects_created))
        .bind(to_i64(run.stats.media_objects_updated))
        .bind(to_i64(run.stats.media_objects_deleted))
        .bind(to_i64(run.stats.derived_files_deleted))
        .bind(to_i64(run.stats.files_skipped))
        .bind(skipped)
        .bind(&run.error_message)
        .bind(run.completed_at)
        .bind(run.run_id.as_str())
        .execute(&mut *conn)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::Database(format!(
                "Sync run {} not found",
                run.run_id
            )));
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &SyncRunId) -> Result<Option<SyncRunRecord>> {
        let mut conn = self.session.connection().await?;
        let row = sqlx::query_as::<_, SyncRunRow>(&format!(
            "SELECT {} FROM sync_runs WHERE id = ?",
            SYNC_RUN_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncRunRecord::try_from).transpose()
    }

    async fn find_latest(&self, gallery_id: GalleryId) -> Result<Option<SyncRunRecord>> {
        Ok(self.get_history(gallery_id, 1).await?.into_iter().next())
    }

    async fn get_history(&self, gallery_id: GalleryId, limit: u32) -> Result<Vec<SyncRunRecord>> {
        let mut conn = self.session.connection().await?;
        let rows = sqlx::query_as::<_, SyncRunRow>(&format!(
            "SELECT {} FROM sync_runs WHERE gallery_id = ? \
             ORDER BY started_at DESC, rowid DESC LIMIT ?",
            SYNC_RUN_COLUMNS
        ))
        .bind(gallery_id.value())
        .bind(i64::from(limit))
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(SyncRunRecord::try_from)
            .collect::<Result<Vec<_>>>()
    }
}
