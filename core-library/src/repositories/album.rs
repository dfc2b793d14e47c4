//! Album repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{Album, AlbumId, AlbumRow};
use crate::session::DbSession;
use async_trait::async_trait;
use core_runtime::config::GalleryId;
use sqlx::{query, query_as, query_scalar};
use std::path::Path;
use std::sync::Arc;

const ALBUM_COLUMNS: &str = "id, gallery_id, parent_id, directory_name, physical_path, title, \
     summary, is_private, thumbnail_media_object_id, created_by, date_added, \
     last_modified_by, date_last_modified";

/// Album repository interface for data access operations
///
/// Every album returned is a writable instance owned by the caller.
#[async_trait]
pub trait AlbumRepository: Send + Sync {
    /// Find an album by its ID
    ///
    /// # Returns
    /// - `Ok(Some(album))` if found
    /// - `Ok(None)` if not found
    async fn find_by_id(&self, id: AlbumId) -> Result<Option<Album>>;

    /// Find the root album of a gallery
    async fn find_root(&self, gallery_id: GalleryId) -> Result<Option<Album>>;

    /// Find an album by its physical directory
    async fn find_by_path(&self, gallery_id: GalleryId, path: &Path) -> Result<Option<Album>>;

    /// IDs of the immediate child albums, ordered by directory name
    async fn find_child_ids(&self, id: AlbumId) -> Result<Vec<AlbumId>>;

    /// Insert or update an album, assigning `album.id` on insert
    ///
    /// # Errors
    /// Returns error if:
    /// - The instance is read-only
    /// - Album validation fails
    /// - An update targets a missing row
    async fn save(&self, album: &mut Album) -> Result<AlbumId>;

    /// Delete an album and, through the schema cascade, its descendants
    ///
    /// # Returns
    /// - `Ok(true)` if album was deleted
    /// - `Ok(false)` if album was not found
    async fn delete(&self, id: AlbumId) -> Result<bool>;

    /// Count albums in a gallery
    async fn count(&self, gallery_id: GalleryId) -> Result<i64>;
}

/// SQLite implementation of AlbumRepository
pub struct SqliteAlbumRepository {
    session: Arc<DbSession>,
}

impl SqliteAlbumRepository {
    pub fn new(session: Arc<DbSession>) -> Self {
        Self { session }
    }
}

fn select_where(clause: &str) -> String {
    format!("SELECT {} FROM albums WHERE {}", ALBUM_COLUMNS, clause)
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl AlbumRepository for SqliteAlbumRepository {
    async fn find_by_id(&self, id: AlbumId) -> Result<Option<Album>> {
        let mut conn = self.session.connection().await?;
        let row = query_as::<_, AlbumRow>(&select_where("id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(Album::from))
    }

    async fn find_root(&self, gallery_id: GalleryId) -> Result<Option<Album>> {
        let mut conn = self.session.connection().await?;
        let row = query_as::<_, AlbumRow>(&select_where("gallery_id = ? AND parent_id IS NULL"))
            .bind(gallery_id.value())
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(Album::from))
    }

    async fn find_by_path(&self, gallery_id: GalleryId, path: &Path) -> Result<Option<Album>> {
        let mut conn = self.session.connection().await?;
        let row = query_as::<_, AlbumRow>(&select_where("gallery_id = ? AND physical_path = ?"))
            .bind(gallery_id.value())
            .bind(path_to_string(path))
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(Album::from))
    }

    async fn find_child_ids(&self, id: AlbumId) -> Result<Vec<AlbumId>> {
        let mut conn = self.session.connection().await?;
        let ids = query_scalar::<_, i64>(
            "SELECT id FROM albums WHERE parent_id = ? ORDER BY directory_name ASC",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(ids.into_iter().map(AlbumId).collect())
    }

    async fn save(&self, album: &mut Album) -> Result<AlbumId> {
        let label = album
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| path_to_string(&album.physical_path));

        if !album.is_writable() {
            return Err(LibraryError::ReadOnly {
                entity_type: "Album".to_string(),
                id: label,
            });
        }

        album.validate().map_err(|e| LibraryError::InvalidInput {
            field: "Album".to_string(),
            message: e,
        })?;

        let mut conn = self.session.connection().await?;

        match album.id {
            None => {
                let result = query(
                    r#"
                    INSERT INTO albums (
                        gallery_id, parent_id, directory_name, physical_path, title, summary,
                        is_private, thumbnail_media_object_id, created_by, date_added,
                        last_modified_by, date_last_modified
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(album.gallery_id.value())
                .bind(album.parent_id)
                .bind(&album.directory_name)
                .bind(path_to_string(&album.physical_path))
                .bind(&album.title)
                .bind(&album.summary)
                .bind(album.is_private)
                .bind(album.thumbnail_media_object_id)
                .bind(&album.created_by)
                .bind(album.date_added)
                .bind(&album.last_modified_by)
                .bind(album.date_last_modified)
                .execute(&mut *conn)
                .await?;

                let id = AlbumId(result.last_insert_rowid());
                album.id = Some(id);
                Ok(id)
            }
            Some(id) => {
                let result = query(
                    r#"
                    UPDATE albums
                    SET parent_id = ?, directory_name = ?, physical_path = ?, title = ?,
                        summary = ?, is_private = ?, thumbnail_media_object_id = ?,
                        last_modified_by = ?, date_last_modified = ?
                    WHERE id = ?
                    "#,
                )
                .bind(album.parent_id)
                .bind(&album.directory_name)
                .bind(path_to_string(&album.physical_path))
                .bind(&album.title)
                .bind(&album.summary)
                .bind(album.is_private)
                .bind(album.thumbnail_media_object_id)
                .bind(&album.last_modified_by)
                .bind(album.date_last_modified)
                .bind(id)
                .execute(&mut *conn)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(LibraryError::NotFound {
                        entity_type: "Album".to_string(),
                        id: label,
                    });
                }

                Ok(id)
            }
        }
    }

    async fn delete(&self, id: AlbumId) -> Result<bool> {
        let mut conn = self.session.connection().await?;
        let result = query("DELETE FROM albums WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, gallery_id: GalleryId) -> Result<i64> {
        let mut conn = self.session.connection().await?;
        let count = query_scalar::<_, i64>("SELECT COUNT(*) FROM albums WHERE gallery_id = ?")
            .bind(gallery_id.value())
            .fetch_one(&mut *conn)
            .await?;

        Ok(count)
    }
}
