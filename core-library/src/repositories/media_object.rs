//! Media object repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{AlbumId, MediaObject, MediaObjectId, MediaObjectRow, MetadataItem};
use crate::session::DbSession;
use async_trait::async_trait;
use core_runtime::config::GalleryId;
use sqlx::{query, query_as, query_scalar, SqliteConnection};
use std::collections::HashMap;
use std::sync::Arc;

const MEDIA_OBJECT_COLUMNS: &str = "id, gallery_id, album_id, kind, external_html, hash_key, \
     mime_type, title, \
     original_file_name, original_path, original_width, original_height, original_size_kb, \
     optimized_file_name, optimized_path, optimized_width, optimized_height, optimized_size_kb, \
     thumbnail_file_name, thumbnail_path, thumbnail_width, thumbnail_height, thumbnail_size_kb, \
     created_by, date_added, last_modified_by, date_last_modified";

/// Media object repository interface
#[async_trait]
pub trait MediaObjectRepository: Send + Sync {
    /// Find a media object by its ID, including metadata
    async fn find_by_id(&self, id: MediaObjectId) -> Result<Option<MediaObject>>;

    /// All media objects directly inside an album, ordered by original file name
    async fn find_by_album(&self, album_id: AlbumId) -> Result<Vec<MediaObject>>;

    /// Every non-empty hash key in the gallery
    async fn find_hash_keys(&self, gallery_id: GalleryId) -> Result<Vec<String>>;

    /// Insert or update a media object and replace its metadata
    ///
    /// # Errors
    /// Returns error if:
    /// - The instance is read-only
    /// - Validation fails
    /// - The hash key collides with another object in the gallery
    async fn save(&self, media_object: &mut MediaObject) -> Result<MediaObjectId>;

    /// Delete a media object by ID
    ///
    /// # Returns
    /// - `Ok(true)` if deleted
    /// - `Ok(false)` if not found (already removed, e.g. by an album cascade)
    async fn delete(&self, id: MediaObjectId) -> Result<bool>;

    /// Count media objects in a gallery
    async fn count(&self, gallery_id: GalleryId) -> Result<i64>;
}

/// SQLite implementation of MediaObjectRepository
pub struct SqliteMediaObjectRepository {
    session: Arc<DbSession>,
}

impl SqliteMediaObjectRepository {
    pub fn new(session: Arc<DbSession>) -> Self {
        Self { session }
    }
}

fn select_where(clause: &str) -> String {
    format!(
        "SELECT {} FROM media_objects WHERE {}",
        MEDIA_OBJECT_COLUMNS, clause
    )
}

fn path_to_string(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    media_object_id: i64,
    name: String,
    value: String,
}

/// Load metadata for `objects` with a single query per album.
async fn attach_metadata(conn: &mut SqliteConnection, objects: &mut [MediaObject], album_id: AlbumId) -> Result<()> {
    if objects.is_empty() {
        return Ok(());
    }

    let rows = query_as::<_, MetadataRow>(
        r#"
        SELECT m.media_object_id, m.name, m.value
        FROM media_metadata m
        JOIN media_objects o ON o.id = m.media_object_id
        WHERE o.album_id = ?
        ORDER BY m.media_object_id, m.name
        "#,
    )
    .bind(album_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_object: HashMap<i64, Vec<MetadataItem>> = HashMap::new();
    for row in rows {
        by_object
            .entry(row.media_object_id)
            .or_default()
            .push(MetadataItem::new(row.name, row.value));
    }

    for object in objects.iter_mut() {
        if let Some(id) = object.id {
            object.metadata = by_object.remove(&id.0).unwrap_or_default();
        }
    }

    Ok(())
}

async fn replace_metadata(conn: &mut SqliteConnection, id: MediaObjectId, items: &[MetadataItem]) -> Result<()> {
    query("DELETE FROM media_metadata WHERE media_object_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    for item in items {
        query(
            "INSERT OR REPLACE INTO media_metadata (media_object_id, name, value) VALUES (?, ?, ?)",
        )
        .bind(id)
        .bind(&item.name)
        .bind(&item.value)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[async_trait]
impl MediaObjectRepository for SqliteMediaObjectRepository {
    async fn find_by_id(&self, id: MediaObjectId) -> Result<Option<MediaObject>> {
        let mut conn = self.session.connection().await?;
        let row = query_as::<_, MediaObjectRow>(&select_where("id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut object = MediaObject::try_from(row)?;
        let items = query_as::<_, MetadataItem>(
            "SELECT name, value FROM media_metadata WHERE media_object_id = ? ORDER BY name",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
        object.metadata = items;

        Ok(Some(object))
    }

    async fn find_by_album(&self, album_id: AlbumId) -> Result<Vec<MediaObject>> {
        let mut conn = self.session.connection().await?;
        let rows = query_as::<_, MediaObjectRow>(&format!(
            "{} ORDER BY original_file_name ASC, id ASC",
            select_where("album_id = ?")
        ))
        .bind(album_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut objects = rows
            .into_iter()
            .map(MediaObject::try_from)
            .collect::<Result<Vec<_>>>()?;
        attach_metadata(&mut conn, &mut objects, album_id).await?;

        Ok(objects)
    }

    async fn find_hash_keys(&self, gallery_id: GalleryId) -> Result<Vec<String>> {
        let mut conn = self.session.connection().await?;
        let keys = query_scalar::<_, String>(
            "SELECT hash_key FROM media_objects WHERE gallery_id = ? AND hash_key <> ''",
        )
        .bind(gallery_id.value())
        .fetch_all(&mut *conn)
        .await?;

        Ok(keys)
    }

    async fn save(&self, media_object: &mut MediaObject) -> Result<MediaObjectId> {
        let label = media_object
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| media_object.original.file_name.clone());

        if !media_object.is_writable() {
            return Err(LibraryError::ReadOnly {
                entity_type: "MediaObject".to_string(),
                id: label,
            });
        }

        media_object
            .validate()
            .map_err(|e| LibraryError::InvalidInput {
                field: "MediaObject".to_string(),
                message: e,
            })?;

        let external_html = match &media_object.variant {
            crate::models::MediaVariant::External { html } => Some(html.clone()),
            _ => None,
        };

        let o = &media_object.original;
        let p = &media_object.optimized;
        let t = &media_object.thumbnail;

        let mut conn = self.session.connection().await?;

        let id = match media_object.id {
            None => {
                let result = query(
                    r#"
                    INSERT INTO media_objects (
                        gallery_id, album_id, kind, external_html, hash_key, mime_type, title,
                        original_file_name, original_path, original_width, original_height, original_size_kb,
                        optimized_file_name, optimized_path, optimized_width, optimized_height, optimized_size_kb,
                        thumbnail_file_name, thumbnail_path, thumbnail_width, thumbnail_height, thumbnail_size_kb,
                        created_by, date_added, last_modified_by, date_last_modified
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(media_object.gallery_id.value())
                .bind(media_object.album_id)
                .bind(media_object.variant.as_str())
                .bind(&external_html)
                .bind(&media_object.hash_key)
                .bind(&media_object.mime_type)
                .bind(&media_object.title)
                .bind(&o.file_name)
                .bind(path_to_string(&o.physical_path))
                .bind(i64::from(o.width))
                .bind(i64::from(o.height))
                .bind(to_i64(o.size_kb))
                .bind(&p.file_name)
                .bind(path_to_string(&p.physical_path))
                .bind(i64::from(p.width))
                .bind(i64::from(p.height))
                .bind(to_i64(p.size_kb))
                .bind(&t.file_name)
                .bind(path_to_string(&t.physical_path))
                .bind(i64::from(t.width))
                .bind(i64::from(t.height))
                .bind(to_i64(t.size_kb))
                .bind(&media_object.created_by)
                .bind(media_object.date_added)
                .bind(&media_object.last_modified_by)
                .bind(media_object.date_last_modified)
                .execute(&mut *conn)
                .await?;

                MediaObjectId(result.last_insert_rowid())
            }
            Some(id) => {
                let result = query(
                    r#"
                    UPDATE media_objects
                    SET album_id = ?, kind = ?, external_html = ?, hash_key = ?, mime_type = ?, title = ?,
                        original_file_name = ?, original_path = ?, original_width = ?, original_height = ?, original_size_kb = ?,
                        optimized_file_name = ?, optimized_path = ?, optimized_width = ?, optimized_height = ?, optimized_size_kb = ?,
                        thumbnail_file_name = ?, thumbnail_path = ?, thumbnail_width = ?, thumbnail_height = ?, thumbnail_size_kb = ?,
                        last_modified_by = ?, date_last_modified = ?
                    WHERE id = ?
                    "#,
                )
                .bind(media_object.album_id)
                .bind(media_object.variant.as_str())
                .bind(&external_html)
                .bind(&media_object.hash_key)
                .bind(&media_object.mime_type)
                .bind(&media_object.title)
                .bind(&o.file_name)
                .bind(path_to_string(&o.physical_path))
                .bind(i64::from(o.width))
                .bind(i64::from(o.height))
                .bind(to_i64(o.size_kb))
                .bind(&p.file_name)
                .bind(path_to_string(&p.physical_path))
                .bind(i64::from(p.width))
                .bind(i64::from(p.height))
                .bind(to_i64(p.size_kb))
                .bind(&t.file_name)
                .bind(path_to_string(&t.physical_path))
                .bind(i64::from(t.width))
                .bind(i64::from(t.height))
                .bind(to_i64(t.size_kb))
                .bind(&media_object.last_modified_by)
                .bind(media_object.date_last_modified)
                .bind(id)
                .execute(&mut *conn)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(LibraryError::NotFound {
                        entity_type: "MediaObject".to_string(),
                        id: label,
                    });
                }

                id
            }
        };

        replace_metadata(&mut conn, id, &media_object.metadata).await?;
        media_object.id = Some(id);

        Ok(id)
    }

    async fn delete(&self, id: MediaObjectId) -> Result<bool> {
        let mut conn = self.session.connection().await?;
        let result = query("DELETE FROM media_objects WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, gallery_id: GalleryId) -> Result<i64> {
        let mut conn = self.session.connection().await?;
        let count =
            query_scalar::<_, i64>("SELECT COUNT(*) FROM media_objects WHERE gallery_id = ?")
                .bind(gallery_id.value())
                .fetch_one(&mut *conn)
                .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{Album, DisplayObject, MediaVariant};
    use crate::repositories::{AlbumRepository, SqliteAlbumRepository};

    struct Fixture {
        albums: SqliteAlbumRepository,
        media: SqliteMediaObjectRepository,
        root: Album,
    }

    async fn fixture() -> Fixture {
        let session = Arc::new(DbSession::new(create_test_pool().await.unwrap()));
        let albums = SqliteAlbumRepository::new(session.clone());
        let media = SqliteMediaObjectRepository::new(session);
        let mut root = Album::new_root(GalleryId(1), "/g", "admin");
        albums.save(&mut root).await.unwrap();
        Fixture { albums, media, root }
    }

    fn image(album_id: AlbumId, name: &str, hash: &str) -> MediaObject {
        let mut object = MediaObject::new(
            GalleryId(1),
            album_id,
            MediaVariant::Image,
            DisplayObject::new(format!("/g/{}", name), 640, 480, 120),
            "image/jpeg",
            "admin",
        );
        object.hash_key = hash.to_string();
        object
    }

    #[tokio::test]
    async fn test_save_and_load_with_metadata() {
        let f = fixture().await;
        let album_id = f.root.id.unwrap();

        let mut object = image(album_id, "b.jpg", "h-b");
        object.metadata = vec![
            MetadataItem::new("Camera", "X100"),
            MetadataItem::new("Aperture", "f/2"),
        ];
        let id = f.media.save(&mut object).await.unwrap();
        f.media.save(&mut image(album_id, "a.jpg", "h-a")).await.unwrap();

        let loaded = f.media.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(loaded.original.physical_path, std::path::PathBuf::from("/g/b.jpg"));
        assert_eq!(loaded.metadata.len(), 2);
        assert_eq!(loaded.metadata[0].name, "Aperture");

        let children = f.media.find_by_album(album_id).await.unwrap();
        let names: Vec<&str> = children.iter().map(|o| o.original.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg"]);
        assert_eq!(children[1].metadata.len(), 2);
        assert!(children[0].metadata.is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_metadata_and_moves_album() {
        let f = fixture().await;
        let root_id = f.root.id.unwrap();
        let mut trip = Album::new_child(&f.root, "trip", "admin");
        let trip_id = f.albums.save(&mut trip).await.unwrap();

        let mut object = image(root_id, "a.jpg", "h-a");
        object.metadata = vec![MetadataItem::new("Camera", "X100")];
        let id = f.media.save(&mut object).await.unwrap();

        object.album_id = trip_id;
        object.metadata = vec![MetadataItem::new("Duration", "00:01")];
        f.media.save(&mut object).await.unwrap();

        assert!(f.media.find_by_album(root_id).await.unwrap().is_empty());
        let moved = f.media.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(moved.album_id, trip_id);
        assert_eq!(moved.metadata, vec![MetadataItem::new("Duration", "00:01")]);
    }

    #[tokio::test]
    async fn test_hash_keys_are_unique_per_gallery() {
        let f = fixture().await;
        let album_id = f.root.id.unwrap();

        f.media.save(&mut image(album_id, "a.jpg", "same")).await.unwrap();
        let err = f.media.save(&mut image(album_id, "b.jpg", "same")).await;
        assert!(err.is_err());

        let keys = f.media.find_hash_keys(GalleryId(1)).await.unwrap();
        assert_eq!(keys, vec!["same".to_string()]);
    }

    #[tokio::test]
    async fn test_external_objects_skip_hash_uniqueness() {
        let f = fixture().await;
        let album_id = f.root.id.unwrap();

        for n in 0..2 {
            let mut external =
                MediaObject::new_external(GalleryId(1), album_id, "<iframe/>", format!("clip {}", n), "admin");
            f.media.save(&mut external).await.unwrap();
        }

        let children = f.media.find_by_album(album_id).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|o| o.variant.is_external()));
        assert!(f.media.find_hash_keys(GalleryId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_read_only_guard() {
        let f = fixture().await;
        let mut object = image(f.root.id.unwrap(), "a.jpg", "h");
        let id = f.media.save(&mut object).await.unwrap();

        let mut shared = object.read_only();
        assert!(matches!(
            f.media.save(&mut shared).await.unwrap_err(),
            LibraryError::ReadOnly { .. }
        ));

        assert!(f.media.delete(id).await.unwrap());
        assert!(!f.media.delete(id).await.unwrap());
        assert_eq!(f.media.count(GalleryId(1)).await.unwrap(), 0);
    }
}
