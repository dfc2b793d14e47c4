//! Domain models for the gallery library
//!
//! Albums mirror directories, media objects mirror files. Both carry a few
//! runtime-only flags used by the synchronization engine; those flags are never
//! persisted.

use core_runtime::config::{Dimensions, GalleryId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::LibraryError;

// =============================================================================
// ID Types
// =============================================================================

/// Store-assigned identifier of an album
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct AlbumId(pub i64);

impl fmt::Display for AlbumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned identifier of a media object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct MediaObjectId(pub i64);

impl fmt::Display for MediaObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// Album
// =============================================================================

/// Directory-backed container node.
///
/// Invariant: `physical_path == parent.physical_path.join(directory_name)`,
/// except for the root album whose path is the gallery media path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    /// `None` until first saved
    pub id: Option<AlbumId>,
    pub gallery_id: GalleryId,
    /// `None` for the root album
    pub parent_id: Option<AlbumId>,
    /// Last path component; empty for the root album
    pub directory_name: String,
    pub physical_path: PathBuf,
    pub title: String,
    pub summary: String,
    pub is_private: bool,
    pub thumbnail_media_object_id: Option<MediaObjectId>,
    pub created_by: String,
    pub date_added: i64,
    pub last_modified_by: String,
    pub date_last_modified: i64,

    /// Matched something on disk during the current run
    #[serde(skip)]
    pub is_synchronized: bool,
    /// Thumbnail reference should be reassigned when the run finalizes
    #[serde(skip)]
    pub regenerate_thumbnail_on_save: bool,
    #[serde(skip)]
    is_writable: bool,
}

impl Album {
    /// Create the root album of a gallery.
    pub fn new_root(gallery_id: GalleryId, media_path: impl Into<PathBuf>, actor: &str) -> Self {
        let ts = now();
        Self {
            id: None,
            gallery_id,
            parent_id: None,
            directory_name: String::new(),
            physical_path: media_path.into(),
            title: "All albums".to_string(),
            summary: String::new(),
            is_private: false,
            thumbnail_media_object_id: None,
            created_by: actor.to_string(),
            date_added: ts,
            last_modified_by: actor.to_string(),
            date_last_modified: ts,
            is_synchronized: true,
            regenerate_thumbnail_on_save: false,
            is_writable: true,
        }
    }

    /// Create a child album for `directory_name` under `parent`.
    ///
    /// The child inherits the parent's privacy and is marked synchronized.
    pub fn new_child(parent: &Album, directory_name: &str, actor: &str) -> Self {
        let ts = now();
        Self {
            id: None,
            gallery_id: parent.gallery_id,
            parent_id: parent.id,
            directory_name: directory_name.to_string(),
            physical_path: parent.physical_path.join(directory_name),
            title: directory_name.to_string(),
            summary: String::new(),
            is_private: parent.is_private,
            thumbnail_media_object_id: None,
            created_by: actor.to_string(),
            date_added: ts,
            last_modified_by: actor.to_string(),
            date_last_modified: ts,
            is_synchronized: true,
            regenerate_thumbnail_on_save: false,
            is_writable: true,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none() && self.directory_name.is_empty()
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// True when this instance may be mutated and saved.
    pub fn is_writable(&self) -> bool {
        self.is_writable
    }

    /// A shared, non-savable copy.
    pub fn read_only(&self) -> Self {
        Self {
            is_writable: false,
            ..self.clone()
        }
    }

    pub fn touch(&mut self, actor: &str) {
        self.last_modified_by = actor.to_string();
        self.date_last_modified = now();
    }

    /// Validate album data
    pub fn validate(&self) -> Result<(), String> {
        if self.physical_path.as_os_str().is_empty() {
            return Err("Album physical path cannot be empty".to_string());
        }

        if self.parent_id.is_some() && self.directory_name.trim().is_empty() {
            return Err("Child album directory name cannot be empty".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// Media Objects
// =============================================================================

/// Kind of media object. Behaviour differences are matched on this tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaVariant {
    Image,
    Video,
    Audio,
    Generic,
    /// URL-embedded content with no file on disk
    External { html: String },
}

impl MediaVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaVariant::Image => "image",
            MediaVariant::Video => "video",
            MediaVariant::Audio => "audio",
            MediaVariant::Generic => "generic",
            MediaVariant::External { .. } => "external",
        }
    }

    pub fn from_kind(kind: &str, external_html: Option<String>) -> Result<Self, LibraryError> {
        match kind {
            "image" => Ok(MediaVariant::Image),
            "video" => Ok(MediaVariant::Video),
            "audio" => Ok(MediaVariant::Audio),
            "generic" => Ok(MediaVariant::Generic),
            "external" => Ok(MediaVariant::External {
                html: external_html.unwrap_or_default(),
            }),
            other => Err(LibraryError::InvalidInput {
                field: "kind".to_string(),
                message: format!("Unknown media object kind '{}'", other),
            }),
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, MediaVariant::Image)
    }

    pub fn is_external(&self) -> bool {
        matches!(self, MediaVariant::External { .. })
    }
}

/// One rendition of a media object (original, optimized or thumbnail).
///
/// An empty `file_name` means the rendition does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayObject {
    pub file_name: String,
    pub physical_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub size_kb: u64,
}

impl DisplayObject {
    pub fn new(physical_path: impl Into<PathBuf>, width: u32, height: u32, size_kb: u64) -> Self {
        let physical_path = physical_path.into();
        let file_name = physical_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            file_name,
            physical_path,
            width,
            height,
            size_kb,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.file_name.is_empty()
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    pub fn set_dimensions(&mut self, dims: Dimensions) {
        self.width = dims.width;
        self.height = dims.height;
    }

    /// Point this rendition at `path`, keeping the file name in step.
    pub fn set_path(&mut self, path: &Path) {
        self.file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.physical_path = path.to_path_buf();
    }
}

/// Extracted metadata entry (EXIF tag, duration, etc.)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MetadataItem {
    pub name: String,
    pub value: String,
}

impl MetadataItem {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// File-backed leaf node.
///
/// Invariant: `hash_key` is unique within a gallery for file-backed objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaObject {
    pub id: Option<MediaObjectId>,
    pub gallery_id: GalleryId,
    pub album_id: AlbumId,
    pub variant: MediaVariant,
    /// Structural identity; empty for external objects
    pub hash_key: String,
    pub mime_type: String,
    pub title: String,
    pub original: DisplayObject,
    pub optimized: DisplayObject,
    pub thumbnail: DisplayObject,
    pub metadata: Vec<MetadataItem>,
    pub created_by: String,
    pub date_added: i64,
    pub last_modified_by: String,
    pub date_last_modified: i64,

    #[serde(skip)]
    pub is_synchronized: bool,
    #[serde(skip)]
    pub regenerate_thumbnail_on_save: bool,
    #[serde(skip)]
    pub regenerate_optimized_on_save: bool,
    #[serde(skip)]
    pub regenerate_metadata_on_save: bool,
    #[serde(skip)]
    is_writable: bool,
}

impl MediaObject {
    /// Create an unsaved file-backed media object in `album_id`.
    pub fn new(
        gallery_id: GalleryId,
        album_id: AlbumId,
        variant: MediaVariant,
        original: DisplayObject,
        mime_type: impl Into<String>,
        actor: &str,
    ) -> Self {
        let ts = now();
        let title = Path::new(&original.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| original.file_name.clone());
        Self {
            id: None,
            gallery_id,
            album_id,
            variant,
            hash_key: String::new(),
            mime_type: mime_type.into(),
            title,
            original,
            optimized: DisplayObject::empty(),
            thumbnail: DisplayObject::empty(),
            metadata: Vec::new(),
            created_by: actor.to_string(),
            date_added: ts,
            last_modified_by: actor.to_string(),
            date_last_modified: ts,
            is_synchronized: true,
            regenerate_thumbnail_on_save: false,
            regenerate_optimized_on_save: false,
            regenerate_metadata_on_save: false,
            is_writable: true,
        }
    }

    /// Create an unsaved external object wrapping `html`.
    pub fn new_external(
        gallery_id: GalleryId,
        album_id: AlbumId,
        html: impl Into<String>,
        title: impl Into<String>,
        actor: &str,
    ) -> Self {
        let mut object = Self::new(
            gallery_id,
            album_id,
            MediaVariant::External { html: html.into() },
            DisplayObject::empty(),
            "text/html",
            actor,
        );
        object.title = title.into();
        object
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_writable(&self) -> bool {
        self.is_writable
    }

    pub fn read_only(&self) -> Self {
        Self {
            is_writable: false,
            ..self.clone()
        }
    }

    /// True when any derivative or metadata regeneration is pending.
    pub fn needs_regeneration(&self) -> bool {
        self.regenerate_thumbnail_on_save
            || self.regenerate_optimized_on_save
            || self.regenerate_metadata_on_save
    }

    /// File names of derived renditions that differ from the original.
    pub fn derived_file_names(&self) -> impl Iterator<Item = &str> {
        [&self.thumbnail, &self.optimized]
            .into_iter()
            .filter(|d| !d.is_empty() && d.file_name != self.original.file_name)
            .map(|d| d.file_name.as_str())
    }

    pub fn touch(&mut self, actor: &str) {
        self.last_modified_by = actor.to_string();
        self.date_last_modified = now();
    }

    /// Validate media object data
    pub fn validate(&self) -> Result<(), String> {
        if self.variant.is_external() {
            return Ok(());
        }

        if self.original.is_empty() {
            return Err("File-backed media object must have an original file".to_string());
        }

        if self.hash_key.trim().is_empty() {
            return Err("File-backed media object must have a hash key".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, FromRow)]
pub(crate) struct AlbumRow {
    pub id: i64,
    pub gallery_id: i64,
    pub parent_id: Option<i64>,
    pub directory_name: String,
    pub physical_path: String,
    pub title: String,
    pub summary: String,
    pub is_private: bool,
    pub thumbnail_media_object_id: Option<i64>,
    pub created_by: String,
    pub date_added: i64,
    pub last_modified_by: String,
    pub date_last_modified: i64,
}

impl From<AlbumRow> for Album {
    fn from(row: AlbumRow) -> Self {
        Album {
            id: Some(AlbumId(row.id)),
            gallery_id: GalleryId(row.gallery_id),
            parent_id: row.parent_id.map(AlbumId),
            directory_name: row.directory_name,
            physical_path: PathBuf::from(row.physical_path),
            title: row.title,
            summary: row.summary,
            is_private: row.is_private,
            thumbnail_media_object_id: row.thumbnail_media_object_id.map(MediaObjectId),
            created_by: row.created_by,
            date_added: row.date_added,
            last_modified_by: row.last_modified_by,
            date_last_modified: row.date_last_modified,
            is_synchronized: false,
            regenerate_thumbnail_on_save: false,
            is_writable: true,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct MediaObjectRow {
    pub id: i64,
    pub gallery_id: i64,
    pub album_id: i64,
    pub kind: String,
    pub external_html: Option<String>,
    pub hash_key: String,
    pub mime_type: String,
    pub title: String,
    pub original_file_name: String,
    pub original_path: String,
    pub original_width: i64,
    pub original_height: i64,
    pub original_size_kb: i64,
    pub optimized_file_name: String,
    pub optimized_path: String,
    pub optimized_width: i64,
    pub optimized_height: i64,
    pub optimized_size_kb: i64,
    pub thumbnail_file_name: String,
    pub thumbnail_path: String,
    pub thumbnail_width: i64,
    pub thumbnail_height: i64,
    pub thumbnail_size_kb: i64,
    pub created_by: String,
    pub date_added: i64,
    pub last_modified_by: String,
    pub date_last_modified: i64,
}

fn display_object(file_name: String, path: String, width: i64, height: i64, size_kb: i64) -> DisplayObject {
    DisplayObject {
        file_name,
        physical_path: PathBuf::from(path),
        width: u32::try_from(width).unwrap_or(0),
        height: u32::try_from(height).unwrap_or(0),
        size_kb: u64::try_from(size_kb).unwrap_or(0),
    }
}

impl TryFrom<MediaObjectRow> for MediaObject {
    type Error = LibraryError;

    fn try_from(row: MediaObjectRow) -> Result<Self, Self::Error> {
        let variant = MediaVariant::from_kind(&row.kind, row.external_html)?;
        Ok(MediaObject {
            id: Some(MediaObjectId(row.id)),
            gallery_id: GalleryId(row.gallery_id),
            album_id: AlbumId(row.album_id),
            variant,
            hash_key: row.hash_key,
            mime_type: row.mime_type,
            title: row.title,
            original: display_object(
                row.original_file_name,
                row.original_path,
                row.original_width,
                row.original_height,
                row.original_size_kb,
            ),
            optimized: display_object(
                row.optimized_file_name,
                row.optimized_path,
                row.optimized_width,
                row.optimized_height,
                row.optimized_size_kb,
            ),
            thumbnail: display_object(
                row.thumbnail_file_name,
                row.thumbnail_path,
                row.thumbnail_width,
                row.thumbnail_height,
                row.thumbnail_size_kb,
            ),
            metadata: Vec::new(),
            created_by: row.created_by,
            date_added: row.date_added,
            last_modified_by: row.last_modified_by,
            date_last_modified: row.date_last_modified,
            is_synchronized: false,
            regenerate_thumbnail_on_save: false,
            regenerate_optimized_on_save: false,
            regenerate_metadata_on_save: false,
            is_writable: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Album {
        let mut album = Album::new_root(GalleryId(1), "/srv/gallery", "admin");
        album.id = Some(AlbumId(1));
        album
    }

    #[test]
    fn test_child_album_path_and_privacy() {
        let mut parent = root();
        parent.is_private = true;

        let child = Album::new_child(&parent, "trip", "admin");
        assert_eq!(child.physical_path, PathBuf::from("/srv/gallery/trip"));
        assert_eq!(child.parent_id, Some(AlbumId(1)));
        assert_eq!(child.title, "trip");
        assert!(child.is_private);
        assert!(child.is_new());
        assert!(!child.is_root());
        assert!(child.validate().is_ok());
    }

    #[test]
    fn test_read_only_copy() {
        let album = root();
        assert!(album.is_writable());
        assert!(!album.read_only().is_writable());
    }

    #[test]
    fn test_media_variant_kind_round_trip() {
        for variant in [
            MediaVariant::Image,
            MediaVariant::Video,
            MediaVariant::Audio,
            MediaVariant::Generic,
        ] {
            assert_eq!(MediaVariant::from_kind(variant.as_str(), None).unwrap(), variant);
        }
        let external = MediaVariant::from_kind("external", Some("<iframe/>".to_string())).unwrap();
        assert!(external.is_external());
        assert!(MediaVariant::from_kind("hologram", None).is_err());
    }

    #[test]
    fn test_display_object_from_path() {
        let d = DisplayObject::new("/srv/gallery/photo.jpg", 4000, 3000, 2048);
        assert_eq!(d.file_name, "photo.jpg");
        assert!(!d.is_empty());
        assert!(DisplayObject::empty().is_empty());
    }

    #[test]
    fn test_media_object_validation_and_derived_names() {
        let original = DisplayObject::new("/srv/gallery/photo.jpg", 100, 80, 10);
        let mut object = MediaObject::new(
            GalleryId(1),
            AlbumId(1),
            MediaVariant::Image,
            original.clone(),
            "image/jpeg",
            "admin",
        );
        assert_eq!(object.title, "photo");
        assert!(object.validate().is_err(), "hash key required");

        object.hash_key = "abc".to_string();
        assert!(object.validate().is_ok());

        object.optimized = original;
        object.thumbnail = DisplayObject::new("/srv/gallery/zThumb_photo.jpg", 115, 92, 3);
        let names: Vec<&str> = object.derived_file_names().collect();
        assert_eq!(names, vec!["zThumb_photo.jpg"]);
    }

    #[test]
    fn test_external_object_needs_no_file() {
        let object = MediaObject::new_external(GalleryId(1), AlbumId(1), "<embed/>", "clip", "admin");
        assert!(object.validate().is_ok());
        assert!(object.variant.is_external());
        assert!(!object.needs_regeneration());
    }
}
