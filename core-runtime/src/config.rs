//! # Gallery Configuration Module
//!
//! Provides the per-gallery settings consumed by the synchronization engine.
//!
//! ## Overview
//!
//! A [`GallerySettings`] instance describes where a gallery's media lives on
//! disk, where derived artifacts (thumbnails and optimized renditions) are
//! written, how large those artifacts may be, and which file types are
//! accepted as media objects. Settings are built with a builder and validated
//! up front so a misconfigured gallery fails before any directory is walked.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::{GalleryId, GallerySettings};
//!
//! let settings = GallerySettings::builder(GalleryId(1), "/srv/gallery")
//!     .thumbnail_path("/var/cache/gallery/thumbs")
//!     .optimized_image_trigger_size_kb(100)
//!     .build()
//!     .expect("valid settings");
//!
//! assert_eq!(settings.thumbnail_file_name_prefix, "zThumb_");
//! ```
//!
//! ## Error Handling
//!
//! `build()` rejects inconsistent combinations with actionable messages:
//!
//! ```should_panic
//! use core_runtime::config::{GalleryId, GallerySettings};
//!
//! // Read-only media needs somewhere else to put thumbnails.
//! GallerySettings::builder(GalleryId(1), "/srv/gallery")
//!     .media_objects_read_only(true)
//!     .build()
//!     .expect("Should fail - no alternate derived roots");
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifier of a gallery. One synchronization may run per gallery at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GalleryId(pub i64);

impl GalleryId {
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for GalleryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Broad class of a MIME type, taken from its major type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeCategory {
    Image,
    Video,
    Audio,
    Other,
}

impl MimeCategory {
    /// Classify a full MIME type string such as `image/jpeg`.
    pub fn from_full_type(full_type: &str) -> Self {
        match full_type.split('/').next().map(str::to_ascii_lowercase).as_deref() {
            Some("image") => MimeCategory::Image,
            Some("video") => MimeCategory::Video,
            Some("audio") => MimeCategory::Audio,
            _ => MimeCategory::Other,
        }
    }
}

/// One row of the gallery's MIME type table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimeTypeEntry {
    /// File extension without the leading dot, lowercase
    pub extension: String,
    /// Full MIME type, e.g. `image/jpeg`
    pub full_type: String,
    /// Whether files of this type become media objects in this gallery
    pub enabled: bool,
}

impl MimeTypeEntry {
    pub fn new(extension: impl Into<String>, full_type: impl Into<String>, enabled: bool) -> Self {
        Self {
            extension: normalize_extension(&extension.into()),
            full_type: full_type.into(),
            enabled,
        }
    }

    pub fn category(&self) -> MimeCategory {
        MimeCategory::from_full_type(&self.full_type)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}

/// Built-in MIME table used when a gallery does not supply its own.
pub fn default_mime_types() -> Vec<MimeTypeEntry> {
    const TABLE: &[(&str, &str, bool)] = &[
        ("jpg", "image/jpeg", true),
        ("jpeg", "image/jpeg", true),
        ("jpe", "image/jpeg", true),
        ("png", "image/png", true),
        ("gif", "image/gif", true),
        ("bmp", "image/bmp", true),
        ("tif", "image/tiff", true),
        ("tiff", "image/tiff", true),
        ("webp", "image/webp", true),
        ("psd", "image/vnd.adobe.photoshop", false),
        ("mp4", "video/mp4", true),
        ("m4v", "video/x-m4v", true),
        ("mov", "video/quicktime", true),
        ("avi", "video/x-msvideo", true),
        ("wmv", "video/x-ms-wmv", true),
        ("webm", "video/webm", true),
        ("mpg", "video/mpeg", true),
        ("mp3", "audio/mpeg", true),
        ("m4a", "audio/mp4", true),
        ("wav", "audio/wav", true),
        ("ogg", "audio/ogg", true),
        ("flac", "audio/flac", true),
        ("wma", "audio/x-ms-wma", true),
        ("pdf", "application/pdf", true),
        ("txt", "text/plain", true),
        ("doc", "application/msword", true),
        ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document", true),
        ("zip", "application/zip", false),
        ("exe", "application/octet-stream", false),
    ];

    TABLE
        .iter()
        .map(|(ext, full, enabled)| MimeTypeEntry::new(*ext, *full, *enabled))
        .collect()
}

/// Per-gallery settings.
///
/// Use [`GallerySettings::builder`] to construct validated instances, or
/// [`GallerySettings::from_json`] to load a persisted copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GallerySettings {
    pub gallery_id: GalleryId,

    /// Root directory holding original media files
    pub media_path: PathBuf,

    /// Alternate root for thumbnails; `None` stores them beside originals
    pub thumbnail_path: Option<PathBuf>,

    /// Alternate root for optimized renditions; `None` stores them beside originals
    pub optimized_path: Option<PathBuf>,

    pub thumbnail_file_name_prefix: String,
    pub optimized_file_name_prefix: String,

    /// Longest edge of a generated thumbnail, in pixels
    pub max_thumbnail_length: u32,

    /// Longest edge of an optimized rendition, in pixels
    pub max_optimized_length: u32,

    /// Originals larger than this (KB) get an optimized rendition
    pub optimized_image_trigger_size_kb: u64,

    pub thumbnail_jpeg_quality: u8,
    pub optimized_jpeg_quality: u8,

    pub default_video_dimensions: Dimensions,
    pub default_audio_dimensions: Dimensions,
    pub default_generic_dimensions: Dimensions,
    pub default_external_dimensions: Dimensions,

    /// Replace the hi-res original with its optimized rendition after import
    pub discard_original_image_after_import: bool,

    /// The media path must never be written to
    pub media_objects_read_only: bool,

    pub mime_types: Vec<MimeTypeEntry>,
}

impl Default for GallerySettings {
    fn default() -> Self {
        Self {
            gallery_id: GalleryId(1),
            media_path: PathBuf::new(),
            thumbnail_path: None,
            optimized_path: None,
            thumbnail_file_name_prefix: "zThumb_".to_string(),
            optimized_file_name_prefix: "zOpt_".to_string(),
            max_thumbnail_length: 115,
            max_optimized_length: 1280,
            optimized_image_trigger_size_kb: 50,
            thumbnail_jpeg_quality: 70,
            optimized_jpeg_quality: 70,
            default_video_dimensions: Dimensions::new(640, 480),
            default_audio_dimensions: Dimensions::new(600, 60),
            default_generic_dimensions: Dimensions::new(640, 480),
            default_external_dimensions: Dimensions::new(640, 480),
            discard_original_image_after_import: false,
            media_objects_read_only: false,
            mime_types: default_mime_types(),
        }
    }
}

impl GallerySettings {
    /// Creates a builder for the gallery rooted at `media_path`.
    pub fn builder(gallery_id: GalleryId, media_path: impl Into<PathBuf>) -> GallerySettingsBuilder {
        GallerySettingsBuilder {
            settings: GallerySettings {
                gallery_id,
                media_path: media_path.into(),
                ..GallerySettings::default()
            },
        }
    }

    /// Parses settings from JSON and validates them.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: GallerySettings = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid gallery settings JSON: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and validates a JSON settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Cannot read gallery settings from {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("Failed to serialize gallery settings: {}", e)))
    }

    /// Validates the settings and returns an error if invalid.
    ///
    /// This checks:
    /// - Media path is not empty
    /// - Derived file prefixes are present and distinct
    /// - Size limits and JPEG qualities are in range
    /// - A read-only media path has alternate thumbnail and optimized roots
    /// - The MIME table has no duplicate extensions
    pub fn validate(&self) -> Result<()> {
        if self.media_path.as_os_str().is_empty() {
            return Err(Error::Config("Media path cannot be empty".to_string()));
        }

        if self.thumbnail_file_name_prefix.is_empty() || self.optimized_file_name_prefix.is_empty()
        {
            return Err(Error::Config(
                "Thumbnail and optimized file name prefixes cannot be empty. \
                 Without a prefix, derived files are indistinguishable from originals."
                    .to_string(),
            ));
        }

        if self.thumbnail_file_name_prefix == self.optimized_file_name_prefix {
            return Err(Error::Config(format!(
                "Thumbnail and optimized prefixes must differ (both are '{}')",
                self.thumbnail_file_name_prefix
            )));
        }

        if self.max_thumbnail_length == 0 || self.max_optimized_length == 0 {
            return Err(Error::Config(
                "Maximum thumbnail and optimized lengths must be greater than 0".to_string(),
            ));
        }

        for (name, quality) in [
            ("Thumbnail", self.thumbnail_jpeg_quality),
            ("Optimized", self.optimized_jpeg_quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(Error::Config(format!(
                    "{} JPEG quality must be between 1 and 100 (got {})",
                    name, quality
                )));
            }
        }

        if self.media_objects_read_only
            && (self.thumbnail_path.is_none() || self.optimized_path.is_none())
        {
            return Err(Error::Config(
                "Media path is read-only but no alternate thumbnail/optimized root is set. \
                 Configure both thumbnail_path and optimized_path, or make the media path writable."
                    .to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.mime_types {
            if !seen.insert(entry.extension.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate MIME type entry for extension '{}'",
                    entry.extension
                )));
            }
        }

        Ok(())
    }

    /// Looks up the MIME entry for an extension (with or without the dot).
    pub fn mime_type(&self, extension: &str) -> Option<&MimeTypeEntry> {
        let ext = normalize_extension(extension);
        self.mime_types.iter().find(|entry| entry.extension == ext)
    }

    /// Directory that holds thumbnails for the album stored at `album_dir`.
    pub fn thumbnail_directory(&self, album_dir: &Path) -> PathBuf {
        self.mirror_directory(self.thumbnail_path.as_deref(), album_dir)
    }

    /// Directory that holds optimized renditions for the album stored at `album_dir`.
    pub fn optimized_directory(&self, album_dir: &Path) -> PathBuf {
        self.mirror_directory(self.optimized_path.as_deref(), album_dir)
    }

    /// True when thumbnails are stored beside originals.
    pub fn thumbnails_share_media_path(&self) -> bool {
        self.thumbnail_path
            .as_deref()
            .map_or(true, |p| p == self.media_path)
    }

    /// True when optimized renditions are stored beside originals.
    pub fn optimized_share_media_path(&self) -> bool {
        self.optimized_path
            .as_deref()
            .map_or(true, |p| p == self.media_path)
    }

    /// True when `file_name` carries the thumbnail or optimized prefix.
    pub fn is_derived_file_name(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.thumbnail_file_name_prefix)
            || file_name.starts_with(&self.optimized_file_name_prefix)
    }

    fn mirror_directory(&self, alternate_root: Option<&Path>, album_dir: &Path) -> PathBuf {
        match alternate_root {
            Some(root) => match album_dir.strip_prefix(&self.media_path) {
                Ok(relative) => root.join(relative),
                Err(_) => root.to_path_buf(),
            },
            None => album_dir.to_path_buf(),
        }
    }
}

/// Builder for [`GallerySettings`].
///
/// Every setter has a default matching a fresh gallery. Call
/// [`build()`](GallerySettingsBuilder::build) to validate.
#[derive(Debug, Clone)]
pub struct GallerySettingsBuilder {
    settings: GallerySettings,
}

impl GallerySettingsBuilder {
    /// Stores thumbnails under `path`, mirroring the album tree.
    pub fn thumbnail_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.settings.thumbnail_path = Some(path.into());
        self
    }

    /// Stores optimized renditions under `path`, mirroring the album tree.
    pub fn optimized_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.settings.optimized_path = Some(path.into());
        self
    }

    pub fn thumbnail_file_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.thumbnail_file_name_prefix = prefix.into();
        self
    }

    pub fn optimized_file_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.optimized_file_name_prefix = prefix.into();
        self
    }

    pub fn max_thumbnail_length(mut self, length: u32) -> Self {
        self.settings.max_thumbnail_length = length;
        self
    }

    pub fn max_optimized_length(mut self, length: u32) -> Self {
        self.settings.max_optimized_length = length;
        self
    }

    /// Default: 50 KB
    pub fn optimized_image_trigger_size_kb(mut self, size_kb: u64) -> Self {
        self.settings.optimized_image_trigger_size_kb = size_kb;
        self
    }

    pub fn thumbnail_jpeg_quality(mut self, quality: u8) -> Self {
        self.settings.thumbnail_jpeg_quality = quality;
        self
    }

    pub fn optimized_jpeg_quality(mut self, quality: u8) -> Self {
        self.settings.optimized_jpeg_quality = quality;
        self
    }

    pub fn default_video_dimensions(mut self, width: u32, height: u32) -> Self {
        self.settings.default_video_dimensions = Dimensions::new(width, height);
        self
    }

    pub fn default_audio_dimensions(mut self, width: u32, height: u32) -> Self {
        self.settings.default_audio_dimensions = Dimensions::new(width, height);
        self
    }

    pub fn default_generic_dimensions(mut self, width: u32, height: u32) -> Self {
        self.settings.default_generic_dimensions = Dimensions::new(width, height);
        self
    }

    pub fn default_external_dimensions(mut self, width: u32, height: u32) -> Self {
        self.settings.default_external_dimensions = Dimensions::new(width, height);
        self
    }

    pub fn discard_original_image_after_import(mut self, discard: bool) -> Self {
        self.settings.discard_original_image_after_import = discard;
        self
    }

    pub fn media_objects_read_only(mut self, read_only: bool) -> Self {
        self.settings.media_objects_read_only = read_only;
        self
    }

    /// Replaces the whole MIME table.
    pub fn mime_types(mut self, entries: Vec<MimeTypeEntry>) -> Self {
        self.settings.mime_types = entries;
        self
    }

    /// Adds or replaces a single MIME entry.
    pub fn mime_type(mut self, entry: MimeTypeEntry) -> Self {
        self.settings
            .mime_types
            .retain(|existing| existing.extension != entry.extension);
        self.settings.mime_types.push(entry);
        self
    }

    /// Enables or disables an existing MIME entry. Unknown extensions are ignored.
    pub fn mime_type_enabled(mut self, extension: &str, enabled: bool) -> Self {
        let ext = normalize_extension(extension);
        for entry in self
            .settings
            .mime_types
            .iter_mut()
            .filter(|e| e.extension == ext)
        {
            entry.enabled = enabled;
        }
        self
    }

    /// Validates and returns the settings.
    pub fn build(self) -> Result<GallerySettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> GallerySettingsBuilder {
        GallerySettings::builder(GalleryId(7), "/srv/gallery")
    }

    #[test]
    fn test_defaults() {
        let settings = builder().build().unwrap();

        assert_eq!(settings.gallery_id, GalleryId(7));
        assert_eq!(settings.thumbnail_file_name_prefix, "zThumb_");
        assert_eq!(settings.optimized_file_name_prefix, "zOpt_");
        assert_eq!(settings.optimized_image_trigger_size_kb, 50);
        assert_eq!(settings.max_optimized_length, 1280);
        assert_eq!(settings.default_video_dimensions, Dimensions::new(640, 480));
        assert_eq!(settings.default_audio_dimensions, Dimensions::new(600, 60));
        assert!(!settings.media_objects_read_only);
    }

    #[test]
    fn test_rejects_empty_media_path() {
        let result = GallerySettings::builder(GalleryId(1), "").build();
        assert!(result.unwrap_err().to_string().contains("Media path"));
    }

    #[test]
    fn test_rejects_identical_prefixes() {
        let result = builder()
            .thumbnail_file_name_prefix("z_")
            .optimized_file_name_prefix("z_")
            .build();
        assert!(result.unwrap_err().to_string().contains("must differ"));
    }

    #[test]
    fn test_rejects_out_of_range_quality() {
        let result = builder().thumbnail_jpeg_quality(0).build();
        assert!(result.unwrap_err().to_string().contains("between 1 and 100"));
    }

    #[test]
    fn test_read_only_requires_alternate_roots() {
        let result = builder()
            .media_objects_read_only(true)
            .thumbnail_path("/cache/thumbs")
            .build();
        assert!(result.is_err());

        let settings = builder()
            .media_objects_read_only(true)
            .thumbnail_path("/cache/thumbs")
            .optimized_path("/cache/opt")
            .build()
            .unwrap();
        assert!(settings.media_objects_read_only);
    }

    #[test]
    fn test_rejects_duplicate_mime_extensions() {
        let mut entries = default_mime_types();
        entries.push(MimeTypeEntry::new(".JPG", "image/jpeg", true));
        let result = builder().mime_types(entries).build();
        assert!(result.unwrap_err().to_string().contains("Duplicate"));
    }

    #[test]
    fn test_mime_lookup_and_toggle() {
        let settings = builder().mime_type_enabled("mp4", false).build().unwrap();

        let jpeg = settings.mime_type(".JPG").unwrap();
        assert_eq!(jpeg.category(), MimeCategory::Image);
        assert!(jpeg.enabled);

        let mp4 = settings.mime_type("mp4").unwrap();
        assert_eq!(mp4.category(), MimeCategory::Video);
        assert!(!mp4.enabled);

        assert!(settings.mime_type("xyz").is_none());
    }

    #[test]
    fn test_mime_type_replaces_entry() {
        let settings = builder()
            .mime_type(MimeTypeEntry::new("zip", "application/zip", true))
            .build()
            .unwrap();
        assert!(settings.mime_type("zip").unwrap().enabled);
        assert_eq!(
            settings.mime_types.iter().filter(|e| e.extension == "zip").count(),
            1
        );
    }

    #[test]
    fn test_derived_directories_mirror_album_tree() {
        let settings = builder()
            .thumbnail_path("/cache/thumbs")
            .build()
            .unwrap();

        let album = Path::new("/srv/gallery/2024/trip");
        assert_eq!(
            settings.thumbnail_directory(album),
            PathBuf::from("/cache/thumbs/2024/trip")
        );
        assert_eq!(settings.optimized_directory(album), album.to_path_buf());
        assert!(!settings.thumbnails_share_media_path());
        assert!(settings.optimized_share_media_path());
    }

    #[test]
    fn test_is_derived_file_name() {
        let settings = builder().build().unwrap();
        assert!(settings.is_derived_file_name("zThumb_photo.jpg"));
        assert!(settings.is_derived_file_name("zOpt_photo.jpg"));
        assert!(!settings.is_derived_file_name("photo.jpg"));
    }

    #[test]
    fn test_json_round_trip_keeps_validation() {
        let settings = builder().optimized_path("/cache/opt").build().unwrap();
        let json = settings.to_json().unwrap();
        let loaded = GallerySettings::from_json(&json).unwrap();
        assert_eq!(loaded, settings);

        let partial = r#"{ "gallery_id": 3, "media_path": "/data" }"#;
        let loaded = GallerySettings::from_json(partial).unwrap();
        assert_eq!(loaded.gallery_id, GalleryId(3));
        assert_eq!(loaded.max_thumbnail_length, 115);

        assert!(GallerySettings::from_json(r#"{ "gallery_id": 3 }"#).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        std::fs::write(&path, r#"{ "gallery_id": 9, "media_path": "/data" }"#).unwrap();

        let settings = GallerySettings::from_file(&path).unwrap();
        assert_eq!(settings.gallery_id, GalleryId(9));
        assert!(GallerySettings::from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_mime_category_classification() {
        assert_eq!(MimeCategory::from_full_type("IMAGE/png"), MimeCategory::Image);
        assert_eq!(MimeCategory::from_full_type("audio/mpeg"), MimeCategory::Audio);
        assert_eq!(MimeCategory::from_full_type("application/pdf"), MimeCategory::Other);
    }
}
