//! # Media Collaborators
//!
//! The engine decides *what* should happen to a file; these services do the
//! media-specific work:
//!
//! - [`MimeTypeResolver`] maps a file name to the gallery's MIME entry.
//! - [`MediaInspector`] reads image dimensions.
//! - [`DerivativeGenerator`] writes thumbnails and optimized renditions and
//!   extracts metadata for objects whose regeneration flags are set.
//!
//! Default implementations are backed by the gallery settings and the
//! `image` crate. Decoding and encoding run on the blocking thread pool.

use crate::{Result, SyncError};
use async_trait::async_trait;
use core_runtime::config::{Dimensions, GallerySettings, MimeTypeEntry};
use core_library::{DisplayObject, MediaObject, MediaVariant, MetadataItem};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

// ============================================================================
// MIME Resolution
// ============================================================================

/// Outcome of looking up a file's MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimeResolution {
    Enabled(MimeTypeEntry),
    /// Known type that the gallery does not accept
    Disabled(MimeTypeEntry),
    Unknown,
}

#[cfg_attr(test, mockall::automock)]
pub trait MimeTypeResolver: Send + Sync {
    fn resolve(&self, file_name: &str) -> MimeResolution;
}

/// Resolver over the gallery's MIME table, keyed by extension.
#[derive(Debug, Clone)]
pub struct MimeTypeTable {
    entries: Vec<MimeTypeEntry>,
}

impl MimeTypeTable {
    pub fn new(entries: Vec<MimeTypeEntry>) -> Self {
        Self { entries }
    }

    pub fn from_settings(settings: &GallerySettings) -> Self {
        Self::new(settings.mime_types.clone())
    }
}

impl MimeTypeResolver for MimeTypeTable {
    fn resolve(&self, file_name: &str) -> MimeResolution {
        let Some(extension) = Path::new(file_name).extension() else {
            return MimeResolution::Unknown;
        };
        let extension = extension.to_string_lossy().to_ascii_lowercase();

        match self.entries.iter().find(|e| e.extension == extension) {
            Some(entry) if entry.enabled => MimeResolution::Enabled(entry.clone()),
            Some(entry) => MimeResolution::Disabled(entry.clone()),
            None => MimeResolution::Unknown,
        }
    }
}

// ============================================================================
// Inspection
// ============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaInspector: Send + Sync {
    /// Pixel dimensions of the image at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Media` if the file cannot be decoded.
    async fn image_dimensions(&self, path: &Path) -> Result<Dimensions>;
}

/// Reads image headers with the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageInspector;

#[async_trait]
impl MediaInspector for ImageInspector {
    async fn image_dimensions(&self, path: &Path) -> Result<Dimensions> {
        let owned = path.to_path_buf();
        let (width, height) = tokio::task::spawn_blocking(move || image::image_dimensions(&owned))
            .await
            .map_err(|e| SyncError::Media(format!("Inspection task failed: {}", e)))?
            .map_err(|e| {
                SyncError::Media(format!("Cannot read image {}: {}", path.display(), e))
            })?;
        Ok(Dimensions::new(width, height))
    }
}

// ============================================================================
// Derivative Generation
// ============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DerivativeGenerator: Send + Sync {
    /// Produce whatever the regeneration flags on `media_object` ask for,
    /// update its renditions and metadata, and clear the flags.
    ///
    /// `album_dir` is the directory of the object's album; derived files are
    /// placed in the settings' mirror of it.
    async fn generate(
        &self,
        media_object: &mut MediaObject,
        album_dir: &Path,
        settings: &GallerySettings,
    ) -> Result<()>;
}

/// JPEG renditions via `image`, grey placeholders for non-image media.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDerivativeGenerator;

#[async_trait]
impl DerivativeGenerator for ImageDerivativeGenerator {
    async fn generate(
        &self,
        media_object: &mut MediaObject,
        album_dir: &Path,
        settings: &GallerySettings,
    ) -> Result<()> {
        if media_object.regenerate_thumbnail_on_save {
            let target = settings
                .thumbnail_directory(album_dir)
                .join(derived_file_name(&settings.thumbnail_file_name_prefix, media_object));
            let job = RenditionJob {
                source: source_image(media_object),
                target,
                max_length: settings.max_thumbnail_length,
                quality: settings.thumbnail_jpeg_quality,
                placeholder: placeholder_dimensions(&media_object.variant, settings),
            };
            media_object.thumbnail = render(job).await?;
            media_object.regenerate_thumbnail_on_save = false;
        }

        if media_object.regenerate_optimized_on_save {
            if media_object.variant.is_image() {
                let target = settings
                    .optimized_directory(album_dir)
                    .join(derived_file_name(&settings.optimized_file_name_prefix, media_object));
                let job = RenditionJob {
                    source: source_image(media_object),
                    target,
                    max_length: settings.max_optimized_length,
                    quality: settings.optimized_jpeg_quality,
                    placeholder: None,
                };
                media_object.optimized = render(job).await?;
            }
            media_object.regenerate_optimized_on_save = false;
        }

        if media_object.regenerate_metadata_on_save {
            media_object.metadata = extract_metadata(media_object).await;
            media_object.regenerate_metadata_on_save = false;
        }

        Ok(())
    }
}

/// Name of a derived rendition: `<prefix><original file name>.jpg`.
///
/// The whole file name is kept so `photo.jpg` and `photo.png` in one album
/// get distinct renditions. Externals have no file and use their ID, falling
/// back to the title before the first save.
pub fn derived_file_name(prefix: &str, media_object: &MediaObject) -> String {
    if !media_object.variant.is_external() {
        return format!("{}{}.jpg", prefix, media_object.original.file_name);
    }
    match media_object.id {
        Some(id) => format!("{}external_{}.jpg", prefix, id),
        None => {
            let title: String = media_object
                .title
                .chars()
                .map(|c| if c.is_alphanumeric() { c } else { '_' })
                .collect();
            format!("{}external_{}.jpg", prefix, title)
        }
    }
}

fn source_image(media_object: &MediaObject) -> Option<PathBuf> {
    media_object
        .variant
        .is_image()
        .then(|| media_object.original.physical_path.clone())
}

fn placeholder_dimensions(variant: &MediaVariant, settings: &GallerySettings) -> Option<Dimensions> {
    match variant {
        MediaVariant::Image => None,
        MediaVariant::Video => Some(settings.default_video_dimensions),
        MediaVariant::Audio => Some(settings.default_audio_dimensions),
        MediaVariant::Generic => Some(settings.default_generic_dimensions),
        MediaVariant::External { .. } => Some(settings.default_external_dimensions),
    }
}

struct RenditionJob {
    source: Option<PathBuf>,
    target: PathBuf,
    max_length: u32,
    quality: u8,
    placeholder: Option<Dimensions>,
}

async fn render(job: RenditionJob) -> Result<DisplayObject> {
    tokio::task::spawn_blocking(move || render_blocking(job))
        .await
        .map_err(|e| SyncError::Media(format!("Rendition task failed: {}", e)))?
}

fn render_blocking(job: RenditionJob) -> Result<DisplayObject> {
    let image = match (&job.source, job.placeholder) {
        (Some(source), _) => image::open(source)
            .map_err(|e| SyncError::Media(format!("Cannot decode {}: {}", source.display(), e)))?
            .resize(job.max_length, job.max_length, FilterType::Lanczos3),
        (None, Some(dims)) => {
            let (width, height) = fit_within(dims, job.max_length);
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([128, 128, 128])))
        }
        (None, None) => {
            return Err(SyncError::Media(
                "Nothing to render: no source image and no placeholder size".to_string(),
            ))
        }
    };

    if let Some(parent) = job.target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }

    let file = File::create(&job.target).map_err(|e| SyncError::io(&job.target, e))?;
    let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), job.quality);
    image
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| SyncError::Media(format!("Cannot encode {}: {}", job.target.display(), e)))?;

    let size_kb = std::fs::metadata(&job.target)
        .map(|m| size_in_kb(m.len()))
        .map_err(|e| SyncError::io(&job.target, e))?;

    debug!(path = %job.target.display(), "Wrote rendition");
    Ok(DisplayObject::new(job.target, image.width(), image.height(), size_kb))
}

/// Scale `dims` so the longer side is at most `max_length`, keeping the ratio.
fn fit_within(dims: Dimensions, max_length: u32) -> (u32, u32) {
    let longest = dims.width.max(dims.height).max(1);
    if longest <= max_length {
        return (dims.width.max(1), dims.height.max(1));
    }
    let scale = f64::from(max_length) / f64::from(longest);
    let width = (f64::from(dims.width) * scale).round().max(1.0) as u32;
    let height = (f64::from(dims.height) * scale).round().max(1.0) as u32;
    (width, height)
}

async fn extract_metadata(media_object: &MediaObject) -> Vec<MetadataItem> {
    let mut items = vec![MetadataItem::new("MimeType", &media_object.mime_type)];

    if media_object.variant.is_external() {
        return items;
    }

    let original = &media_object.original;
    items.push(MetadataItem::new("FileName", &original.file_name));
    items.push(MetadataItem::new("FileSize", format!("{} KB", original.size_kb)));
    if original.width > 0 && original.height > 0 {
        items.push(MetadataItem::new(
            "Dimensions",
            format!("{} x {}", original.width, original.height),
        ));
    }
    if let Ok(modified) = tokio::fs::metadata(&original.physical_path)
        .await
        .and_then(|m| m.modified())
    {
        let modified = chrono::DateTime::<chrono::Utc>::from(modified);
        items.push(MetadataItem::new("DateFileModified", modified.to_rfc3339()));
    }

    items
}

/// File size in KB, rounded up.
pub fn size_in_kb(bytes: u64) -> u64 {
    bytes.div_ceil(1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::{AlbumId, MediaObjectId};
    use core_runtime::config::GalleryId;
    use tempfile::TempDir;

    fn settings(media: &Path) -> GallerySettings {
        GallerySettings::builder(GalleryId(1), media).build().unwrap()
    }

    fn write_image(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([200, 10, 10]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_mime_table_resolution() {
        let table = MimeTypeTable::new(vec![
            MimeTypeEntry::new("jpg", "image/jpeg", true),
            MimeTypeEntry::new("psd", "image/vnd.adobe.photoshop", false),
        ]);

        assert!(matches!(table.resolve("a.JPG"), MimeResolution::Enabled(e) if e.full_type == "image/jpeg"));
        assert!(matches!(table.resolve("a.psd"), MimeResolution::Disabled(_)));
        assert_eq!(table.resolve("a.xyz"), MimeResolution::Unknown);
        assert_eq!(table.resolve("README"), MimeResolution::Unknown);
    }

    #[test]
    fn test_fit_within_keeps_aspect_ratio() {
        assert_eq!(fit_within(Dimensions::new(640, 480), 115), (115, 86));
        assert_eq!(fit_within(Dimensions::new(600, 60), 115), (115, 12));
        assert_eq!(fit_within(Dimensions::new(100, 50), 115), (100, 50));
    }

    #[test]
    fn test_size_in_kb_rounds_up() {
        assert_eq!(size_in_kb(0), 0);
        assert_eq!(size_in_kb(1), 1);
        assert_eq!(size_in_kb(2048 * 1024), 2048);
    }

    #[tokio::test]
    async fn test_image_inspector_reads_dimensions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.png");
        write_image(&path, 40, 30);

        let dims = ImageInspector.image_dimensions(&path).await.unwrap();
        assert_eq!(dims, Dimensions::new(40, 30));

        std::fs::write(dir.path().join("broken.png"), b"not an image").unwrap();
        let err = ImageInspector
            .image_dimensions(&dir.path().join("broken.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Media(_)));
    }

    #[tokio::test]
    async fn test_generator_writes_thumbnail_and_optimized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.png");
        write_image(&path, 400, 200);
        let settings = GallerySettings::builder(GalleryId(1), dir.path())
            .max_optimized_length(300)
            .build()
            .unwrap();

        let mut object = MediaObject::new(
            GalleryId(1),
            AlbumId(1),
            MediaVariant::Image,
            DisplayObject::new(&path, 400, 200, 1),
            "image/png",
            "admin",
        );
        object.regenerate_thumbnail_on_save = true;
        object.regenerate_optimized_on_save = true;
        object.regenerate_metadata_on_save = true;

        ImageDerivativeGenerator
            .generate(&mut object, dir.path(), &settings)
            .await
            .unwrap();

        assert_eq!(object.thumbnail.file_name, "zThumb_photo.png.jpg");
        assert_eq!((object.thumbnail.width, object.thumbnail.height), (115, 58));
        assert!(dir.path().join("zThumb_photo.png.jpg").exists());
        assert_eq!(object.optimized.file_name, "zOpt_photo.png.jpg");
        assert_eq!(object.optimized.width, 300);
        assert!(!object.needs_regeneration());
        assert!(object.metadata.iter().any(|m| m.name == "Dimensions"));
    }

    #[tokio::test]
    async fn test_generator_placeholder_for_video() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vid.mp4");
        std::fs::write(&path, b"not really a video").unwrap();
        let settings = settings(dir.path());

        let mut object = MediaObject::new(
            GalleryId(1),
            AlbumId(1),
            MediaVariant::Video,
            DisplayObject::new(&path, 640, 480, 1),
            "video/mp4",
            "admin",
        );
        object.regenerate_thumbnail_on_save = true;
        object.regenerate_optimized_on_save = true;

        ImageDerivativeGenerator
            .generate(&mut object, dir.path(), &settings)
            .await
            .unwrap();

        assert_eq!(object.thumbnail.file_name, "zThumb_vid.mp4.jpg");
        assert_eq!((object.thumbnail.width, object.thumbnail.height), (115, 86));
        assert!(object.optimized.is_empty(), "videos have no optimized rendition");
    }

    #[test]
    fn test_derived_names_are_distinct_per_original() {
        let image = |name: &str| {
            MediaObject::new(
                GalleryId(1),
                AlbumId(1),
                MediaVariant::Image,
                DisplayObject::new(Path::new("/g").join(name), 10, 10, 1),
                "image/jpeg",
                "admin",
            )
        };

        assert_eq!(derived_file_name("zThumb_", &image("photo.jpg")), "zThumb_photo.jpg.jpg");
        assert_ne!(
            derived_file_name("zThumb_", &image("photo.jpg")),
            derived_file_name("zThumb_", &image("photo.png"))
        );

        let mut clip = MediaObject::new_external(GalleryId(1), AlbumId(1), "<iframe/>", "Clip", "admin");
        let mut twin = clip.clone();
        assert_eq!(derived_file_name("zThumb_", &clip), "zThumb_external_Clip.jpg");
        clip.id = Some(MediaObjectId(7));
        twin.id = Some(MediaObjectId(8));
        assert_eq!(derived_file_name("zThumb_", &clip), "zThumb_external_7.jpg");
        assert_ne!(derived_file_name("zThumb_", &clip), derived_file_name("zThumb_", &twin));
    }
}
