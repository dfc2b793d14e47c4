//! Find-or-create the media object for each file and decide which
//! derivatives need regenerating.
//!
//! Failures that concern only one file are recorded as skipped items and the
//! run carries on. Store failures propagate.

use crate::identity::{self, identity_timestamp};
use crate::media::{size_in_kb, MimeResolution};
use crate::run::RunContext;
use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use core_library::{AlbumId, DisplayObject, MediaObject, MediaVariant};
use core_runtime::config::{Dimensions, GallerySettings, MimeCategory, MimeTypeEntry};
use core_runtime::events::LibraryEvent;
use core_runtime::logging::relative_display;
use std::path::Path;
use tracing::{debug, warn};

/// Facts about a file gathered once per visit.
struct FileFacts<'p> {
    path: &'p Path,
    file_name: String,
    mime: MimeTypeEntry,
    timestamp: DateTime<Utc>,
    size_kb: u64,
}

/// Reconcile one file in the album stored at `album_dir`.
pub(crate) async fn reconcile_file(
    ctx: &mut RunContext<'_>,
    path: &Path,
    album_dir: &Path,
) -> Result<()> {
    match reconcile_file_inner(ctx, path, album_dir).await {
        Err(SyncError::UnsupportedFile { reason, .. }) => {
            ctx.record_skip(path, reason);
            Ok(())
        }
        Err(e) if !e.is_fatal() && !matches!(e, SyncError::Cancelled) => {
            ctx.record_skip(path, e.to_string());
            Ok(())
        }
        other => other,
    }
}

async fn reconcile_file_inner(
    ctx: &mut RunContext<'_>,
    path: &Path,
    album_dir: &Path,
) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mime = match ctx.mime_types.resolve(&file_name) {
        MimeResolution::Enabled(entry) => entry,
        MimeResolution::Disabled(entry) => {
            return Err(SyncError::UnsupportedFile {
                path: path.to_path_buf(),
                reason: format!("MIME type {} is disabled for this gallery", entry.full_type),
            });
        }
        MimeResolution::Unknown => {
            return Err(SyncError::UnsupportedFile {
                path: path.to_path_buf(),
                reason: "Unrecognized file type".to_string(),
            });
        }
    };

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| SyncError::io(path, e))?;
    let modified = metadata.modified().map_err(|e| SyncError::io(path, e))?;
    let facts = FileFacts {
        path,
        file_name,
        mime,
        timestamp: identity_timestamp(modified),
        size_kb: size_in_kb(metadata.len()),
    };

    let album_id = ctx
        .state
        .album(album_dir)
        .and_then(|album| album.id)
        .ok_or_else(|| SyncError::NotWritable {
            entity_type: "Album".to_string(),
            id: album_dir.display().to_string(),
        })?;

    let matched = identity::resolve(
        &ctx.state,
        &ctx.hashes,
        album_id,
        path,
        &facts.file_name,
        facts.timestamp,
    )
    .await;

    match matched {
        Some(key) => update_existing(ctx, &key, &facts, album_id, album_dir).await,
        None => create_new(ctx, &facts, album_id, album_dir).await,
    }
}

async fn update_existing(
    ctx: &mut RunContext<'_>,
    key: &str,
    facts: &FileFacts<'_>,
    album_id: AlbumId,
    album_dir: &Path,
) -> Result<()> {
    let Some(mut object) = ctx.state.media_object(key).cloned() else {
        return create_new(ctx, facts, album_id, album_dir).await;
    };
    object.is_synchronized = true;
    let before = object.clone();

    // Inspect before touching shared state so a decode failure leaves it intact
    let dimensions = match object.variant {
        MediaVariant::Image => Some(ctx.inspector.image_dimensions(facts.path).await?),
        _ => None,
    };

    if object.album_id != album_id {
        debug!(path = %facts.path.display(), "Media object moved");
        object.album_id = album_id;
    }
    // Renditions of a moved file belong to the old directory
    let moved = object.original.physical_path != facts.path;
    if moved {
        object.original.set_path(facts.path);
    }
    if object.mime_type != facts.mime.full_type {
        object.mime_type = facts.mime.full_type.clone();
    }
    object.original.size_kb = facts.size_kb;
    if let Some(dimensions) = dimensions {
        object.original.set_dimensions(dimensions);
    }

    let mut new_key = None;
    if !ctx
        .hashes
        .chain_contains(&facts.file_name, facts.timestamp, &object.hash_key)
    {
        ctx.hashes.release(&object.hash_key);
        let key = ctx.hashes.assign_unique(&facts.file_name, facts.timestamp);
        object.hash_key = key.clone();
        new_key = Some(key);
    }

    if ctx.options.overwrite_thumbnail || moved || !rendition_exists(&object.thumbnail).await {
        object.regenerate_thumbnail_on_save = true;
    }
    if object.variant.is_image() {
        let overwrite = ctx.options.overwrite_optimized || moved;
        decide_optimized(ctx.settings, &mut object, overwrite).await;
    }
    if ctx.options.regenerate_metadata {
        object.regenerate_metadata_on_save = true;
    }

    if object.needs_regeneration() {
        generate(ctx, &mut object, album_dir).await;
    }

    ctx.state.take_media_object(key);
    if object != before {
        object.touch(ctx.actor);
        let id = ctx.media.save(&mut object).await?;
        ctx.update_stats(|s| s.media_objects_updated += 1);
        ctx.emit_library(LibraryEvent::MediaObjectUpdated {
            media_object_id: id.0,
            album_id: album_id.0,
        });
        if let Some(key) = new_key {
            debug!(path = %facts.path.display(), hash_key = %key, "Recomputed hash key");
        }
    }
    ctx.state.insert_media_object(object);

    Ok(())
}

async fn create_new(
    ctx: &mut RunContext<'_>,
    facts: &FileFacts<'_>,
    album_id: AlbumId,
    album_dir: &Path,
) -> Result<()> {
    let variant = variant_for(&facts.mime);
    let dimensions = match variant {
        MediaVariant::Image => ctx.inspector.image_dimensions(facts.path).await?,
        _ => default_dimensions(ctx.settings, &variant),
    };

    let original = DisplayObject::new(facts.path, dimensions.width, dimensions.height, facts.size_kb);
    let mut object = MediaObject::new(
        ctx.gallery_id(),
        album_id,
        variant,
        original,
        facts.mime.full_type.clone(),
        ctx.actor,
    );
    object.hash_key = ctx.hashes.assign_unique(&facts.file_name, facts.timestamp);
    object.regenerate_thumbnail_on_save = true;
    object.regenerate_metadata_on_save = true;
    if object.variant.is_image() {
        decide_optimized(ctx.settings, &mut object, ctx.options.overwrite_optimized).await;
    }

    generate(ctx, &mut object, album_dir).await;

    if object.variant.is_image()
        && ctx.settings.discard_original_image_after_import
        && !ctx.settings.media_objects_read_only
    {
        discard_original(ctx, &mut object).await;
    }

    let id = ctx.media.save(&mut object).await?;
    debug!(
        path = %relative_display(&ctx.settings.media_path, &object.original.physical_path),
        media_object_id = %id,
        "Created media object"
    );
    ctx.update_stats(|s| s.media_objects_created += 1);
    ctx.emit_library(LibraryEvent::MediaObjectCreated {
        media_object_id: id.0,
        album_id: album_id.0,
        file_name: object.original.file_name.clone(),
    });
    ctx.state.insert_media_object(object);

    Ok(())
}

/// Reconcile the album's external objects, which have no file to walk.
pub(crate) async fn reconcile_externals(ctx: &mut RunContext<'_>, album_dir: &Path) -> Result<()> {
    let Some(album_id) = ctx.state.album(album_dir).and_then(|album| album.id) else {
        return Ok(());
    };
    let Some(externals) = ctx.state.externals_mut(album_id) else {
        return Ok(());
    };
    let mut externals = std::mem::take(externals);

    for object in &mut externals {
        object.is_synchronized = true;
        let before = object.clone();

        if ctx.options.overwrite_thumbnail || !rendition_exists(&object.thumbnail).await {
            object.regenerate_thumbnail_on_save = true;
        }
        if object.needs_regeneration() {
            generate(ctx, object, album_dir).await;
        }

        if *object != before {
            object.touch(ctx.actor);
            ctx.media.save(object).await?;
            ctx.update_stats(|s| s.media_objects_updated += 1);
        }
    }

    if let Some(slot) = ctx.state.externals_mut(album_id) {
        *slot = externals;
    }
    Ok(())
}

fn variant_for(mime: &MimeTypeEntry) -> MediaVariant {
    match mime.category() {
        MimeCategory::Image => MediaVariant::Image,
        MimeCategory::Video => MediaVariant::Video,
        MimeCategory::Audio => MediaVariant::Audio,
        MimeCategory::Other => MediaVariant::Generic,
    }
}

fn default_dimensions(settings: &GallerySettings, variant: &MediaVariant) -> Dimensions {
    match variant {
        MediaVariant::Video => settings.default_video_dimensions,
        MediaVariant::Audio => settings.default_audio_dimensions,
        MediaVariant::External { .. } => settings.default_external_dimensions,
        MediaVariant::Image | MediaVariant::Generic => settings.default_generic_dimensions,
    }
}

/// True when an optimized rendition is warranted for `original`.
pub(crate) fn needs_optimized(settings: &GallerySettings, original: &DisplayObject) -> bool {
    original.size_kb > settings.optimized_image_trigger_size_kb
        || original.width > settings.max_optimized_length
        || original.height > settings.max_optimized_length
}

async fn decide_optimized(settings: &GallerySettings, object: &mut MediaObject, overwrite: bool) {
    if !needs_optimized(settings, &object.original) {
        object.optimized = object.original.clone();
        object.regenerate_optimized_on_save = false;
        return;
    }

    let points_at_original = object.optimized.physical_path == object.original.physical_path;
    if overwrite || points_at_original || !rendition_exists(&object.optimized).await {
        object.regenerate_optimized_on_save = true;
    }
}

async fn rendition_exists(rendition: &DisplayObject) -> bool {
    if rendition.is_empty() {
        return false;
    }
    tokio::fs::try_exists(&rendition.physical_path)
        .await
        .unwrap_or(false)
}

/// Run the derivative generator. A failure leaves the flags set and the
/// object is saved without the missing renditions.
async fn generate(ctx: &RunContext<'_>, object: &mut MediaObject, album_dir: &Path) {
    if let Err(e) = ctx.generator.generate(object, album_dir, ctx.settings).await {
        let path = if object.original.is_empty() {
            album_dir.to_path_buf()
        } else {
            object.original.physical_path.clone()
        };
        ctx.record_skip(&path, format!("Derivative generation failed: {}", e));
    }
}

/// Replace the original with its optimized rendition.
///
/// The optimized file takes the original's name (with the rendition's
/// extension) and the original is removed. Best effort: on any failure the
/// object keeps its original.
async fn discard_original(ctx: &mut RunContext<'_>, object: &mut MediaObject) {
    if object.optimized.is_empty() || object.optimized.physical_path == object.original.physical_path
    {
        return;
    }

    let original_path = object.original.physical_path.clone();
    let extension = object
        .optimized
        .physical_path
        .extension()
        .map(|e| e.to_os_string())
        .unwrap_or_default();
    let target = original_path.with_extension(&extension);

    if target != original_path && tokio::fs::try_exists(&target).await.unwrap_or(true) {
        warn!(path = %target.display(), "Cannot discard original: target name is taken");
        return;
    }

    if let Err(e) = move_file(&object.optimized.physical_path, &target).await {
        warn!(path = %original_path.display(), error = %e, "Cannot discard original");
        return;
    }
    if target != original_path {
        if let Err(e) = tokio::fs::remove_file(&original_path).await {
            warn!(path = %original_path.display(), error = %e, "Cannot remove original");
        }
    }

    let timestamp = match tokio::fs::metadata(&target).await.and_then(|m| m.modified()) {
        Ok(modified) => identity_timestamp(modified),
        Err(_) => Utc::now(),
    };
    let file_name = object.optimized.file_name.clone();
    let mut replacement = object.optimized.clone();
    replacement.set_path(&target);
    let target_name = replacement.file_name.clone();

    ctx.hashes.release(&object.hash_key);
    object.hash_key = ctx.hashes.assign_unique(&target_name, timestamp);
    if let MimeResolution::Enabled(entry) = ctx.mime_types.resolve(&target_name) {
        object.mime_type = entry.full_type;
    }
    object.original = replacement.clone();
    object.optimized = replacement;
    debug!(from = %file_name, to = %target_name, "Discarded original after import");
}

async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_runtime::config::GalleryId;

    fn settings() -> GallerySettings {
        GallerySettings::builder(GalleryId(1), "/g").build().unwrap()
    }

    #[test]
    fn test_optimized_needed_by_size_or_dimension() {
        let settings = settings();
        assert!(needs_optimized(&settings, &DisplayObject::new("/g/a.jpg", 100, 100, 2048)));
        assert!(needs_optimized(&settings, &DisplayObject::new("/g/a.jpg", 4000, 10, 10)));
        assert!(needs_optimized(&settings, &DisplayObject::new("/g/a.jpg", 10, 1281, 10)));
        assert!(!needs_optimized(&settings, &DisplayObject::new("/g/a.jpg", 1280, 1280, 50)));
    }

    #[tokio::test]
    async fn test_small_image_optimized_equals_original() {
        let settings = settings();
        let mut object = MediaObject::new(
            GalleryId(1),
            AlbumId(1),
            MediaVariant::Image,
            DisplayObject::new("/g/a.jpg", 100, 80, 10),
            "image/jpeg",
            "admin",
        );
        object.optimized = DisplayObject::new("/g/zOpt_a.jpg", 90, 70, 8);

        decide_optimized(&settings, &mut object, false).await;
        assert_eq!(object.optimized, object.original);
        assert!(!object.regenerate_optimized_on_save);
    }

    #[tokio::test]
    async fn test_large_image_with_missing_rendition_is_flagged() {
        let settings = settings();
        let mut object = MediaObject::new(
            GalleryId(1),
            AlbumId(1),
            MediaVariant::Image,
            DisplayObject::new("/g/a.jpg", 4000, 3000, 2048),
            "image/jpeg",
            "admin",
        );

        decide_optimized(&settings, &mut object, false).await;
        assert!(object.regenerate_optimized_on_save);
    }

    #[test]
    fn test_variant_follows_mime_category() {
        assert_eq!(variant_for(&MimeTypeEntry::new("mp4", "video/mp4", true)), MediaVariant::Video);
        assert_eq!(variant_for(&MimeTypeEntry::new("mp3", "audio/mpeg", true)), MediaVariant::Audio);
        assert_eq!(variant_for(&MimeTypeEntry::new("pdf", "application/pdf", true)), MediaVariant::Generic);
        assert_eq!(variant_for(&MimeTypeEntry::new("png", "image/png", true)), MediaVariant::Image);
    }
}
