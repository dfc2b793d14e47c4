//! Orphan removal, run after traversal.
//!
//! Two passes:
//! 1. Records still unsynchronized are deleted, along with the derived files
//!    they own. Albums are deleted parent-first and the store cascades the
//!    rest.
//! 2. Files carrying a derived-file prefix in an album's candidate
//!    directories are deleted unless a surviving object of that album
//!    references them by name (as a rendition or as its original).
//!
//! File deletions are best effort: failures are logged, recorded as skipped
//! items and never abort the run.

use crate::run::RunContext;
use crate::Result;
use core_library::{AlbumId, MediaObject};
use core_runtime::events::LibraryEvent;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub(crate) async fn remove_orphans(ctx: &mut RunContext<'_>) -> Result<()> {
    remove_orphan_media(ctx).await?;
    remove_orphan_albums(ctx).await?;
    remove_orphan_derived_files(ctx).await;
    Ok(())
}

async fn remove_orphan_media(ctx: &mut RunContext<'_>) -> Result<()> {
    let orphans: Vec<MediaObject> = ctx
        .state
        .media_objects()
        .filter(|object| !object.is_synchronized)
        .cloned()
        .collect();
    let in_use: HashSet<PathBuf> = ctx
        .state
        .media_objects()
        .filter(|object| object.is_synchronized)
        .flat_map(|object| [&object.thumbnail, &object.optimized, &object.original])
        .filter(|d| !d.is_empty())
        .map(|d| d.physical_path.clone())
        .collect();

    for object in orphans {
        let Some(id) = object.id else { continue };

        if ctx.media.delete(id).await? {
            debug!(media_object_id = %id, path = %object.original.physical_path.display(), "Deleted orphan media object");
            ctx.update_stats(|s| s.media_objects_deleted += 1);
            ctx.emit_library(LibraryEvent::MediaObjectDeleted {
                media_object_id: id.0,
            });
        }
        ctx.deleted_media.insert(id);

        for rendition in [&object.thumbnail, &object.optimized] {
            if rendition.is_empty() || rendition.physical_path == object.original.physical_path {
                continue;
            }
            if in_use.contains(&rendition.physical_path) || !may_delete(ctx, &rendition.physical_path) {
                continue;
            }
            delete_file(ctx, &rendition.physical_path).await;
        }
    }

    Ok(())
}

async fn remove_orphan_albums(ctx: &mut RunContext<'_>) -> Result<()> {
    let mut orphans: Vec<(AlbumId, PathBuf)> = ctx
        .state
        .albums()
        .filter(|album| !album.is_synchronized)
        .filter_map(|album| album.id.map(|id| (id, album.physical_path.clone())))
        .collect();
    // Parents before children
    orphans.sort_by_key(|(_, path)| path.components().count());

    for (id, path) in orphans {
        if ctx.albums.delete(id).await? {
            debug!(album_id = %id, path = %path.display(), "Deleted orphan album");
            ctx.update_stats(|s| s.albums_deleted += 1);
            ctx.emit_library(LibraryEvent::AlbumDeleted { album_id: id.0 });
        }

        for mirror in mirror_directories(ctx, &path) {
            match tokio::fs::remove_dir_all(&mirror).await {
                Ok(()) => debug!(path = %mirror.display(), "Removed derived directory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %mirror.display(), error = %e, "Cannot remove derived directory");
                }
            }
        }
    }

    Ok(())
}

/// Directories under the alternate roots that mirror `album_dir`.
fn mirror_directories(ctx: &RunContext<'_>, album_dir: &Path) -> BTreeSet<PathBuf> {
    let mut dirs = BTreeSet::new();
    if ctx.settings.thumbnail_path.is_some() {
        dirs.insert(ctx.settings.thumbnail_directory(album_dir));
    }
    if ctx.settings.optimized_path.is_some() {
        dirs.insert(ctx.settings.optimized_directory(album_dir));
    }
    // Never remove an alternate root itself or anything inside the media tree
    dirs.retain(|dir| {
        !dir.starts_with(&ctx.settings.media_path)
            && Some(dir.as_path()) != ctx.settings.thumbnail_path.as_deref()
            && Some(dir.as_path()) != ctx.settings.optimized_path.as_deref()
    });
    dirs
}

async fn remove_orphan_derived_files(ctx: &mut RunContext<'_>) {
    let mut referenced: HashMap<AlbumId, HashSet<String>> = HashMap::new();
    for object in ctx.state.media_objects().filter(|o| o.is_synchronized) {
        referenced
            .entry(object.album_id)
            .or_default()
            .extend(
                object
                    .derived_file_names()
                    .chain(std::iter::once(object.original.file_name.as_str()))
                    .map(str::to_string),
            );
    }

    let albums: Vec<(AlbumId, PathBuf)> = ctx
        .state
        .albums()
        .filter(|album| album.is_synchronized)
        .filter_map(|album| album.id.map(|id| (id, album.physical_path.clone())))
        .collect();

    let mut removed = 0u64;
    for (album_id, album_dir) in albums {
        let empty = HashSet::new();
        let names = referenced.get(&album_id).unwrap_or(&empty);

        for dir in candidate_directories(ctx, &album_dir) {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Cannot scan for derived files");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(path = %dir.display(), error = %e, "Cannot scan for derived files");
                        break;
                    }
                };
                let name = entry.file_name().to_string_lossy().into_owned();
                if !ctx.settings.is_derived_file_name(&name) || names.contains(&name) {
                    continue;
                }
                if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                    continue;
                }
                if delete_file(ctx, &entry.path()).await {
                    removed += 1;
                }
            }
        }
    }

    if removed > 0 {
        info!(removed, "Removed orphan derived files");
    }
}

/// Directories that may hold derived files for the album at `album_dir`.
fn candidate_directories(ctx: &RunContext<'_>, album_dir: &Path) -> BTreeSet<PathBuf> {
    let mut dirs = BTreeSet::new();
    if !ctx.settings.media_objects_read_only {
        dirs.insert(album_dir.to_path_buf());
    }
    dirs.insert(ctx.settings.thumbnail_directory(album_dir));
    dirs.insert(ctx.settings.optimized_directory(album_dir));
    dirs
}

/// Files inside a read-only media path are never touched.
fn may_delete(ctx: &RunContext<'_>, path: &Path) -> bool {
    !(ctx.settings.media_objects_read_only && path.starts_with(&ctx.settings.media_path)
        && !is_under_alternate_root(ctx, path))
}

fn is_under_alternate_root(ctx: &RunContext<'_>, path: &Path) -> bool {
    [&ctx.settings.thumbnail_path, &ctx.settings.optimized_path]
        .into_iter()
        .flatten()
        .any(|root| path.starts_with(root))
}

async fn delete_file(ctx: &RunContext<'_>, path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Deleted derived file");
            ctx.update_stats(|s| s.derived_files_deleted += 1);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            ctx.record_skip(path, format!("Cannot delete derived file: {}", e));
            false
        }
    }
}
