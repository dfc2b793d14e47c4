//! Find-or-create the album for each directory, and assign album thumbnails
//! once the run's media objects are settled.

use crate::run::RunContext;
use crate::{Result, SyncError};
use core_library::{Album, AlbumId, MediaObjectId};
use core_runtime::events::LibraryEvent;
use core_runtime::logging::relative_display;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reconcile the album for `dir` under the album at `parent_dir`.
///
/// Returns the album's key (its directory) in the reconciliation state.
/// Albums are saved as soon as they are new or changed so that media objects
/// can reference them.
pub(crate) async fn reconcile(
    ctx: &mut RunContext<'_>,
    dir: &Path,
    parent_dir: &Path,
) -> Result<PathBuf> {
    let parent = ctx
        .state
        .album(parent_dir)
        .cloned()
        .ok_or_else(|| SyncError::NotWritable {
            entity_type: "Album".to_string(),
            id: parent_dir.display().to_string(),
        })?;

    let overwrite_thumbnail = ctx.options.overwrite_thumbnail;
    let actor = ctx.actor;

    if let Some(album) = ctx.state.album_mut(dir) {
        album.is_synchronized = true;
        album.regenerate_thumbnail_on_save = overwrite_thumbnail;

        let mut changed = false;
        if parent.is_private && !album.is_private {
            album.is_private = true;
            changed = true;
        }
        if album.parent_id != parent.id {
            album.parent_id = parent.id;
            changed = true;
        }

        if changed {
            album.touch(actor);
            let mut copy = album.clone();
            ctx.albums.save(&mut copy).await?;
            debug!(path = %relative_display(&ctx.settings.media_path, dir), "Updated album");
            ctx.update_stats(|s| s.albums_updated += 1);
            ctx.album_saved().await?;
        }
        return Ok(dir.to_path_buf());
    }

    let directory_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut album = Album::new_child(&parent, &directory_name, actor);
    album.regenerate_thumbnail_on_save = overwrite_thumbnail;
    let album_id = ctx.albums.save(&mut album).await?;

    debug!(path = %relative_display(&ctx.settings.media_path, dir), album_id = %album_id, "Created album");
    ctx.update_stats(|s| s.albums_created += 1);
    ctx.emit_library(LibraryEvent::AlbumCreated {
        album_id: album_id.0,
        path: dir.display().to_string(),
    });
    ctx.state.insert_album(album);
    ctx.album_saved().await?;

    Ok(dir.to_path_buf())
}

/// Point each surviving album at its first media object when its thumbnail
/// is unset or stale, or when the album was flagged for reassignment.
pub(crate) async fn assign_thumbnails(ctx: &mut RunContext<'_>) -> Result<()> {
    let mut first_by_album: HashMap<AlbumId, (&str, MediaObjectId)> = HashMap::new();
    let mut owner: HashMap<MediaObjectId, AlbumId> = HashMap::new();
    for object in ctx.state.media_objects() {
        let Some(id) = object.id else { continue };
        if !object.is_synchronized {
            continue;
        }
        owner.insert(id, object.album_id);
        // Externals sort after files
        let sort_key = if object.variant.is_external() {
            "\u{10FFFF}"
        } else {
            object.original.file_name.as_str()
        };
        first_by_album
            .entry(object.album_id)
            .and_modify(|current| {
                if sort_key < current.0 {
                    *current = (sort_key, id);
                }
            })
            .or_insert((sort_key, id));
    }
    let first_by_album: HashMap<AlbumId, MediaObjectId> = first_by_album
        .into_iter()
        .map(|(album, (_, id))| (album, id))
        .collect();

    let mut to_save = Vec::new();
    for album in ctx.state.albums_mut() {
        if !album.is_synchronized {
            continue;
        }
        let Some(album_id) = album.id else { continue };

        let stale = match album.thumbnail_media_object_id {
            None => true,
            // Deleted, or moved to another album during this run
            Some(id) => {
                ctx.deleted_media.contains(&id)
                    || owner.get(&id).is_some_and(|owner| *owner != album_id)
            }
        };
        if !stale && !album.regenerate_thumbnail_on_save {
            continue;
        }

        let replacement = first_by_album.get(&album_id).copied();
        album.regenerate_thumbnail_on_save = false;
        if replacement != album.thumbnail_media_object_id {
            album.thumbnail_media_object_id = replacement;
            album.touch(ctx.actor);
            to_save.push(album.clone());
        }
    }

    for mut album in to_save {
        ctx.albums.save(&mut album).await?;
        ctx.update_stats(|s| s.albums_updated += 1);
        ctx.album_saved().await?;
    }

    Ok(())
}
