//! Depth-first directory traversal.
//!
//! Uses an explicit stack instead of recursion. Each directory's files are
//! handled in name order before any of its subdirectories, and subdirectories
//! are visited in name order, matching a recursive descent.

use crate::reconciliation::{is_alternate_root, is_colocated_derived_file, is_hidden};
use crate::run::RunContext;
use crate::{album_reconciler, media_reconciler, Result, SyncError};
use core_runtime::logging::relative_display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

struct WorkItem {
    dir: PathBuf,
    /// Album directory of the parent; `None` for the start directory
    parent: Option<PathBuf>,
}

#[derive(Default)]
struct Listing {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

/// Walk from `start_dir`, whose album is already in the reconciliation state.
pub(crate) async fn walk(ctx: &mut RunContext<'_>, start_dir: &Path) -> Result<()> {
    let mut stack = vec![WorkItem {
        dir: start_dir.to_path_buf(),
        parent: None,
    }];

    while let Some(item) = stack.pop() {
        let album_dir = match &item.parent {
            None => {
                if let Some(album) = ctx.state.album_mut(&item.dir) {
                    album.is_synchronized = true;
                    album.regenerate_thumbnail_on_save = ctx.options.overwrite_thumbnail;
                }
                item.dir.clone()
            }
            Some(parent) => album_reconciler::reconcile(ctx, &item.dir, parent).await?,
        };

        let listing = match list_directory(&item.dir).await {
            Ok(listing) => listing,
            Err(e) if e.kind() == ErrorKind::PermissionDenied && item.parent.is_some() => {
                if let Some(album) = ctx.state.album_mut(&album_dir) {
                    album.is_synchronized = false;
                }
                ctx.record_skip(&item.dir, format!("Directory is not readable: {}", e));
                continue;
            }
            Err(e) => return Err(SyncError::io(&item.dir, e)),
        };

        debug!(
            dir = %relative_display(&ctx.settings.media_path, &item.dir),
            files = listing.files.len(),
            dirs = listing.dirs.len(),
            "Listing directory"
        );

        for file in listing.files {
            let name = file_name(&file);
            if is_hidden(&name) {
                ctx.record_skip(&file, "Hidden file");
                continue;
            }
            if is_colocated_derived_file(ctx.settings, &name) {
                continue;
            }

            media_reconciler::reconcile_file(ctx, &file, &album_dir).await?;
            ctx.file_done(&file)?;
        }

        media_reconciler::reconcile_externals(ctx, &album_dir).await?;

        if !ctx.options.recursive {
            continue;
        }

        for dir in listing.dirs.into_iter().rev() {
            if is_hidden(&file_name(&dir)) {
                ctx.record_skip(&dir, "Hidden directory");
                continue;
            }
            if is_alternate_root(ctx.settings, &dir) {
                continue;
            }
            stack.push(WorkItem {
                dir,
                parent: Some(album_dir.clone()),
            });
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Immediate files and subdirectories of `dir`, each sorted by name.
///
/// Symlinks are classified by their target; dangling links are ignored.
async fn list_directory(dir: &Path) -> std::io::Result<Listing> {
    let mut listing = Listing::default();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;

        let (is_file, is_dir) = if file_type.is_symlink() {
            match tokio::fs::metadata(&path).await {
                Ok(meta) => (meta.is_file(), meta.is_dir()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring dangling symlink");
                    continue;
                }
            }
        } else {
            (file_type.is_file(), file_type.is_dir())
        };

        if is_file {
            listing.files.push(path);
        } else if is_dir {
            listing.dirs.push(path);
        }
    }

    listing.files.sort();
    listing.dirs.sort();
    Ok(listing)
}
