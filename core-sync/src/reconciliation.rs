//! # Reconciliation State
//!
//! Before walking the disk, every album and media object under the start
//! album is loaded from the store and flagged unsynchronized. The walker
//! flips the flag on whatever it finds; anything still unsynchronized at the
//! end is an orphan.
//!
//! Albums are keyed by physical path and file-backed media objects by hash
//! key. External objects have no file and are kept per album.

use crate::identity::HashKeyRegistry;
use crate::{Result, SyncError};
use core_library::repositories::{AlbumRepository, MediaObjectRepository};
use core_library::{Album, AlbumId, MediaObject};
use core_runtime::config::GallerySettings;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Records known to the store for the subtree being synchronized.
#[derive(Debug, Default)]
pub struct ReconciliationState {
    albums: HashMap<PathBuf, Album>,
    media_objects: HashMap<String, MediaObject>,
    originals: HashMap<PathBuf, String>,
    externals: HashMap<AlbumId, Vec<MediaObject>>,
}

impl ReconciliationState {
    /// Load `start` and, when `recursive`, all its descendants.
    ///
    /// # Errors
    ///
    /// Returns `NotWritable` if any loaded record is a shared read-only
    /// instance, or a library error if loading fails.
    pub async fn load(
        start: Album,
        recursive: bool,
        albums: &dyn AlbumRepository,
        media: &dyn MediaObjectRepository,
    ) -> Result<Self> {
        let mut state = Self::default();
        let mut queue = VecDeque::from([start]);

        while let Some(mut album) = queue.pop_front() {
            ensure_writable_album(&album)?;
            let Some(album_id) = album.id else {
                return Err(SyncError::NotWritable {
                    entity_type: "Album".to_string(),
                    id: album.physical_path.display().to_string(),
                });
            };

            for mut object in media.find_by_album(album_id).await? {
                ensure_writable_media(&object)?;
                object.is_synchronized = false;
                state.insert_media_object(object);
            }

            if recursive {
                for child_id in albums.find_child_ids(album_id).await? {
                    let child = albums
                        .find_by_id(child_id)
                        .await?
                        .ok_or(SyncError::AlbumNotFound {
                            album_id: child_id.0,
                        })?;
                    queue.push_back(child);
                }
            }

            album.is_synchronized = false;
            state.albums.insert(album.physical_path.clone(), album);
        }

        info!(
            albums = state.albums.len(),
            media_objects = state.media_objects.len(),
            "Loaded reconciliation state"
        );
        Ok(state)
    }

    pub fn album(&self, path: &Path) -> Option<&Album> {
        self.albums.get(path)
    }

    pub fn album_mut(&mut self, path: &Path) -> Option<&mut Album> {
        self.albums.get_mut(path)
    }

    pub fn insert_album(&mut self, album: Album) {
        self.albums.insert(album.physical_path.clone(), album);
    }

    pub fn albums(&self) -> impl Iterator<Item = &Album> {
        self.albums.values()
    }

    pub fn albums_mut(&mut self) -> impl Iterator<Item = &mut Album> {
        self.albums.values_mut()
    }

    pub fn media_object(&self, hash_key: &str) -> Option<&MediaObject> {
        self.media_objects.get(hash_key)
    }

    /// Hash key of the object whose original lives at `path`.
    pub fn key_for_original(&self, path: &Path) -> Option<&str> {
        self.originals.get(path).map(String::as_str)
    }

    /// Remove the object stored under `hash_key`, along with its path index.
    pub fn take_media_object(&mut self, hash_key: &str) -> Option<MediaObject> {
        let object = self.media_objects.remove(hash_key)?;
        if self.originals.get(&object.original.physical_path).map(String::as_str) == Some(hash_key)
        {
            self.originals.remove(&object.original.physical_path);
        }
        Some(object)
    }

    /// Store a file-backed object under its current hash key, or an external
    /// object under its album.
    pub fn insert_media_object(&mut self, object: MediaObject) {
        if object.variant.is_external() {
            self.externals.entry(object.album_id).or_default().push(object);
            return;
        }
        self.originals
            .insert(object.original.physical_path.clone(), object.hash_key.clone());
        self.media_objects.insert(object.hash_key.clone(), object);
    }

    pub fn media_objects(&self) -> impl Iterator<Item = &MediaObject> {
        self.media_objects
            .values()
            .chain(self.externals.values().flatten())
    }

    pub fn externals_mut(&mut self, album_id: AlbumId) -> Option<&mut Vec<MediaObject>> {
        self.externals.get_mut(&album_id)
    }
}

fn ensure_writable_album(album: &Album) -> Result<()> {
    if album.is_writable() {
        return Ok(());
    }
    Err(SyncError::NotWritable {
        entity_type: "Album".to_string(),
        id: album
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| album.physical_path.display().to_string()),
    })
}

fn ensure_writable_media(object: &MediaObject) -> Result<()> {
    if object.is_writable() {
        return Ok(());
    }
    Err(SyncError::NotWritable {
        entity_type: "MediaObject".to_string(),
        id: object
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| object.hash_key.clone()),
    })
}

/// Seed the hash registry with every key in the gallery, not just the
/// subtree, so new keys are unique gallery-wide.
pub async fn load_hash_keys(
    media: &dyn MediaObjectRepository,
    settings: &GallerySettings,
) -> Result<HashKeyRegistry> {
    let keys = media.find_hash_keys(settings.gallery_id).await?;
    debug!(count = keys.len(), "Loaded hash keys");
    Ok(HashKeyRegistry::new(keys))
}

/// True for names starting with a dot.
pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// True when `file_name` is a derived file stored beside originals, which the
/// walker never treats as media.
pub(crate) fn is_colocated_derived_file(settings: &GallerySettings, file_name: &str) -> bool {
    (settings.thumbnails_share_media_path()
        && file_name.starts_with(&settings.thumbnail_file_name_prefix))
        || (settings.optimized_share_media_path()
            && file_name.starts_with(&settings.optimized_file_name_prefix))
}

/// Directories under the media path that hold derived files rather than albums.
pub(crate) fn is_alternate_root(settings: &GallerySettings, dir: &Path) -> bool {
    settings.thumbnail_path.as_deref() == Some(dir) || settings.optimized_path.as_deref() == Some(dir)
}

/// Count the files the walker will visit under `root`, for progress reporting.
pub async fn count_files(root: &Path, recursive: bool, settings: &GallerySettings) -> Result<u64> {
    let root = root.to_path_buf();
    let settings = settings.clone();

    tokio::task::spawn_blocking(move || {
        // Symlinks are followed to match the walker's classification
        let walker = WalkDir::new(&root).min_depth(1).follow_links(true);
        let walker = if recursive { walker } else { walker.max_depth(1) };

        walker
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !is_hidden(&name) && !is_alternate_root(&settings, entry.path())
            })
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                !is_colocated_derived_file(&settings, &entry.file_name().to_string_lossy())
            })
            .count() as u64
    })
    .await
    .map_err(|e| SyncError::Media(format!("File count task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_runtime::config::GalleryId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_count_files_skips_hidden_and_derived() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.jpg"), b"a").unwrap();
        std::fs::write(root.join("zThumb_a.jpg"), b"t").unwrap();
        std::fs::write(root.join(".DS_Store"), b"x").unwrap();
        std::fs::create_dir(root.join("trip")).unwrap();
        std::fs::write(root.join("trip/b.mp4"), b"b").unwrap();
        std::fs::create_dir(root.join(".git")).unwrap();
        std::fs::write(root.join(".git/config"), b"c").unwrap();

        let settings = GallerySettings::builder(GalleryId(1), root).build().unwrap();

        assert_eq!(count_files(root, true, &settings).await.unwrap(), 2);
        assert_eq!(count_files(root, false, &settings).await.unwrap(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_count_files_follows_symlinks() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(outside.path().join("linked.jpg"), b"l").unwrap();
        std::fs::create_dir(outside.path().join("shared")).unwrap();
        std::fs::write(outside.path().join("shared/c.jpg"), b"c").unwrap();
        std::fs::write(root.join("a.jpg"), b"a").unwrap();
        std::os::unix::fs::symlink(outside.path().join("linked.jpg"), root.join("linked.jpg")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("shared"), root.join("shared")).unwrap();

        let settings = GallerySettings::builder(GalleryId(1), root).build().unwrap();

        assert_eq!(count_files(root, true, &settings).await.unwrap(), 3);
        assert_eq!(count_files(root, false, &settings).await.unwrap(), 2);
    }

    #[test]
    fn test_derived_files_with_alternate_roots_are_media() {
        let settings = GallerySettings::builder(GalleryId(1), "/g")
            .thumbnail_path("/thumbs")
            .build()
            .unwrap();

        assert!(!is_colocated_derived_file(&settings, "zThumb_a.jpg"));
        assert!(is_colocated_derived_file(&settings, "zOpt_a.jpg"));
    }

    #[test]
    fn test_state_indexes_originals() {
        let mut state = ReconciliationState::default();
        let mut object = MediaObject::new(
            GalleryId(1),
            AlbumId(1),
            core_library::MediaVariant::Image,
            core_library::DisplayObject::new("/g/a.jpg", 1, 1, 1),
            "image/jpeg",
            "admin",
        );
        object.hash_key = "k1".to_string();
        state.insert_media_object(object);

        assert_eq!(state.key_for_original(Path::new("/g/a.jpg")), Some("k1"));
        let taken = state.take_media_object("k1").unwrap();
        assert_eq!(taken.hash_key, "k1");
        assert!(state.key_for_original(Path::new("/g/a.jpg")).is_none());
        assert!(state.media_object("k1").is_none());
    }
}
