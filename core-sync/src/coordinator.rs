//! # Synchronization Manager
//!
//! Brings a gallery's data store in line with its media directory.
//!
//! ## Overview
//!
//! The `SynchronizationManager` drives one run at a time per gallery:
//! - Claims the gallery in the [`SyncRegistry`] (a second run fails with
//!   `InProgress`)
//! - Loads existing albums and media objects into the reconciliation state
//! - Walks the directory tree depth-first, reconciling albums and files
//! - Deletes orphan records and stray derived files
//! - Reassigns album thumbnails
//! - Commits, emitting progress and lifecycle events on the `EventBus`
//!
//! ## Transactions
//!
//! The whole run executes inside a transaction on the shared session. Every
//! `checkpoint_interval` album saves the batch is committed and a new one
//! opened. On cancellation or failure only the in-flight batch is rolled
//! back; committed batches stay.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SynchronizationManager, SyncOptions, SyncRegistry, SyncRunId};
//!
//! let manager = SynchronizationManager::with_session(settings, session, SyncRegistry::new());
//! let outcome = manager
//!     .synchronize(SyncRunId::new(), "admin", SyncOptions::default())
//!     .await?;
//! println!("{} media objects created", outcome.stats.media_objects_created);
//! ```

use crate::media::{
    DerivativeGenerator, ImageDerivativeGenerator, ImageInspector, MediaInspector, MimeTypeResolver,
    MimeTypeTable,
};
use crate::reconciliation::{self, ReconciliationState};
use crate::registry::{RunHandle, SyncRegistry};
use crate::repository::{SqliteSyncRunRepository, SyncRunRecord, SyncRunRepository};
use crate::run::RunContext;
use crate::status::{SkippedItem, SyncRunId, SyncState, SyncStats, SyncStatus};
use crate::{album_reconciler, orphan, walker, Result, SyncError};
use core_library::repositories::{
    AlbumRepository, MediaObjectRepository, SqliteAlbumRepository, SqliteMediaObjectRepository,
};
use core_library::{Album, AlbumId, DbSession, TransactionManager};
use core_runtime::config::{GalleryId, GallerySettings};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Options for a single run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Descend into subdirectories
    pub recursive: bool,
    /// Regenerate every thumbnail and reassign album thumbnails
    pub overwrite_thumbnail: bool,
    /// Regenerate every optimized rendition that is needed
    pub overwrite_optimized: bool,
    /// Re-extract metadata for every media object
    pub regenerate_metadata: bool,
    /// Album saves per committed batch; 0 disables intermediate commits
    pub checkpoint_interval: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            overwrite_thumbnail: false,
            overwrite_optimized: false,
            regenerate_metadata: false,
            checkpoint_interval: 100,
        }
    }
}

/// Result of a run that did not fail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub run_id: SyncRunId,
    pub gallery_id: GalleryId,
    /// `Complete` or `Cancelled`
    pub state: SyncState,
    pub stats: SyncStats,
    pub skipped: Vec<SkippedItem>,
    pub total_files: u64,
    pub files_processed: u64,
    pub duration_ms: u64,
}

impl SyncOutcome {
    pub fn is_cancelled(&self) -> bool {
        self.state == SyncState::Cancelled
    }
}

/// Media services used during a run
#[derive(Clone)]
pub struct SyncCollaborators {
    pub mime_types: Arc<dyn MimeTypeResolver>,
    pub inspector: Arc<dyn MediaInspector>,
    pub generator: Arc<dyn DerivativeGenerator>,
}

impl SyncCollaborators {
    /// MIME table from the settings plus the `image`-backed defaults.
    pub fn from_settings(settings: &GallerySettings) -> Self {
        Self {
            mime_types: Arc::new(MimeTypeTable::from_settings(settings)),
            inspector: Arc::new(ImageInspector),
            generator: Arc::new(ImageDerivativeGenerator),
        }
    }
}

enum RunStart {
    Root,
    Album(Album),
}

/// Synchronizes one gallery.
pub struct SynchronizationManager {
    settings: Arc<GallerySettings>,
    albums: Arc<dyn AlbumRepository>,
    media: Arc<dyn MediaObjectRepository>,
    transactions: Arc<dyn TransactionManager>,
    registry: Arc<SyncRegistry>,
    collaborators: SyncCollaborators,
    event_bus: Option<EventBus>,
    run_repository: Option<Arc<dyn SyncRunRepository>>,
}

impl SynchronizationManager {
    pub fn new(
        settings: GallerySettings,
        albums: Arc<dyn AlbumRepository>,
        media: Arc<dyn MediaObjectRepository>,
        transactions: Arc<dyn TransactionManager>,
        registry: Arc<SyncRegistry>,
        collaborators: SyncCollaborators,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            albums,
            media,
            transactions,
            registry,
            collaborators,
            event_bus: None,
            run_repository: None,
        }
    }

    /// SQLite repositories and run history over `session`, default media services.
    pub fn with_session(
        settings: GallerySettings,
        session: Arc<DbSession>,
        registry: Arc<SyncRegistry>,
    ) -> Self {
        let collaborators = SyncCollaborators::from_settings(&settings);
        Self::new(
            settings,
            Arc::new(SqliteAlbumRepository::new(Arc::clone(&session))),
            Arc::new(SqliteMediaObjectRepository::new(Arc::clone(&session))),
            Arc::clone(&session) as Arc<dyn TransactionManager>,
            registry,
            collaborators,
        )
        .with_run_repository(Arc::new(SqliteSyncRunRepository::new(session)))
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_run_repository(mut self, repository: Arc<dyn SyncRunRepository>) -> Self {
        self.run_repository = Some(repository);
        self
    }

    pub fn settings(&self) -> &GallerySettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<SyncRegistry> {
        &self.registry
    }

    /// Status of this gallery's active run, if any.
    pub fn status(&self) -> Option<SyncStatus> {
        self.registry.status(self.settings.gallery_id)
    }

    /// Ask this gallery's active run to stop. Returns `false` if none is running.
    pub fn cancel(&self) -> bool {
        self.registry.cancel(self.settings.gallery_id)
    }

    /// Synchronize the whole gallery from its root album, creating the root
    /// album on first use.
    ///
    /// A cancelled run returns `Ok` with a `Cancelled` outcome.
    ///
    /// # Errors
    ///
    /// Returns `InProgress` if the gallery is already synchronizing, or the
    /// fatal error that aborted the run.
    #[instrument(skip(self, options), fields(gallery_id = %self.settings.gallery_id, run_id = %run_id))]
    pub async fn synchronize(
        &self,
        run_id: SyncRunId,
        actor: &str,
        options: SyncOptions,
    ) -> Result<SyncOutcome> {
        let root_path = self.settings.media_path.clone();
        self.run(run_id, RunStart::Root, root_path, actor, options).await
    }

    /// Synchronize the subtree rooted at `album_id`.
    ///
    /// # Errors
    ///
    /// Returns `AlbumNotFound` if the album does not exist, otherwise as
    /// [`synchronize`](Self::synchronize).
    #[instrument(skip(self, options), fields(gallery_id = %self.settings.gallery_id, run_id = %run_id, album_id = %album_id))]
    pub async fn synchronize_album(
        &self,
        run_id: SyncRunId,
        album_id: AlbumId,
        actor: &str,
        options: SyncOptions,
    ) -> Result<SyncOutcome> {
        let album = self
            .albums
            .find_by_id(album_id)
            .await?
            .ok_or(SyncError::AlbumNotFound {
                album_id: album_id.0,
            })?;
        if album.gallery_id != self.settings.gallery_id {
            return Err(SyncError::AlbumNotFound {
                album_id: album_id.0,
            });
        }
        let root_path = album.physical_path.clone();
        self.run(run_id, RunStart::Album(album), root_path, actor, options)
            .await
    }

    async fn run(
        &self,
        run_id: SyncRunId,
        start: RunStart,
        root_path: PathBuf,
        actor: &str,
        options: SyncOptions,
    ) -> Result<SyncOutcome> {
        let started = Instant::now();
        let gallery_id = self.settings.gallery_id;
        let start_album_id = match &start {
            RunStart::Root => None,
            RunStart::Album(album) => album.id,
        };

        let guard = self
            .registry
            .acquire(SyncStatus::new(gallery_id, run_id, &root_path, actor))?;
        let handle = guard.handle().clone();

        self.persist_start(&handle, start_album_id, options.recursive)
            .await;

        let result = self
            .execute(run_id, start, &root_path, actor, &options, &handle)
            .await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(root_album_id) => {
                handle.update(|s| s.transition(SyncState::Complete))?;
                let status = handle.snapshot();
                info!(
                    run_id = %run_id,
                    created = status.stats.media_objects_created,
                    updated = status.stats.media_objects_updated,
                    deleted = status.stats.media_objects_deleted,
                    skipped = status.stats.files_skipped,
                    duration_ms,
                    "Synchronization completed"
                );
                self.emit(SyncEvent::Completed {
                    run_id: run_id.as_str(),
                    gallery_id: gallery_id.value(),
                    albums_created: status.stats.albums_created,
                    albums_deleted: status.stats.albums_deleted,
                    media_objects_created: status.stats.media_objects_created,
                    media_objects_updated: status.stats.media_objects_updated,
                    media_objects_deleted: status.stats.media_objects_deleted,
                    files_skipped: status.stats.files_skipped,
                    duration_ms,
                });
                self.persist_finish(&status, Some(root_album_id), options.recursive)
                    .await;
                Ok(outcome(&status, duration_ms))
            }
            Err(SyncError::Cancelled) => {
                self.rollback().await;
                handle.update(|s| s.transition(SyncState::Cancelled))?;
                let status = handle.snapshot();
                info!(run_id = %run_id, files_processed = status.current_file_index, "Synchronization cancelled");
                self.emit(SyncEvent::Cancelled {
                    run_id: run_id.as_str(),
                    gallery_id: gallery_id.value(),
                    files_processed: status.current_file_index,
                });
                self.persist_finish(&status, start_album_id, options.recursive)
                    .await;
                Ok(outcome(&status, duration_ms))
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Synchronization failed");
                self.rollback().await;
                let message = e.to_string();
                handle.update(|s| s.fail(message.clone()))?;
                let status = handle.snapshot();
                self.emit(SyncEvent::Failed {
                    run_id: run_id.as_str(),
                    gallery_id: gallery_id.value(),
                    message,
                    files_processed: status.current_file_index,
                });
                self.persist_finish(&status, start_album_id, options.recursive)
                    .await;
                Err(e)
            }
        }
    }

    /// Everything between acquiring the gallery and reporting the result.
    /// Returns the start album's ID.
    async fn execute(
        &self,
        run_id: SyncRunId,
        start: RunStart,
        root_path: &std::path::Path,
        actor: &str,
        options: &SyncOptions,
        handle: &RunHandle,
    ) -> Result<AlbumId> {
        tokio::fs::metadata(root_path)
            .await
            .map_err(|e| SyncError::io(root_path, e))?;

        self.transactions.begin().await?;

        let start_album = match start {
            RunStart::Root => self.root_album(actor, handle).await?,
            RunStart::Album(album) => album,
        };
        let start_album_id = start_album.id.ok_or_else(|| SyncError::NotWritable {
            entity_type: "Album".to_string(),
            id: start_album.physical_path.display().to_string(),
        })?;

        info!("Phase 1: Counting files");
        let total_files =
            reconciliation::count_files(root_path, options.recursive, &self.settings).await?;
        handle.update(|s| {
            s.total_file_count = total_files;
            s.transition(SyncState::Scanning)
        })?;
        self.emit(SyncEvent::Started {
            run_id: run_id.as_str(),
            gallery_id: self.settings.gallery_id.value(),
            root_path: root_path.display().to_string(),
            recursive: options.recursive,
            total_files,
        });

        info!("Phase 2: Loading reconciliation state");
        let state = ReconciliationState::load(
            start_album,
            options.recursive,
            self.albums.as_ref(),
            self.media.as_ref(),
        )
        .await?;
        let hashes = reconciliation::load_hash_keys(self.media.as_ref(), &self.settings).await?;

        let mut ctx = RunContext::new(
            run_id,
            &self.settings,
            options,
            actor,
            self.albums.as_ref(),
            self.media.as_ref(),
            self.transactions.as_ref(),
            self.collaborators.mime_types.as_ref(),
            self.collaborators.inspector.as_ref(),
            self.collaborators.generator.as_ref(),
            handle,
            self.event_bus.as_ref(),
            state,
            hashes,
        );

        info!(total_files, "Phase 3: Walking {}", root_path.display());
        walker::walk(&mut ctx, root_path).await?;
        ctx.check_cancelled()?;

        handle.update(|s| s.transition(SyncState::PersistingToDataStore))?;
        info!("Phase 4: Removing orphans");
        orphan::remove_orphans(&mut ctx).await?;
        album_reconciler::assign_thumbnails(&mut ctx).await?;

        info!("Phase 5: Committing");
        self.transactions.commit().await?;

        Ok(start_album_id)
    }

    /// The gallery's root album, created when missing and re-pointed when the
    /// media path has moved.
    async fn root_album(&self, actor: &str, handle: &RunHandle) -> Result<Album> {
        let media_path = &self.settings.media_path;
        match self.albums.find_root(self.settings.gallery_id).await? {
            Some(mut root) => {
                if root.physical_path != *media_path {
                    warn!(
                        from = %root.physical_path.display(),
                        to = %media_path.display(),
                        "Media path changed; moving root album"
                    );
                    root.physical_path = media_path.clone();
                    root.touch(actor);
                    self.albums.save(&mut root).await?;
                    handle.update(|s| s.stats.albums_updated += 1);
                }
                Ok(root)
            }
            None => {
                let mut root = Album::new_root(self.settings.gallery_id, media_path.clone(), actor);
                self.albums.save(&mut root).await?;
                info!(path = %media_path.display(), "Created root album");
                handle.update(|s| s.stats.albums_created += 1);
                Ok(root)
            }
        }
    }

    async fn rollback(&self) {
        if let Err(e) = self.transactions.rollback().await {
            error!(error = %e, "Rollback failed");
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(event)).ok();
        }
    }

    async fn persist_start(&self, handle: &RunHandle, root_album_id: Option<AlbumId>, recursive: bool) {
        let Some(repository) = &self.run_repository else {
            return;
        };
        let record = SyncRunRecord::from_status(&handle.snapshot(), root_album_id, recursive);
        if let Err(e) = repository.insert(&record).await {
            warn!(error = %e, "Cannot record synchronization start");
        }
    }

    async fn persist_finish(
        &self,
        status: &SyncStatus,
        root_album_id: Option<AlbumId>,
        recursive: bool,
    ) {
        let Some(repository) = &self.run_repository else {
            return;
        };
        let record = SyncRunRecord::from_status(status, root_album_id, recursive);
        if let Err(e) = repository.update(&record).await {
            warn!(error = %e, "Cannot record synchronization result");
        }
    }
}

fn outcome(status: &SyncStatus, duration_ms: u64) -> SyncOutcome {
    SyncOutcome {
        run_id: status.run_id,
        gallery_id: status.gallery_id,
        state: status.state,
        stats: status.stats,
        skipped: status.skipped.clone(),
        total_files: status.total_file_count,
        files_processed: status.current_file_index,
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{
        MimeResolution, MockDerivativeGenerator, MockMediaInspector, MockMimeTypeResolver,
    };
    use core_library::db::create_test_pool;
    use core_runtime::config::{default_mime_types, Dimensions, GalleryId};
    use tempfile::TempDir;

    fn mime_resolver() -> MockMimeTypeResolver {
        let table = MimeTypeTable::new(default_mime_types());
        let mut resolver = MockMimeTypeResolver::new();
        resolver
            .expect_resolve()
            .returning(move |name| table.resolve(name));
        resolver
    }

    async fn manager(
        media_path: &std::path::Path,
        inspector: MockMediaInspector,
        generator: MockDerivativeGenerator,
    ) -> SynchronizationManager {
        let settings = GallerySettings::builder(GalleryId(1), media_path)
            .build()
            .unwrap();
        let session = Arc::new(DbSession::new(create_test_pool().await.unwrap()));
        let collaborators = SyncCollaborators {
            mime_types: Arc::new(mime_resolver()),
            inspector: Arc::new(inspector),
            generator: Arc::new(generator),
        };
        SynchronizationManager::new(
            settings,
            Arc::new(SqliteAlbumRepository::new(Arc::clone(&session))),
            Arc::new(SqliteMediaObjectRepository::new(Arc::clone(&session))),
            session,
            SyncRegistry::new(),
            collaborators,
        )
    }

    #[test]
    fn test_default_options() {
        let options = SyncOptions::default();
        assert!(options.recursive);
        assert!(!options.overwrite_thumbnail);
        assert!(!options.overwrite_optimized);
        assert!(!options.regenerate_metadata);
        assert_eq!(options.checkpoint_interval, 100);
    }

    #[tokio::test]
    async fn test_inspector_only_reads_images() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"b").unwrap();

        let mut inspector = MockMediaInspector::new();
        inspector
            .expect_image_dimensions()
            .times(1)
            .returning(|_| Ok(Dimensions::new(100, 80)));
        let mut generator = MockDerivativeGenerator::new();
        generator.expect_generate().times(2).returning(|object, _, _| {
            object.regenerate_thumbnail_on_save = false;
            object.regenerate_metadata_on_save = false;
            Ok(())
        });

        let manager = manager(dir.path(), inspector, generator).await;
        let outcome = manager
            .synchronize(SyncRunId::new(), "admin", SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.state, SyncState::Complete);
        assert_eq!(outcome.stats.media_objects_created, 2);
        assert!(manager.status().is_none());
    }

    #[tokio::test]
    async fn test_generator_failure_is_recorded_and_object_kept() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"clip").unwrap();

        let mut generator = MockDerivativeGenerator::new();
        generator
            .expect_generate()
            .returning(|_, _, _| Err(SyncError::Media("encoder unavailable".to_string())));

        let manager = manager(dir.path(), MockMediaInspector::new(), generator).await;
        let outcome = manager
            .synchronize(SyncRunId::new(), "admin", SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.stats.media_objects_created, 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].reason.contains("encoder unavailable"));
    }

    #[tokio::test]
    async fn test_unknown_files_never_reach_collaborators() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("archive.zip"), b"zip").unwrap();

        let mut resolver = MockMimeTypeResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_| MimeResolution::Unknown);

        let settings = GallerySettings::builder(GalleryId(1), dir.path())
            .build()
            .unwrap();
        let session = Arc::new(DbSession::new(create_test_pool().await.unwrap()));
        let manager = SynchronizationManager::new(
            settings,
            Arc::new(SqliteAlbumRepository::new(Arc::clone(&session))),
            Arc::new(SqliteMediaObjectRepository::new(Arc::clone(&session))),
            session,
            SyncRegistry::new(),
            SyncCollaborators {
                mime_types: Arc::new(resolver),
                inspector: Arc::new(MockMediaInspector::new()),
                generator: Arc::new(MockDerivativeGenerator::new()),
            },
        );

        let outcome = manager
            .synchronize(SyncRunId::new(), "admin", SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.stats.media_objects_created, 0);
        assert_eq!(outcome.stats.files_skipped, 1);
        assert_eq!(outcome.skipped[0].reason, "Unrecognized file type");
    }

    #[tokio::test]
    async fn test_cancel_without_active_run() {
        let dir = TempDir::new().unwrap();
        let manager = manager(
            dir.path(),
            MockMediaInspector::new(),
            MockDerivativeGenerator::new(),
        )
        .await;
        assert!(!manager.cancel());
        assert!(manager.status().is_none());
    }
}
