//! Per-run context shared by the walker, the reconcilers and the orphan
//! cleaner.
//!
//! Owns the reconciliation maps and the hash registry for the lifetime of one
//! run, and funnels progress, skips, statistics, events and checkpoint
//! commits through a single place.

use crate::coordinator::SyncOptions;
use crate::identity::HashKeyRegistry;
use crate::media::{DerivativeGenerator, MediaInspector, MimeTypeResolver};
use crate::reconciliation::ReconciliationState;
use crate::registry::RunHandle;
use crate::status::{SkippedItem, SyncRunId, SyncStats};
use crate::{Result, SyncError};
use core_library::repositories::{AlbumRepository, MediaObjectRepository};
use core_library::{MediaObjectId, TransactionManager};
use core_runtime::config::{GalleryId, GallerySettings};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, SyncEvent};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

pub(crate) struct RunContext<'a> {
    pub run_id: SyncRunId,
    pub settings: &'a GallerySettings,
    pub options: &'a SyncOptions,
    pub actor: &'a str,
    pub albums: &'a dyn AlbumRepository,
    pub media: &'a dyn MediaObjectRepository,
    pub transactions: &'a dyn TransactionManager,
    pub mime_types: &'a dyn MimeTypeResolver,
    pub inspector: &'a dyn MediaInspector,
    pub generator: &'a dyn DerivativeGenerator,
    pub handle: &'a RunHandle,
    pub events: Option<&'a EventBus>,
    pub state: ReconciliationState,
    pub hashes: HashKeyRegistry,
    /// Media objects removed by the orphan cleaner
    pub deleted_media: HashSet<MediaObjectId>,
    albums_since_checkpoint: usize,
}

impl<'a> RunContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: SyncRunId,
        settings: &'a GallerySettings,
        options: &'a SyncOptions,
        actor: &'a str,
        albums: &'a dyn AlbumRepository,
        media: &'a dyn MediaObjectRepository,
        transactions: &'a dyn TransactionManager,
        mime_types: &'a dyn MimeTypeResolver,
        inspector: &'a dyn MediaInspector,
        generator: &'a dyn DerivativeGenerator,
        handle: &'a RunHandle,
        events: Option<&'a EventBus>,
        state: ReconciliationState,
        hashes: HashKeyRegistry,
    ) -> Self {
        Self {
            run_id,
            settings,
            options,
            actor,
            albums,
            media,
            transactions,
            mime_types,
            inspector,
            generator,
            handle,
            events,
            state,
            hashes,
            deleted_media: HashSet::new(),
            albums_since_checkpoint: 0,
        }
    }

    pub fn gallery_id(&self) -> GalleryId {
        self.settings.gallery_id
    }

    pub fn record_skip(&self, path: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(path = %path.display(), reason = %reason, "Skipped");
        self.handle
            .update(|status| status.record_skip(SkippedItem::new(path, reason)));
    }

    pub fn update_stats(&self, f: impl FnOnce(&mut SyncStats)) {
        self.handle.update(|status| f(&mut status.stats));
    }

    pub fn emit_library(&self, event: LibraryEvent) {
        if let Some(bus) = self.events {
            bus.emit(CoreEvent::Library(event)).ok();
        }
    }

    /// Record `path` as handled, publish progress and poll for cancellation.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` once a caller has asked the run to stop.
    pub fn file_done(&self, path: &Path) -> Result<()> {
        let (index, total, phase) = self.handle.update(|status| {
            status.advance_file(path);
            (
                status.current_file_index,
                status.total_file_count,
                status.state.as_str().to_string(),
            )
        });
        debug!(index, total, file = %path.display(), "Processed file");

        if let Some(bus) = self.events {
            bus.emit(CoreEvent::Sync(SyncEvent::Progress {
                run_id: self.run_id.as_str(),
                gallery_id: self.gallery_id().value(),
                current_file_index: index,
                total_files: total,
                current_file: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                phase,
            }))
            .ok();
        }

        self.check_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.handle.is_cancelled() {
            info!(run_id = %self.run_id, "Cancellation requested");
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Count an album save and commit a batch when the interval is reached.
    pub async fn album_saved(&mut self) -> Result<()> {
        self.albums_since_checkpoint += 1;
        let interval = self.options.checkpoint_interval;
        if interval > 0 && self.albums_since_checkpoint >= interval {
            self.checkpoint().await?;
        }
        Ok(())
    }

    /// Commit the current batch and open the next one.
    pub async fn checkpoint(&mut self) -> Result<()> {
        self.transactions.commit().await?;
        self.transactions.begin().await?;
        info!(
            run_id = %self.run_id,
            albums = self.albums_since_checkpoint,
            "Checkpoint committed"
        );
        self.albums_since_checkpoint = 0;
        Ok(())
    }
}
