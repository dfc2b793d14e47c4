//! # Run Registry
//!
//! Maps each gallery to its active synchronization run. Acquiring a slot is
//! the mutual-exclusion point: a second run for the same gallery fails
//! immediately with [`SyncError::InProgress`]. The slot is released when the
//! returned [`RunGuard`] drops, whichever way the run ends.
//!
//! External callers use the registry to poll progress and to request
//! cancellation of a running synchronization.

use crate::status::SyncStatus;
use crate::{Result, SyncError};
use core_runtime::config::GalleryId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shared view of one active run.
#[derive(Clone)]
pub struct RunHandle {
    status: Arc<RwLock<SyncStatus>>,
    cancel_token: CancellationToken,
}

impl RunHandle {
    fn new(status: SyncStatus) -> Self {
        Self {
            status: Arc::new(RwLock::new(status)),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Consistent copy of the run's status.
    pub fn snapshot(&self) -> SyncStatus {
        let mut status = self
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        status.cancel_requested = self.cancel_token.is_cancelled();
        status
    }

    /// Ask the run to stop after the file it is working on.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Mutate the status under the write lock.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SyncStatus) -> R) -> R {
        let mut status = self
            .status
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut status)
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Gallery → active run.
#[derive(Default)]
pub struct SyncRegistry {
    active: Mutex<HashMap<GalleryId, RunHandle>>,
}

impl SyncRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the gallery for a run described by `status`.
    ///
    /// # Errors
    ///
    /// Returns `InProgress` if the gallery already has an active run.
    pub fn acquire(self: &Arc<Self>, status: SyncStatus) -> Result<RunGuard> {
        let gallery_id = status.gallery_id;
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);

        if active.contains_key(&gallery_id) {
            return Err(SyncError::InProgress {
                gallery_id: gallery_id.value(),
            });
        }

        let handle = RunHandle::new(status);
        active.insert(gallery_id, handle.clone());
        debug!(gallery_id = %gallery_id, "Registered synchronization run");

        Ok(RunGuard {
            registry: Arc::clone(self),
            gallery_id,
            handle,
        })
    }

    pub fn handle(&self, gallery_id: GalleryId) -> Option<RunHandle> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&gallery_id)
            .cloned()
    }

    /// Status of the gallery's active run, if any.
    pub fn status(&self, gallery_id: GalleryId) -> Option<SyncStatus> {
        self.handle(gallery_id).map(|handle| handle.snapshot())
    }

    /// Request cancellation of the gallery's active run.
    ///
    /// Returns `false` when nothing is running for the gallery.
    pub fn cancel(&self, gallery_id: GalleryId) -> bool {
        match self.handle(gallery_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, gallery_id: GalleryId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&gallery_id)
    }

    fn release(&self, gallery_id: GalleryId) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&gallery_id);
        debug!(gallery_id = %gallery_id, "Released synchronization run");
    }
}

/// Holds a gallery's registry slot for the lifetime of one run.
pub struct RunGuard {
    registry: Arc<SyncRegistry>,
    gallery_id: GalleryId,
    handle: RunHandle,
}

impl RunGuard {
    pub fn handle(&self) -> &RunHandle {
        &self.handle
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.release(self.gallery_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{SyncRunId, SyncState};

    fn status(gallery: i64) -> SyncStatus {
        SyncStatus::new(GalleryId(gallery), SyncRunId::new(), "/g", "admin")
    }

    #[test]
    fn test_second_run_for_gallery_is_rejected() {
        let registry = SyncRegistry::new();
        let _guard = registry.acquire(status(1)).unwrap();

        let err = registry.acquire(status(1)).err().unwrap();
        assert!(matches!(err, SyncError::InProgress { gallery_id: 1 }));

        // Other galleries are independent
        assert!(registry.acquire(status(2)).is_ok());
    }

    #[test]
    fn test_guard_drop_releases_slot() {
        let registry = SyncRegistry::new();
        {
            let _guard = registry.acquire(status(1)).unwrap();
            assert!(registry.is_active(GalleryId(1)));
        }
        assert!(!registry.is_active(GalleryId(1)));
        assert!(registry.acquire(status(1)).is_ok());
    }

    #[test]
    fn test_status_and_cancel_by_gallery() {
        let registry = SyncRegistry::new();
        assert!(registry.status(GalleryId(1)).is_none());
        assert!(!registry.cancel(GalleryId(1)));

        let guard = registry.acquire(status(1)).unwrap();
        guard
            .handle()
            .update(|s| s.transition(SyncState::Scanning))
            .unwrap();

        assert!(registry.cancel(GalleryId(1)));
        assert!(guard.handle().is_cancelled());

        let snapshot = registry.status(GalleryId(1)).unwrap();
        assert_eq!(snapshot.state, SyncState::Scanning);
        assert!(snapshot.cancel_requested);
    }
}
