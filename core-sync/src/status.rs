//! # Synchronization Status
//!
//! Run identity, the run state machine and the progress snapshot that external
//! callers poll while a gallery is being synchronized.
//!
//! ## State Machine
//!
//! ```text
//! NotStarted → Scanning → PersistingToDataStore → Complete
//!     ↓            ↓                ↓
//!     └──────→ Cancelled / Failed ←─┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncRunId, SyncState, SyncStatus};
//!
//! let mut status = SyncStatus::new(gallery_id, SyncRunId::new(), "/srv/gallery", "admin");
//! status.transition(SyncState::Scanning)?;
//! status.advance_file("/srv/gallery/photo.jpg");
//! println!("{}% done", status.percent());
//! ```

use crate::{Result, SyncError};
use core_runtime::config::GalleryId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a synchronization run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRunId(Uuid);

impl SyncRunId {
    /// Create a new random run ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a run ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidRunId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SyncRunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// State
// ============================================================================

/// Phase of a synchronization run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Accepted but traversal has not begun
    NotStarted,
    /// Walking directories and reconciling records
    Scanning,
    /// Removing orphans and committing
    PersistingToDataStore,
    /// Committed
    Complete,
    /// Stopped on request; the in-flight batch was rolled back
    Cancelled,
    /// Aborted by a fatal error
    Failed,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::Complete | SyncState::Cancelled | SyncState::Failed
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::NotStarted => "NotStarted",
            SyncState::Scanning => "Scanning",
            SyncState::PersistingToDataStore => "PersistingToDataStore",
            SyncState::Complete => "Complete",
            SyncState::Cancelled => "Cancelled",
            SyncState::Failed => "Failed",
        }
    }

    fn can_transition_to(self, to: SyncState) -> bool {
        match (self, to) {
            (SyncState::NotStarted, SyncState::Scanning) => true,
            (SyncState::Scanning, SyncState::PersistingToDataStore) => true,
            (SyncState::PersistingToDataStore, SyncState::Complete) => true,

            // Any active state may stop early
            (from, SyncState::Cancelled | SyncState::Failed) => from.is_active(),

            _ => false,
        }
    }
}

impl FromStr for SyncState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NotStarted" => Ok(SyncState::NotStarted),
            "Scanning" => Ok(SyncState::Scanning),
            "PersistingToDataStore" => Ok(SyncState::PersistingToDataStore),
            "Complete" => Ok(SyncState::Complete),
            "Cancelled" => Ok(SyncState::Cancelled),
            "Failed" => Ok(SyncState::Failed),
            _ => Err(SyncError::InvalidState(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Skips and Statistics
// ============================================================================

/// A file or directory the run did not turn into a record, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub path: PathBuf,
    pub reason: String,
}

impl SkippedItem {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Counters collected during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub albums_created: u64,
    pub albums_updated: u64,
    pub albums_deleted: u64,
    pub media_objects_created: u64,
    pub media_objects_updated: u64,
    pub media_objects_deleted: u64,
    pub derived_files_deleted: u64,
    pub files_skipped: u64,
}

impl SyncStats {
    /// Records created, updated or deleted
    pub fn total_changes(&self) -> u64 {
        self.albums_created
            + self.albums_updated
            + self.albums_deleted
            + self.media_objects_created
            + self.media_objects_updated
            + self.media_objects_deleted
    }
}

// ============================================================================
// Status Snapshot
// ============================================================================

/// Progress of one run, shared with pollers through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub gallery_id: GalleryId,
    pub run_id: SyncRunId,
    pub state: SyncState,
    /// Directory the run started from
    pub root_path: PathBuf,
    pub started_by: String,
    /// Files expected on disk, excluding hidden and derived files
    pub total_file_count: u64,
    /// Files handled so far (1-based once the first file is done)
    pub current_file_index: u64,
    pub current_file_path: Option<PathBuf>,
    pub current_file_name: Option<String>,
    pub skipped: Vec<SkippedItem>,
    pub stats: SyncStats,
    /// Set when a caller has asked the run to stop
    pub cancel_requested: bool,
    pub error_message: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl SyncStatus {
    pub fn new(
        gallery_id: GalleryId,
        run_id: SyncRunId,
        root_path: impl Into<PathBuf>,
        started_by: &str,
    ) -> Self {
        Self {
            gallery_id,
            run_id,
            state: SyncState::NotStarted,
            root_path: root_path.into(),
            started_by: started_by.to_string(),
            total_file_count: 0,
            current_file_index: 0,
            current_file_path: None,
            current_file_name: None,
            skipped: Vec::new(),
            stats: SyncStats::default(),
            cancel_requested: false,
            error_message: None,
            started_at: current_timestamp(),
            completed_at: None,
        }
    }

    /// Move to `to`, stamping the completion time on terminal states.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` when the state machine forbids the move.
    pub fn transition(&mut self, to: SyncState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!("Cannot transition from {} to {}", self.state, to),
            });
        }

        self.state = to;
        if to.is_terminal() {
            self.completed_at = Some(current_timestamp());
        }
        Ok(())
    }

    /// Mark the run failed with `message`.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(SyncState::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Record that `path` is the file just handled.
    pub fn advance_file(&mut self, path: &Path) {
        self.current_file_index += 1;
        self.current_file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        self.current_file_path = Some(path.to_path_buf());
    }

    pub fn record_skip(&mut self, item: SkippedItem) {
        self.stats.files_skipped += 1;
        self.skipped.push(item);
    }

    /// Percentage of expected files handled, capped at 100.
    pub fn percent(&self) -> u8 {
        if self.state == SyncState::Complete {
            return 100;
        }
        if self.total_file_count == 0 {
            return 0;
        }
        ((self.current_file_index as f64 / self.total_file_count as f64) * 100.0).min(100.0) as u8
    }

    /// Wall-clock duration in seconds once the run has finished
    pub fn duration_secs(&self) -> Option<u64> {
        self.completed_at
            .map(|end| u64::try_from(end - self.started_at).unwrap_or(0))
    }
}

/// Get the current Unix timestamp in seconds
pub(crate) fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> SyncStatus {
        SyncStatus::new(GalleryId(1), SyncRunId::new(), "/g", "admin")
    }

    #[test]
    fn test_run_id_round_trip() {
        let id = SyncRunId::new();
        assert_eq!(SyncRunId::from_string(&id.as_str()).unwrap(), id);
        assert!(SyncRunId::from_string("not-a-uuid").is_err());
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            SyncState::NotStarted,
            SyncState::Scanning,
            SyncState::PersistingToDataStore,
            SyncState::Complete,
            SyncState::Cancelled,
            SyncState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<SyncState>().unwrap(), state);
        }
        assert!("Paused".parse::<SyncState>().is_err());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut status = status();
        status.transition(SyncState::Scanning).unwrap();
        status.transition(SyncState::PersistingToDataStore).unwrap();
        status.transition(SyncState::Complete).unwrap();
        assert!(status.completed_at.is_some());
        assert_eq!(status.percent(), 100);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut status = status();
        let err = status.transition(SyncState::Complete).unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));

        status.transition(SyncState::Scanning).unwrap();
        status.transition(SyncState::Cancelled).unwrap();
        assert!(status.transition(SyncState::Failed).is_err());
        assert!(status.transition(SyncState::Scanning).is_err());
    }

    #[test]
    fn test_fail_records_message() {
        let mut status = status();
        status.transition(SyncState::Scanning).unwrap();
        status.fail("disk full").unwrap();
        assert_eq!(status.state, SyncState::Failed);
        assert_eq!(status.error_message.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_progress_and_skips() {
        let mut status = status();
        status.total_file_count = 4;
        status.advance_file(Path::new("/g/a.jpg"));
        assert_eq!(status.current_file_index, 1);
        assert_eq!(status.current_file_name.as_deref(), Some("a.jpg"));
        assert_eq!(status.percent(), 25);

        status.record_skip(SkippedItem::new("/g/.hidden", "Hidden file"));
        assert_eq!(status.stats.files_skipped, 1);
        assert_eq!(status.skipped.len(), 1);
    }
}
