//! # Synchronization Module
//!
//! Reconciles a gallery's media directory with its data store.
//!
//! ## Overview
//!
//! A run walks the directory tree under an album and:
//! - Creates, updates or reparents albums for directories
//! - Creates or updates media objects for files with enabled MIME types,
//!   recognising moved files by their hash key
//! - Flags and generates thumbnails and optimized renditions
//! - Deletes records whose files are gone and derived files nobody references
//! - Reports progress through a per-gallery status and the event bus
//!
//! ## Components
//!
//! - **Coordinator** (`coordinator`): `SynchronizationManager`, the run lifecycle
//! - **Status** (`status`): Run state machine, progress and statistics
//! - **Registry** (`registry`): One active run per gallery, cancellation
//! - **Identity** (`identity`): Hash keys and moved-file detection
//! - **Media** (`media`): MIME lookup, dimension probing, derivative generation
//! - **Repository** (`repository`): Persisted run history

mod album_reconciler;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod media;
mod media_reconciler;
mod orphan;
pub mod reconciliation;
pub mod registry;
pub mod repository;
mod run;
pub mod status;
mod walker;

pub use coordinator::{SyncCollaborators, SyncOptions, SyncOutcome, SynchronizationManager};
pub use error::{Result, SyncError};
pub use identity::{compute_hash_key, HashKeyRegistry};
pub use media::{
    derived_file_name, DerivativeGenerator, ImageDerivativeGenerator, ImageInspector, MediaInspector, MimeResolution,
    MimeTypeResolver, MimeTypeTable,
};
pub use registry::{RunGuard, RunHandle, SyncRegistry};
pub use repository::{SqliteSyncRunRepository, SyncRunRecord, SyncRunRepository};
pub use status::{SkippedItem, SyncRunId, SyncState, SyncStats, SyncStatus};
