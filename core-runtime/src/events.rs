//! # Event Bus System
//!
//! Typed, broadcast-based notifications for the gallery core, built on
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The synchronization engine reports run lifecycle changes (`SyncEvent`) and
//! individual record changes (`LibraryEvent`) on a shared [`EventBus`]. Any
//! number of subscribers can listen independently. Emission never blocks and
//! never fails the emitter: when nobody listens, the event is dropped.
//!
//! ```text
//! ┌──────────────┐   emit   ┌──────────┐  subscribe  ┌────────────┐
//! │ Sync Manager ├─────────>│ EventBus ├────────────>│ Subscriber │
//! └──────────────┘          └──────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::Cancelled {
//!     run_id: "run-1".to_string(),
//!     gallery_id: 1,
//!     files_processed: 3,
//! }))
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Sync(SyncEvent::Cancelled { .. })));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell behind and missed `n` events.
//!   Progress events are frequent, so slow subscribers should expect this.
//! - **`RecvError::Closed`**: every sender was dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError, error::SendError, Receiver};

/// Default per-subscriber buffer.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Synchronization run lifecycle
    Sync(SyncEvent),
    /// Album and media object record changes
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Started { .. })
            | CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Lifecycle of a synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Run accepted and traversal is about to start.
    Started {
        run_id: String,
        gallery_id: i64,
        /// Directory the run starts from.
        root_path: String,
        recursive: bool,
        /// Files expected on disk (used for percentages).
        total_files: u64,
    },
    /// Emitted after each processed file.
    Progress {
        run_id: String,
        gallery_id: i64,
        current_file_index: u64,
        total_files: u64,
        /// File name only, never the full path.
        current_file: String,
        /// Current phase (e.g. "Scanning", "PersistingToDataStore").
        phase: String,
    },
    /// Run committed.
    Completed {
        run_id: String,
        gallery_id: i64,
        albums_created: u64,
        albums_deleted: u64,
        media_objects_created: u64,
        media_objects_updated: u64,
        media_objects_deleted: u64,
        files_skipped: u64,
        duration_ms: u64,
    },
    /// Run aborted by an error; the in-flight batch was rolled back.
    Failed {
        run_id: String,
        gallery_id: i64,
        message: String,
        files_processed: u64,
    },
    /// Run stopped on request; the in-flight batch was rolled back.
    Cancelled {
        run_id: String,
        gallery_id: i64,
        files_processed: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Synchronization started",
            SyncEvent::Progress { .. } => "Synchronization in progress",
            SyncEvent::Completed { .. } => "Synchronization completed",
            SyncEvent::Failed { .. } => "Synchronization failed",
            SyncEvent::Cancelled { .. } => "Synchronization cancelled",
        }
    }

    /// Run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            SyncEvent::Started { run_id, .. }
            | SyncEvent::Progress { run_id, .. }
            | SyncEvent::Completed { run_id, .. }
            | SyncEvent::Failed { run_id, .. }
            | SyncEvent::Cancelled { run_id, .. } => run_id,
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

/// Record-level changes made by a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    AlbumCreated {
        album_id: i64,
        path: String,
    },
    AlbumDeleted {
        album_id: i64,
    },
    MediaObjectCreated {
        media_object_id: i64,
        album_id: i64,
        file_name: String,
    },
    MediaObjectUpdated {
        media_object_id: i64,
        album_id: i64,
    },
    MediaObjectDeleted {
        media_object_id: i64,
    },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::AlbumCreated { .. } => "Album created",
            LibraryEvent::AlbumDeleted { .. } => "Album deleted",
            LibraryEvent::MediaObjectCreated { .. } => "Media object created",
            LibraryEvent::MediaObjectUpdated { .. } => "Media object updated",
            LibraryEvent::MediaObjectDeleted { .. } => "Media object deleted",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s.
///
/// Cloning the bus shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers reached, or an error when there are none.
    /// Callers that do not care use `.ok()`.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let library_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Library(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. Returns `None` if nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(index: u64) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::Progress {
            run_id: "run-1".to_string(),
            gallery_id: 1,
            current_file_index: index,
            total_files: 10,
            current_file: format!("img{}.jpg", index),
            phase: "Scanning".to_string(),
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_error() {
        let bus = EventBus::new(8);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(progress(1)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.emit(progress(1)).unwrap(), 2);
        assert_eq!(a.recv().await.unwrap(), progress(1));
        assert_eq!(b.recv().await.unwrap(), progress(1));
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(8);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Library(_)));

        bus.emit(progress(1)).ok();
        let created = CoreEvent::Library(LibraryEvent::AlbumCreated {
            album_id: 4,
            path: "/srv/gallery/trip".to_string(),
        });
        bus.emit(created.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), created);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(progress(i)).ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity_and_description() {
        let failed = CoreEvent::Sync(SyncEvent::Failed {
            run_id: "r".to_string(),
            gallery_id: 1,
            message: "disk error".to_string(),
            files_processed: 2,
        });
        assert_eq!(failed.severity(), EventSeverity::Error);
        assert_eq!(failed.description(), "Synchronization failed");
        assert_eq!(progress(1).severity(), EventSeverity::Debug);

        if let CoreEvent::Sync(sync) = failed {
            assert_eq!(sync.run_id(), "r");
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Library(LibraryEvent::MediaObjectDeleted { media_object_id: 9 });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Library\""));
        assert!(json.contains("\"event\":\"MediaObjectDeleted\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
