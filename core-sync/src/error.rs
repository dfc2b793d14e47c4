use core_library::LibraryError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Synchronization already in progress for gallery {gallery_id}")]
    InProgress { gallery_id: i64 },

    #[error("{entity_type} {id} is not writable by this synchronization run")]
    NotWritable { entity_type: String, id: String },

    #[error("Synchronization cancelled")]
    Cancelled,

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Album {album_id} not found")]
    AlbumNotFound { album_id: i64 },

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Media error: {0}")]
    Media(String),

    #[error("Unsupported file {path}: {reason}")]
    UnsupportedFile { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid sync run ID: {0}")]
    InvalidRunId(String),

    #[error("Invalid sync state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl SyncError {
    /// Build an [`SyncError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error must abort the whole run.
    ///
    /// File-level failures (unreadable or unsupported files, decode errors)
    /// are recorded as skipped items instead. Cancellation is not fatal; the
    /// coordinator turns it into a clean return.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SyncError::Cancelled
                | SyncError::Io { .. }
                | SyncError::Media(_)
                | SyncError::UnsupportedFile { .. }
        )
    }
}

impl From<core_runtime::Error> for SyncError {
    fn from(err: core_runtime::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_level_errors_are_not_fatal() {
        let io = SyncError::io(
            "/g/photo.jpg",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(!io.is_fatal());
        assert!(!SyncError::Media("corrupt".to_string()).is_fatal());
        assert!(!SyncError::Cancelled.is_fatal());
        assert!(!SyncError::UnsupportedFile {
            path: "/g/design.psd".into(),
            reason: "disabled".to_string(),
        }
        .is_fatal());

        assert!(SyncError::InProgress { gallery_id: 1 }.is_fatal());
        assert!(SyncError::Library(LibraryError::Transaction("commit".to_string())).is_fatal());
    }

    #[test]
    fn test_io_error_message_names_path() {
        let err = SyncError::io(
            "/g/trip",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/g/trip"));
    }
}
