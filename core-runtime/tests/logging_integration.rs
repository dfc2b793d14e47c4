//! Integration tests for the logging system

use core_runtime::logging::{init_logging, relative_display, LogFormat, LogLevel, LoggingConfig};
use std::path::Path;

#[test]
fn test_logging_initializes_once() {
    // Only one global subscriber per process, so both calls live in one test
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_spans(false);

    assert!(init_logging(config.clone()).is_ok());
    tracing::info!(gallery_id = 1, "Logging initialized");

    let second = init_logging(config);
    assert!(second.is_err());
}

#[test]
fn test_invalid_filter_is_a_config_error() {
    let config = LoggingConfig::default().with_filter("core_sync=loudest");
    let err = init_logging(config).unwrap_err();
    assert!(err.to_string().contains("Invalid log filter"));
}

#[test]
fn test_relative_display_for_album_paths() {
    let root = Path::new("/srv/gallery");
    assert_eq!(relative_display(root, Path::new("/srv/gallery/2024/beach")), "2024/beach");
    assert_eq!(relative_display(root, root), ".");
    assert_eq!(relative_display(root, Path::new("/tmp/thumbs")), "/tmp/thumbs");
}
