//! # Repository Pattern Implementation
//!
//! Repository traits and SQLite implementations for gallery records.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx and share one [`DbSession`](crate::session::DbSession),
//!   so an open session transaction covers every repository
//! - All operations return `Result<T>` for error handling
//!
//! ## Available Repositories
//!
//! - `AlbumRepository` - Directory-backed albums and their hierarchy
//! - `MediaObjectRepository` - File-backed media objects with extracted metadata

pub mod album;
pub mod media_object;

pub use album::{AlbumRepository, SqliteAlbumRepository};
pub use media_object::{MediaObjectRepository, SqliteMediaObjectRepository};
