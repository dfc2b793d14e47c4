//! # Library Management Module
//!
//! Owns the gallery data store and provides repository patterns for data access.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite database schema and migrations
//! - Album and media object models
//! - Repository patterns for albums and media objects
//! - Session-scoped transactions shared by all repositories

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod session;

pub use error::{LibraryError, Result};
pub use models::{Album, AlbumId, DisplayObject, MediaObject, MediaObjectId, MediaVariant, MetadataItem};
pub use session::{DbSession, TransactionManager};
