//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the gallery core:
//! - Gallery settings and validation
//! - Logging and tracing infrastructure
//! - Event bus system
//!
//! ## Overview
//!
//! Every other crate in the workspace depends on this one for configuration,
//! logging conventions and event broadcasting. It has no knowledge of the data
//! store or of the synchronization algorithm.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{Dimensions, GalleryId, GallerySettings, MimeCategory, MimeTypeEntry};
pub use error::{Error, Result};
