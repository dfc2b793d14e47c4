//! Workspace facade crate.
//!
//! Re-exports the workspace crates so host applications can depend on
//! `gallery-workspace` alone. The synchronization engine sits behind the
//! `sync` feature (enabled by default).

pub use core_library as library;
pub use core_runtime as runtime;

#[cfg(feature = "sync")]
pub use core_sync as sync;
