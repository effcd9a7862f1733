//! Virtual file system layer for Nova.
//!
//! The VFS is responsible for:
//! - Reading entries and attributes from the OS file system ([`LocalFs`]) or from a deterministic
//!   in-memory tree ([`MemoryFs`]).
//! - Keeping a cached directory tree in sync with disk: [`refresh`] diffs cached directories
//!   against the real ones and produces create / delete / attribute-change batches.

mod fs;
mod memory_fs;
pub mod refresh;

pub use fs::{FileSystem, LocalFs};
pub use memory_fs::MemoryFs;
pub use nova_core::{FileAttributes, FileKind, FileType, NodeId};
pub use refresh::{RefreshError, RefreshOptions, RefreshWorker, VfsEvent};
