//! Reconciliation of a cached directory tree with the real file system.
//!
//! A [`RefreshWorker`] walks dirty directories of a [`CachedTreeView`] breadth first, diffs each
//! against the [`FileSystem`](crate::FileSystem) inside an [`EventHelper`] transaction and emits
//! a batch of [`VfsEvent`]s. Snapshots are taken under the cache's read lock only briefly; a pass
//! whose snapshot drifted before commit is rolled back and repeated.

mod cancel;
mod differ;
mod error;
mod events;
mod memory_tree;
mod metrics;
mod options;
mod tree;
mod worker;

pub use error::{InvalidNode, OptionsError, RefreshError};
pub use events::{
    ChildInfo, ChildrenHint, EventHelper, EventKind, NodeProperty, PropertyChange, VfsEvent,
};
pub use memory_tree::MemoryTree;
pub use metrics::{RefreshMetricsSink, RefreshStats, ScanCounters, ScanOutcome};
pub use options::{RefreshOptions, IGNORE_FILE_TYPE_CHANGES_ENV};
pub use tree::{CachedNode, CachedTreeView, DirectoryInfo, FullSnapshot, PartialSnapshot};
pub use worker::RefreshWorker;
