use std::path::PathBuf;
use std::sync::Arc;

use nova_core::{FileAttributes, NodeId, SmolStr};

use super::error::InvalidNode;

/// A node as stored in the cached tree at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedNode {
    pub id: NodeId,
    /// `None` for roots.
    pub parent: Option<NodeId>,
    pub name: SmolStr,
    pub attributes: FileAttributes,
    pub symlink_target: Option<PathBuf>,
    pub dirty: bool,
}

impl CachedNode {
    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }
}

/// Directory-only state of a cached node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryInfo {
    pub case_sensitive: bool,
    /// Every real entry has been enumerated into the cache at least once.
    pub all_children_loaded: bool,
}

/// Everything a full diff needs from the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullSnapshot {
    /// Persisted child names (may include names whose nodes are not materialized).
    pub names: Vec<SmolStr>,
    pub children: Vec<CachedNode>,
}

/// Everything a partial diff needs from the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialSnapshot {
    pub children: Vec<CachedNode>,
    pub suspicious_names: Vec<SmolStr>,
}

/// Read access to the cached tree, plus the dirty-flag bookkeeping the refresh worker owns.
///
/// Each call must be answered under the implementation's read lock so a returned snapshot is
/// consistent with itself. The lock must not be held across calls: the refresh worker diffs a
/// stale snapshot and re-validates it with [`children_or_names_changed`] /
/// [`partial_snapshot_changed`] before committing.
///
/// Every operation fails with [`InvalidNode`] once the node was invalidated by another actor.
///
/// [`children_or_names_changed`]: CachedTreeView::children_or_names_changed
/// [`partial_snapshot_changed`]: CachedTreeView::partial_snapshot_changed
pub trait CachedTreeView: Send + Sync {
    fn node(&self, id: NodeId) -> Result<CachedNode, InvalidNode>;

    /// Absolute real path of `id`.
    fn path(&self, id: NodeId) -> Result<PathBuf, InvalidNode>;

    /// `Ok(None)` when `id` is not a directory.
    fn directory(&self, id: NodeId) -> Result<Option<DirectoryInfo>, InvalidNode>;

    fn snapshot_full(&self, dir: NodeId) -> Result<FullSnapshot, InvalidNode>;

    fn snapshot_partial(&self, dir: NodeId) -> Result<PartialSnapshot, InvalidNode>;

    /// Returns `true` if the children or persisted names of `dir` differ from the given snapshot.
    fn children_or_names_changed(
        &self,
        dir: NodeId,
        names: &[SmolStr],
        children: &[CachedNode],
    ) -> Result<bool, InvalidNode>;

    fn partial_snapshot_changed(
        &self,
        dir: NodeId,
        snapshot: &PartialSnapshot,
    ) -> Result<bool, InvalidNode>;

    /// Looks `name` up among the children of `dir` using the directory's case rules.
    fn find_child(&self, dir: NodeId, name: &str) -> Result<Option<CachedNode>, InvalidNode>;

    fn is_dirty(&self, id: NodeId) -> Result<bool, InvalidNode>;

    fn mark_dirty(&self, id: NodeId) -> Result<(), InvalidNode>;

    fn mark_clean(&self, id: NodeId) -> Result<(), InvalidNode>;
}

macro_rules! forward_tree_view {
    ($($ty:ty),*) => {$(
        impl<T: CachedTreeView + ?Sized> CachedTreeView for $ty {
            fn node(&self, id: NodeId) -> Result<CachedNode, InvalidNode> {
                (**self).node(id)
            }

            fn path(&self, id: NodeId) -> Result<PathBuf, InvalidNode> {
                (**self).path(id)
            }

            fn directory(&self, id: NodeId) -> Result<Option<DirectoryInfo>, InvalidNode> {
                (**self).directory(id)
            }

            fn snapshot_full(&self, dir: NodeId) -> Result<FullSnapshot, InvalidNode> {
                (**self).snapshot_full(dir)
            }

            fn snapshot_partial(&self, dir: NodeId) -> Result<PartialSnapshot, InvalidNode> {
                (**self).snapshot_partial(dir)
            }

            fn children_or_names_changed(
                &self,
                dir: NodeId,
                names: &[SmolStr],
                children: &[CachedNode],
            ) -> Result<bool, InvalidNode> {
                (**self).children_or_names_changed(dir, names, children)
            }

            fn partial_snapshot_changed(
                &self,
                dir: NodeId,
                snapshot: &PartialSnapshot,
            ) -> Result<bool, InvalidNode> {
                (**self).partial_snapshot_changed(dir, snapshot)
            }

            fn find_child(
                &self,
                dir: NodeId,
                name: &str,
            ) -> Result<Option<CachedNode>, InvalidNode> {
                (**self).find_child(dir, name)
            }

            fn is_dirty(&self, id: NodeId) -> Result<bool, InvalidNode> {
                (**self).is_dirty(id)
            }

            fn mark_dirty(&self, id: NodeId) -> Result<(), InvalidNode> {
                (**self).mark_dirty(id)
            }

            fn mark_clean(&self, id: NodeId) -> Result<(), InvalidNode> {
                (**self).mark_clean(id)
            }
        }
    )*};
}

forward_tree_view!(&T, Arc<T>);
