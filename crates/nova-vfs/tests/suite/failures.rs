use std::path::PathBuf;
use std::sync::Arc;

use nova_core::{FileAttributes, NodeId, SmolStr};
use nova_metrics::MetricsRegistry;
use nova_vfs::refresh::{
    CachedNode, CachedTreeView, DirectoryInfo, FullSnapshot, InvalidNode, MemoryTree,
    PartialSnapshot, RefreshError, RefreshOptions, RefreshWorker, ScanOutcome, VfsEvent,
};
use nova_vfs::MemoryFs;

use super::support::{init_tracing, scan, summarize};

fn two_directories(fs: &MemoryFs) -> (Arc<MemoryTree>, [NodeId; 3]) {
    fs.create_file("/R/A/a1", 1, 1);
    fs.create_file("/R/B/b1", 1, 1);
    let (tree, root) = MemoryTree::new_root("/R", true);
    let a = tree.add_child(root, "A", FileAttributes::directory()).unwrap();
    let b = tree.add_child(root, "B", FileAttributes::directory()).unwrap();
    tree.mark_dirty_recursively(root).unwrap();
    (Arc::new(tree), [root, a, b])
}

#[test]
fn invalidated_directory_is_rolled_back_and_skipped() {
    init_tracing();
    let fs = MemoryFs::new();
    let (tree, [root, a, b]) = two_directories(&fs);

    let mut worker = RefreshWorker::new(&fs, tree.clone(), root, RefreshOptions::default())
        .with_metrics_sink(Arc::new(MetricsRegistry::default()))
        .with_probe_listener({
            let tree = tree.clone();
            move |node| {
                if node == a && !tree.is_dirty(root).unwrap_or(true) && tree.is_valid(a) {
                    tree.invalidate(a).unwrap();
                }
            }
        });

    assert_eq!(worker.scan().unwrap(), ScanOutcome::Completed);
    assert_eq!(
        summarize(worker.events()),
        vec![format!("create {b} b1 regular")]
    );
    let stats = worker.stats().unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.retries(), 0);
}

#[test]
fn failing_listing_is_retried_then_skipped() {
    init_tracing();
    let fs = MemoryFs::new();
    let (tree, [root, a, _b]) = two_directories(&fs);
    fs.fail_listing("/R/A", true);

    let result = scan(&fs, tree.clone(), root, RefreshOptions::default());

    assert_eq!(result.outcome, ScanOutcome::Completed);
    assert_eq!(result.events.len(), 1);
    assert!(tree.is_dirty(a).unwrap());
    assert_eq!(result.stats.skipped, 1);
    // Root, B, and A twice.
    assert_eq!(result.stats.full_scans, 4);
    assert_eq!(result.stats.retries(), 1);
}

#[test]
fn transient_retries_can_be_disabled() {
    init_tracing();
    let fs = MemoryFs::new();
    let (tree, [root, a, _b]) = two_directories(&fs);
    fs.fail_listing("/R/A", true);

    let result = scan(
        &fs,
        tree.clone(),
        root,
        RefreshOptions::default().max_transient_retries(0),
    );

    assert_eq!(result.stats.full_scans, 3);
    assert_eq!(result.stats.skipped, 1);
    assert!(tree.is_dirty(a).unwrap());
}

#[test]
fn vanished_root_is_deleted() {
    let fs = MemoryFs::new();
    let (tree, root) = MemoryTree::new_root("/gone", true);
    tree.mark_dirty(root).unwrap();

    let result = scan(&fs, &tree, root, RefreshOptions::default());

    assert_eq!(result.outcome, ScanOutcome::RootDeleted);
    assert_eq!(result.events, vec![VfsEvent::Delete { node: root }]);
    assert!(!tree.is_dirty(root).unwrap());
}

#[test]
fn invalidated_root_ends_the_scan() {
    let fs = MemoryFs::new();
    fs.create_dir("/R/sub");
    let (tree, root) = MemoryTree::new_root("/R", true);
    let sub = tree.add_child(root, "sub", FileAttributes::directory()).unwrap();
    tree.invalidate(sub).unwrap();

    let result = scan(&fs, &tree, sub, RefreshOptions::default());

    assert_eq!(result.outcome, ScanOutcome::RootInvalidated);
    assert!(result.events.is_empty());
}

/// Forwards to a [`MemoryTree`], but can no longer resolve the path of one node.
struct PathlessNode {
    tree: MemoryTree,
    pathless: NodeId,
}

impl CachedTreeView for PathlessNode {
    fn node(&self, id: NodeId) -> Result<CachedNode, InvalidNode> {
        self.tree.node(id)
    }

    fn path(&self, id: NodeId) -> Result<PathBuf, InvalidNode> {
        if id == self.pathless {
            return Err(InvalidNode(id));
        }
        self.tree.path(id)
    }

    fn directory(&self, id: NodeId) -> Result<Option<DirectoryInfo>, InvalidNode> {
        self.tree.directory(id)
    }

    fn snapshot_full(&self, dir: NodeId) -> Result<FullSnapshot, InvalidNode> {
        self.tree.snapshot_full(dir)
    }

    fn snapshot_partial(&self, dir: NodeId) -> Result<PartialSnapshot, InvalidNode> {
        self.tree.snapshot_partial(dir)
    }

    fn children_or_names_changed(
        &self,
        dir: NodeId,
        names: &[SmolStr],
        children: &[CachedNode],
    ) -> Result<bool, InvalidNode> {
        self.tree.children_or_names_changed(dir, names, children)
    }

    fn partial_snapshot_changed(
        &self,
        dir: NodeId,
        snapshot: &PartialSnapshot,
    ) -> Result<bool, InvalidNode> {
        self.tree.partial_snapshot_changed(dir, snapshot)
    }

    fn find_child(&self, dir: NodeId, name: &str) -> Result<Option<CachedNode>, InvalidNode> {
        self.tree.find_child(dir, name)
    }

    fn is_dirty(&self, id: NodeId) -> Result<bool, InvalidNode> {
        self.tree.is_dirty(id)
    }

    fn mark_dirty(&self, id: NodeId) -> Result<(), InvalidNode> {
        self.tree.mark_dirty(id)
    }

    fn mark_clean(&self, id: NodeId) -> Result<(), InvalidNode> {
        self.tree.mark_clean(id)
    }
}

#[test]
fn root_invalidated_while_resolving_its_path_ends_the_scan() {
    let fs = MemoryFs::new();
    fs.create_file("/R/a", 1, 1);
    let (tree, root) = MemoryTree::new_root("/R", true);
    tree.mark_dirty_recursively(root).unwrap();
    let tree = PathlessNode { tree, pathless: root };

    let result = scan(&fs, &tree, root, RefreshOptions::default());

    assert_eq!(result.outcome, ScanOutcome::RootInvalidated);
    assert!(result.events.is_empty());
}

#[test]
fn type_change_of_a_parentless_root_is_fatal() {
    init_tracing();
    let fs = MemoryFs::new();
    fs.create_file("/R", 1, 1);
    let (tree, root) = MemoryTree::new_root("/R", true);
    tree.mark_dirty(root).unwrap();

    let mut worker = RefreshWorker::new(&fs, &tree, root, RefreshOptions::default())
        .with_metrics_sink(Arc::new(MetricsRegistry::default()));
    let err = worker.scan().unwrap_err();

    assert!(matches!(err, RefreshError::OrphanTypeChange { node } if node == root), "{err}");
    assert!(err.is_fatal());
    assert!(worker.events().is_empty());
    assert!(tree.is_dirty(root).unwrap());
    assert_eq!(worker.stats().unwrap().outcome, None);
}

#[test]
fn type_change_of_a_nested_root_is_reported_against_its_parent() {
    let fs = MemoryFs::new();
    fs.create_file("/R/sub", 4, 4);
    let (tree, root) = MemoryTree::new_root("/R", true);
    let sub = tree.add_child(root, "sub", FileAttributes::directory()).unwrap();
    tree.mark_dirty(sub).unwrap();

    let result = scan(&fs, &tree, sub, RefreshOptions::default());

    assert_eq!(
        summarize(&result.events),
        vec![format!("delete {sub}"), format!("create {root} sub regular")]
    );
    tree.apply(&result.events).unwrap();
    assert_eq!(tree.describe(root), fs.describe("/R"));
}
