use std::sync::Arc;

use nova_core::{FileAttributes, NodeId};
use nova_metrics::MetricsRegistry;
use nova_vfs::refresh::{
    CachedTreeView, MemoryTree, PropertyChange, RefreshOptions, RefreshStats, RefreshWorker,
    ScanOutcome, VfsEvent,
};
use nova_vfs::{FileSystem, MemoryFs};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Scan {
    pub outcome: ScanOutcome,
    pub events: Vec<VfsEvent>,
    pub stats: RefreshStats,
}

/// Runs one refresh of `root` with a private metrics sink.
pub fn scan<F: FileSystem, T: CachedTreeView>(
    fs: F,
    tree: T,
    root: NodeId,
    options: RefreshOptions,
) -> Scan {
    init_tracing();
    let mut worker = RefreshWorker::new(fs, tree, root, options)
        .with_metrics_sink(Arc::new(MetricsRegistry::default()));
    let outcome = worker.scan().expect("scan should not fail");
    Scan {
        outcome,
        events: worker.take_events(),
        stats: worker.stats().expect("stats are recorded"),
    }
}

/// Human-readable event summary: `create #0 x`, `delete #3`, `name #2 README -> Readme`, ...
pub fn summarize(events: &[VfsEvent]) -> Vec<String> {
    events
        .iter()
        .map(|event| match event {
            VfsEvent::Create {
                parent,
                name,
                attributes,
                ..
            } => {
                let kind = format!("{:?}", attributes.kind()).to_lowercase();
                format!("create {parent} {name} {kind}")
            }
            VfsEvent::Delete { node } => format!("delete {node}"),
            VfsEvent::AttributeChange { node, change } => match change {
                PropertyChange::Name { old, new } => format!("name {node} {old} -> {new}"),
                PropertyChange::Writable { new, .. } => format!("writable {node} {new}"),
                PropertyChange::Hidden { new, .. } => format!("hidden {node} {new}"),
                PropertyChange::SymlinkTarget { new, .. } => {
                    format!("symlink {node} {new:?}")
                }
                PropertyChange::ContentStamp { new, .. } => {
                    format!("content {node} len={} mtime={}", new.length, new.timestamp)
                }
            },
        })
        .collect()
}

/// A cached tree mirroring `fs` below `root_path`, built by refreshing an empty root.
pub fn mirror(fs: &MemoryFs, root_path: &str) -> (Arc<MemoryTree>, NodeId) {
    let (tree, root) = MemoryTree::new_root(root_path, fs.is_case_sensitive());
    let tree = Arc::new(tree);
    tree.mark_dirty_recursively(root).unwrap();
    let result = scan(fs, tree.clone(), root, RefreshOptions::default());
    assert_eq!(result.outcome, ScanOutcome::Completed);
    tree.apply(&result.events).unwrap();
    assert_eq!(tree.describe(root), fs.describe(root_path));
    (tree, root)
}

pub fn file(len: u64, mtime: i64) -> FileAttributes {
    FileAttributes::file(len, mtime)
}
