use std::path::PathBuf;
use std::sync::Arc;

use nova_core::FileAttributes;
use nova_metrics::MetricsRegistry;
use nova_vfs::refresh::{
    CachedTreeView, ChildrenHint, MemoryTree, RefreshOptions, RefreshWorker, ScanOutcome,
    VfsEvent,
};
use nova_vfs::MemoryFs;

use super::support::{file, mirror, scan, summarize};

#[test]
fn batched_listing_saves_stat_calls() {
    let build = |batched: bool| {
        let fs = MemoryFs::new().with_batched_listing(batched);
        for name in ["a", "b", "c", "d"] {
            fs.create_file(format!("/R/{name}"), 1, 1);
        }
        fs.create_file("/R/e", 2, 2);
        fs
    };
    let run = |fs: &MemoryFs| {
        let (tree, root) = MemoryTree::new_root("/R", true);
        for name in ["a", "b", "c", "d", "e"] {
            tree.add_child(root, name, file(1, 1)).unwrap();
        }
        tree.mark_dirty_recursively(root).unwrap();
        let before = fs.stat_calls();
        let result = scan(fs, &tree, root, RefreshOptions::default());
        (summarize(&result.events), fs.stat_calls() - before)
    };

    let (single_events, single_stats) = run(&build(false));
    let (batched_events, batched_stats) = run(&build(true));

    assert_eq!(single_events, batched_events);
    assert_eq!(single_events.len(), 1);
    assert!(
        batched_stats < single_stats,
        "batched={batched_stats} single={single_stats}"
    );
}

#[test]
fn batched_listing_can_be_disabled() {
    let fs = MemoryFs::new().with_batched_listing(true);
    fs.create_file("/R/a", 1, 1);
    let (tree, root) = MemoryTree::new_root("/R", true);
    tree.add_child(root, "a", file(1, 1)).unwrap();
    tree.mark_dirty_recursively(root).unwrap();

    let before = fs.stat_calls();
    let result = scan(
        &fs,
        &tree,
        root,
        RefreshOptions::default().prefer_batched_listing(false),
    );
    assert!(result.events.is_empty());
    // The root plus the surviving child.
    assert_eq!(fs.stat_calls() - before, 2);
}

#[test]
fn partial_scan_only_examines_cached_children_and_suspicious_names() {
    let fs = MemoryFs::new();
    fs.create_file("/R/x", 5, 50);
    fs.create_file("/R/wanted", 1, 1);
    fs.create_file("/R/unrelated", 1, 1);
    let (tree, root) = MemoryTree::new_root("/R", true);
    let x = tree.add_child(root, "x", file(1, 1)).unwrap();
    tree.set_all_children_loaded(root, false).unwrap();
    for name in ["wanted", "missing", "x", ""] {
        tree.add_suspicious_name(root, name).unwrap();
    }
    tree.mark_dirty_recursively(root).unwrap();

    let result = scan(&fs, &tree, root, RefreshOptions::default());

    assert_eq!(
        summarize(&result.events),
        vec![
            format!("content {x} len=5 mtime=50"),
            format!("create {root} wanted regular"),
        ]
    );
    assert_eq!(result.stats.partial_scans, 1);
    assert_eq!(result.stats.full_scans, 0);

    tree.apply(&result.events).unwrap();
    let remaining = tree.snapshot_partial(root).unwrap().suspicious_names;
    assert_eq!(
        remaining.iter().map(|name| name.as_str()).collect::<Vec<_>>(),
        vec!["missing", "x", ""]
    );
}

#[test]
fn partial_scan_canonicalizes_suspicious_names() {
    let fs = MemoryFs::case_insensitive();
    fs.create_file("/R/Foo.txt", 1, 1);
    let (tree, root) = MemoryTree::new_root("/R", false);
    tree.set_all_children_loaded(root, false).unwrap();
    tree.add_suspicious_name(root, "FOO.TXT").unwrap();
    tree.mark_dirty_recursively(root).unwrap();

    let result = scan(&fs, &tree, root, RefreshOptions::default());

    assert_eq!(
        summarize(&result.events),
        vec![format!("create {root} Foo.txt regular")]
    );
}

#[test]
fn partial_scan_detects_case_renames_of_cached_children() {
    let fs = MemoryFs::case_insensitive();
    fs.create_file("/R/Main.java", 1, 1);
    let (tree, root) = MemoryTree::new_root("/R", false);
    let main = tree.add_child(root, "main.java", file(1, 1)).unwrap();
    tree.set_all_children_loaded(root, false).unwrap();
    tree.mark_dirty_recursively(root).unwrap();

    let result = scan(&fs, &tree, root, RefreshOptions::default());

    assert_eq!(
        summarize(&result.events),
        vec![format!("name {main} main.java -> Main.java")]
    );
}

#[test]
fn non_recursive_scan_stays_at_the_root() {
    let fs = MemoryFs::new();
    fs.create_file("/R/top", 1, 1);
    fs.create_file("/R/sub/deep", 1, 1);
    let (tree, root) = MemoryTree::new_root("/R", true);
    let sub = tree.add_child(root, "sub", FileAttributes::directory()).unwrap();
    tree.mark_dirty_recursively(root).unwrap();

    let result = scan(&fs, &tree, root, RefreshOptions::default().recursive(false));

    assert_eq!(
        summarize(&result.events),
        vec![format!("create {root} top regular")]
    );
    assert!(tree.is_dirty(root).unwrap());
    assert!(tree.is_dirty(sub).unwrap());
    assert_eq!(result.stats.full_scans, 1);
}

#[test]
fn recursive_scan_marks_processed_directories_clean() {
    let fs = MemoryFs::new();
    fs.create_file("/R/sub/deep", 1, 1);
    let (tree, root) = mirror(&fs, "/R");
    let sub = tree.find_by_path("sub").unwrap();
    let deep = tree.find_by_path("sub/deep").unwrap();
    tree.mark_dirty_recursively(root).unwrap();

    let result = scan(&fs, tree.clone(), root, RefreshOptions::default());

    assert!(result.events.is_empty());
    for node in [root, sub, deep] {
        assert!(!tree.is_dirty(node).unwrap());
    }
}

#[test]
fn changed_files_stay_dirty_until_applied() {
    let fs = MemoryFs::new();
    fs.create_file("/R/f", 1, 1);
    let (tree, root) = mirror(&fs, "/R");
    let f = tree.find_by_path("f").unwrap();
    fs.set_attributes("/R/f", file(1, 1).with_writable(false));
    tree.mark_dirty_recursively(root).unwrap();

    let result = scan(&fs, tree.clone(), root, RefreshOptions::default());

    assert_eq!(summarize(&result.events), vec![format!("writable {f} false")]);
    assert!(tree.is_dirty(f).unwrap());
    tree.apply(&result.events).unwrap();
    assert!(!tree.is_dirty(f).unwrap());
}

#[test]
fn hidden_bit_is_only_diffed_when_tracked() {
    let fs = MemoryFs::new();
    fs.create_file("/R/f", 1, 1);
    let (tree, root) = mirror(&fs, "/R");
    let f = tree.find_by_path("f").unwrap();
    fs.set_attributes("/R/f", file(1, 1).with_hidden(true));

    tree.mark_dirty_recursively(root).unwrap();
    let untracked = scan(
        &fs,
        tree.clone(),
        root,
        RefreshOptions::default().platform_tracks_hidden(false),
    );
    assert!(untracked.events.is_empty());

    tree.mark_dirty_recursively(root).unwrap();
    let tracked = scan(
        &fs,
        tree.clone(),
        root,
        RefreshOptions::default().platform_tracks_hidden(true),
    );
    assert_eq!(summarize(&tracked.events), vec![format!("hidden {f} true")]);
}

#[test]
fn symlink_retargeting_is_an_attribute_change() {
    let fs = MemoryFs::new();
    fs.create_dir("/R/t1");
    fs.create_dir("/R/t2");
    fs.create_symlink("/R/link", "/R/t1", FileAttributes::directory());
    let (tree, root) = mirror(&fs, "/R");
    let link = tree.find_by_path("link").unwrap();
    assert_eq!(
        tree.node(link).unwrap().symlink_target,
        Some(PathBuf::from("/R/t1"))
    );

    fs.create_symlink("/R/link", "/R/t2", FileAttributes::directory());
    tree.mark_dirty_recursively(root).unwrap();
    let result = scan(&fs, tree.clone(), root, RefreshOptions::default());

    assert_eq!(
        summarize(&result.events),
        vec![format!("symlink {link} Some(\"/R/t2\")")]
    );
    tree.apply(&result.events).unwrap();
    assert_eq!(tree.describe(root), fs.describe("/R"));
}

#[test]
fn symlink_flips_respect_ignore_file_type_changes() {
    let fs = MemoryFs::new();
    fs.create_file("/R/target", 1, 1);
    fs.create_file("/R/f", 1, 1);
    let (tree, root) = mirror(&fs, "/R");
    let f = tree.find_by_path("f").unwrap();
    fs.create_symlink("/R/f", "/R/target", file(1, 1));

    tree.mark_dirty_recursively(root).unwrap();
    let flipped = scan(&fs, tree.clone(), root, RefreshOptions::default());
    assert_eq!(
        summarize(&flipped.events),
        vec![format!("delete {f}"), format!("create {root} f symlink")]
    );

    tree.mark_dirty_recursively(root).unwrap();
    let ignored = scan(
        &fs,
        tree.clone(),
        root,
        RefreshOptions::default().ignore_file_type_changes(true),
    );
    assert_eq!(
        summarize(&ignored.events),
        vec![format!("symlink {f} Some(\"/R/target\")")]
    );
}

#[test]
fn new_empty_directories_carry_the_empty_marker() {
    let fs = MemoryFs::new();
    fs.create_dir("/R/empty");
    let (tree, root) = MemoryTree::new_root("/R", true);
    tree.mark_dirty_recursively(root).unwrap();

    let result = scan(
        &fs,
        &tree,
        root,
        RefreshOptions::default().expand_created_directories(false),
    );

    assert!(matches!(
        result.events.as_slice(),
        [VfsEvent::Create { children: ChildrenHint::Empty, .. }]
    ));
}

#[test]
fn scans_are_recorded_under_their_mode() {
    let fs = MemoryFs::new();
    fs.create_dir("/R");
    let (tree, root) = MemoryTree::new_root("/R", true);
    let registry = Arc::new(MetricsRegistry::default());

    for recursive in [true, false] {
        tree.mark_dirty(root).unwrap();
        let mut worker = RefreshWorker::new(
            &fs,
            &tree,
            root,
            RefreshOptions::default().recursive(recursive),
        )
        .with_metrics_sink(registry.clone());
        assert_eq!(worker.scan().unwrap(), ScanOutcome::Completed);
    }

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.scopes["recursive"].scan_count, 1);
    assert_eq!(snapshot.scopes["flat"].scan_count, 1);
    assert_eq!(snapshot.totals.full_scans, 2);
}

#[test]
fn scans_without_a_metrics_sink_still_report_stats() {
    let fs = MemoryFs::new();
    fs.create_file("/R/a", 1, 1);
    let (tree, root) = MemoryTree::new_root("/R", true);
    tree.mark_dirty_recursively(root).unwrap();

    let mut worker =
        RefreshWorker::new(&fs, &tree, root, RefreshOptions::default()).without_metrics();

    assert_eq!(worker.scan().unwrap(), ScanOutcome::Completed);
    assert_eq!(worker.events().len(), 1);
    let stats = worker.stats().unwrap();
    assert_eq!(stats.outcome, Some(ScanOutcome::Completed));
    assert_eq!(stats.full_scans, 1);
}
