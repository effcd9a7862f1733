use std::fs;

use nova_vfs::refresh::{CachedTreeView, MemoryTree, RefreshOptions, ScanOutcome};
use nova_vfs::{FileAttributes, LocalFs};

use super::support::{scan, summarize};

fn case_sensitive() -> bool {
    cfg!(not(any(windows, target_os = "macos")))
}

fn sorted(mut lines: Vec<String>) -> Vec<String> {
    lines.sort();
    lines
}

#[test]
fn refresh_follows_changes_on_disk() {
    let temp = tempfile::tempdir().unwrap();
    let root_path = temp.path();
    fs::write(root_path.join("a.txt"), "a").unwrap();
    fs::create_dir(root_path.join("sub")).unwrap();
    fs::write(root_path.join("sub").join("inner.txt"), "inner").unwrap();

    let (tree, root) = MemoryTree::new_root(root_path, case_sensitive());
    tree.mark_dirty_recursively(root).unwrap();

    let initial = scan(LocalFs::new(), &tree, root, RefreshOptions::default());
    assert_eq!(initial.outcome, ScanOutcome::Completed);
    assert_eq!(
        sorted(summarize(&initial.events)),
        vec![
            format!("create {root} a.txt regular"),
            format!("create {root} sub directory"),
        ]
    );
    tree.apply(&initial.events).unwrap();
    let a = tree.find_by_path("a.txt").unwrap();
    let inner = tree.find_by_path("sub/inner.txt").unwrap();

    fs::write(root_path.join("a.txt"), "longer contents").unwrap();
    fs::remove_file(root_path.join("sub").join("inner.txt")).unwrap();
    fs::write(root_path.join("new.txt"), "").unwrap();
    tree.mark_dirty_recursively(root).unwrap();

    let update = scan(LocalFs::new(), &tree, root, RefreshOptions::default());
    let summary = summarize(&update.events);
    assert_eq!(summary.len(), 3, "{summary:?}");
    assert!(summary
        .iter()
        .any(|line| line.starts_with(&format!("content {a} len=15 "))));
    assert!(summary.contains(&format!("delete {inner}")));
    assert!(summary.contains(&format!("create {root} new.txt regular")));

    tree.apply(&update.events).unwrap();
    tree.mark_dirty_recursively(root).unwrap();
    let settled = scan(LocalFs::new(), &tree, root, RefreshOptions::default());
    assert!(settled.events.is_empty(), "{:?}", settled.events);
    assert!(!tree.is_dirty(root).unwrap());
}

#[cfg(unix)]
#[test]
fn symlinked_directory_root_is_scanned_through_its_target() {
    let temp = tempfile::tempdir().unwrap();
    let real = temp.path().join("real");
    fs::create_dir(&real).unwrap();
    std::os::unix::fs::symlink(&real, temp.path().join("link")).unwrap();
    fs::write(real.join("x"), "x").unwrap();

    let (tree, root) = MemoryTree::new_root(temp.path(), case_sensitive());
    let target = fs::canonicalize(&real).unwrap();
    let link = tree
        .add_symlink(root, "link", FileAttributes::directory(), Some(target))
        .unwrap();
    tree.set_all_children_loaded(link, true).unwrap();
    tree.mark_dirty(link).unwrap();

    let result = scan(LocalFs::new(), &tree, link, RefreshOptions::default());

    assert_eq!(result.outcome, ScanOutcome::Completed);
    assert_eq!(
        summarize(&result.events),
        vec![format!("create {link} x regular")]
    );
    assert_eq!(result.stats.full_scans, 1);
    // Cleared by its own committed pass, like a plain directory.
    assert!(!tree.is_dirty(link).unwrap());
}

#[cfg(unix)]
#[test]
fn symlink_cycles_are_scanned_once_per_target() {
    let temp = tempfile::tempdir().unwrap();
    let base = temp.path().join("r");
    fs::create_dir(&base).unwrap();
    fs::write(base.join("f"), "f").unwrap();
    std::os::unix::fs::symlink(&base, base.join("loop")).unwrap();

    let (tree, root) = MemoryTree::new_root(&base, case_sensitive());
    tree.mark_dirty_recursively(root).unwrap();
    let first = scan(LocalFs::new(), &tree, root, RefreshOptions::default());
    assert_eq!(
        sorted(summarize(&first.events)),
        vec![
            format!("create {root} f regular"),
            format!("create {root} loop symlink"),
        ]
    );
    tree.apply(&first.events).unwrap();
    let looped = tree.find_by_path("loop").unwrap();
    assert!(tree.is_dirty(looped).unwrap());

    // The link is listed through its target, which contains the link again.
    tree.mark_dirty_recursively(root).unwrap();
    let second = scan(LocalFs::new(), &tree, root, RefreshOptions::default());
    assert_eq!(
        sorted(summarize(&second.events)),
        vec![
            format!("create {looped} f regular"),
            format!("create {looped} loop symlink"),
        ]
    );
    tree.apply(&second.events).unwrap();
    let nested = tree.find_by_path("loop/loop").unwrap();

    // The nested link resolves to a target that was already queued, so the walk stops there.
    tree.mark_dirty_recursively(root).unwrap();
    let third = scan(LocalFs::new(), &tree, root, RefreshOptions::default());
    assert_eq!(third.outcome, ScanOutcome::Completed);
    assert!(third.events.is_empty(), "{:?}", third.events);
    assert_eq!(third.stats.full_scans, 2);
    assert!(!tree.is_dirty(nested).unwrap());
}
