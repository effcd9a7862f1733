use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use nova_core::{fold_case, is_noise_name, names_equal, FileAttributes, NodeId, SmolStr};

use crate::fs::{filter_names, FileSystem};

use super::error::{InvalidNode, RefreshError};
use super::events::{ChildInfo, ChildrenHint, EventHelper, PropertyChange};
use super::metrics::timed;
use super::options::RefreshOptions;
use super::tree::{CachedNode, CachedTreeView, DirectoryInfo, FullSnapshot, PartialSnapshot};
use super::worker::Walk;

/// Result of one diff pass over a directory.
#[derive(Debug)]
pub(crate) enum DiffOutcome {
    /// The pass is consistent with the cache; commit it and apply the followups.
    Reconciled(Followups),
    /// The cached directory changed while the pass ran; roll back and rescan.
    Drifted,
}

/// Side effects of a pass that only take place once its transaction commits.
#[derive(Debug, Default)]
pub(crate) struct Followups {
    /// Directories to scan next, with the resolved target when the directory is a symlink.
    pub(crate) queue: Vec<(NodeId, Option<PathBuf>)>,
    pub(crate) clean: Vec<NodeId>,
}

struct TypeChange {
    node: NodeId,
    parent: NodeId,
    parent_path: PathBuf,
    replacement: ChildInfo,
}

struct AttributeUpdate {
    node: CachedNode,
    real: FileAttributes,
    /// `None` when the target could not be resolved; the symlink check is skipped then.
    symlink_target: Option<Option<PathBuf>>,
}

/// Events of one directory, grouped in emission order.
#[derive(Default)]
struct DirectoryPlan {
    renames: Vec<(NodeId, SmolStr, SmolStr)>,
    type_changes: Vec<TypeChange>,
    updates: Vec<AttributeUpdate>,
    deletions: Vec<NodeId>,
    creations: Vec<ChildInfo>,
    followups: Followups,
}

struct Listing {
    names: Vec<SmolStr>,
    /// Present when the listing came from a batched call.
    attributes: Option<HashMap<SmolStr, FileAttributes>>,
}

/// Real names of a case-insensitive directory, keyed by their folded form.
///
/// When several real names fold to the same key, the first one listed wins.
struct CaseMap {
    names: HashMap<String, SmolStr>,
}

impl CaseMap {
    fn new(real_names: &[SmolStr]) -> Self {
        let mut names = HashMap::with_capacity(real_names.len());
        for name in real_names {
            names
                .entry(fold_case(name).into_owned())
                .or_insert_with(|| name.clone());
        }
        Self { names }
    }

    /// The on-disk spelling of `cached`, if it differs from `cached` only by case.
    fn renamed(&self, cached: &str) -> Option<&SmolStr> {
        self.names
            .get(fold_case(cached).as_ref())
            .filter(|actual| actual.as_str() != cached)
    }
}

/// Kind flips are reported as delete + create. Directory flips cannot be suppressed.
fn kind_changed(cached: &FileAttributes, real: &FileAttributes, ignore_type_changes: bool) -> bool {
    if cached.is_directory() != real.is_directory() {
        return true;
    }
    !ignore_type_changes
        && (cached.is_symlink() != real.is_symlink() || cached.is_special() != real.is_special())
}

/// Diffs one directory of the cached tree against the real file system.
pub(crate) struct Reconciler<'a, F: ?Sized, T: ?Sized> {
    pub(crate) fs: &'a F,
    pub(crate) tree: &'a T,
    pub(crate) options: &'a RefreshOptions,
    pub(crate) helper: &'a mut EventHelper,
    pub(crate) walk: &'a mut Walk,
}

impl<'a, F, T> Reconciler<'a, F, T>
where
    F: FileSystem + ?Sized,
    T: CachedTreeView + ?Sized,
{
    pub(crate) fn reconcile(
        &mut self,
        dir: NodeId,
        info: DirectoryInfo,
    ) -> Result<DiffOutcome, RefreshError> {
        if info.all_children_loaded {
            self.full_pass(dir, info.case_sensitive)
        } else {
            self.partial_pass(dir, info.case_sensitive)
        }
    }

    /// Checks the refresh root itself against its real attributes.
    pub(crate) fn refresh_root(
        &mut self,
        root: &CachedNode,
        real: FileAttributes,
    ) -> Result<Followups, RefreshError> {
        let path = self.vfs(|tree| tree.path(root.id))?;
        let mut plan = DirectoryPlan::default();
        self.check_child(root, real, &path, &mut plan)?;
        self.emit(root.id, &path, plan)
    }

    fn full_pass(&mut self, dir: NodeId, case_sensitive: bool) -> Result<DiffOutcome, RefreshError> {
        let dir_path = self.vfs(|tree| tree.path(dir))?;
        let snapshot = self.vfs(|tree| tree.snapshot_full(dir))?;
        let listing = self.list(&dir_path)?;

        let new_names: Vec<SmolStr> = {
            let known: HashSet<&str> = if snapshot.children.len() < listing.names.len() {
                snapshot.children.iter().map(|child| child.name.as_str()).collect()
            } else {
                snapshot.names.iter().map(SmolStr::as_str).collect()
            };
            let mut seen = HashSet::new();
            let mut new_names = Vec::new();
            for name in &listing.names {
                if !known.contains(name.as_str()) && seen.insert(name.as_str()) {
                    new_names.push(name.clone());
                }
            }
            new_names
        };
        let deleted_names: Vec<SmolStr> = {
            let real: HashSet<&str> = listing.names.iter().map(SmolStr::as_str).collect();
            snapshot
                .names
                .iter()
                .filter(|name| !real.contains(name.as_str()))
                .cloned()
                .collect()
        };
        let case_map = (!case_sensitive).then(|| CaseMap::new(&listing.names));

        tracing::trace!(
            target = "nova.vfs.refresh",
            dir = %dir,
            current = snapshot.names.len(),
            added = ?new_names,
            deleted = ?deleted_names,
            "full directory diff"
        );

        let mut new_kids = Vec::with_capacity(new_names.len());
        for name in &new_names {
            self.check_cancel(dir)?;
            match self.child_attributes(&dir_path, name, &listing) {
                Some(attributes) => new_kids.push(self.child_info(&dir_path, name, attributes, false)),
                None => tracing::trace!(
                    target = "nova.vfs.refresh",
                    dir = %dir,
                    name = %name,
                    "new entry vanished before it could be examined"
                ),
            }
        }

        let mut survivors = Vec::with_capacity(snapshot.children.len());
        {
            let deleted: HashSet<&str> = deleted_names.iter().map(SmolStr::as_str).collect();
            for child in &snapshot.children {
                if deleted.contains(child.name.as_str()) {
                    continue;
                }
                self.check_cancel(dir)?;
                let attributes = self.child_attributes(&dir_path, &child.name, &listing);
                survivors.push((child.clone(), attributes));
            }
        }

        if self.full_snapshot_changed(dir, &snapshot)? {
            return Ok(DiffOutcome::Drifted);
        }

        let mut plan = DirectoryPlan::default();
        for name in &deleted_names {
            let Some(child) = self.vfs(|tree| tree.find_child(dir, name))? else {
                continue;
            };
            if let Some(actual) = case_map.as_ref().and_then(|map| map.renamed(&child.name)) {
                let replacement = new_kids
                    .iter()
                    .position(|kid| names_equal(&kid.name, &child.name, false));
                let flipped = replacement.is_some_and(|index| {
                    kind_changed(
                        &child.attributes,
                        &new_kids[index].attributes,
                        self.options.ignore_file_type_changes,
                    )
                });
                if !flipped {
                    plan.renames
                        .push((child.id, child.name.clone(), actual.clone()));
                    if let Some(index) = replacement {
                        let kid = new_kids.remove(index);
                        self.check_child(&child, kid.attributes, &dir_path.join(kid.name.as_str()), &mut plan)?;
                    }
                    new_kids.retain(|kid| !names_equal(&kid.name, &child.name, false));
                    continue;
                }
            }
            plan.deletions.push(child.id);
        }

        for (child, attributes) in survivors {
            self.check_cancel(child.id)?;
            match attributes {
                Some(real) => {
                    self.check_child(&child, real, &dir_path.join(child.name.as_str()), &mut plan)?;
                    check_name_change(case_map.as_ref(), &child, &mut plan);
                }
                None => plan.deletions.push(child.id),
            }
        }
        plan.creations = new_kids;

        let followups = self.emit(dir, &dir_path, plan)?;
        if self.full_snapshot_changed(dir, &snapshot)? {
            return Ok(DiffOutcome::Drifted);
        }
        Ok(DiffOutcome::Reconciled(followups))
    }

    fn partial_pass(
        &mut self,
        dir: NodeId,
        case_sensitive: bool,
    ) -> Result<DiffOutcome, RefreshError> {
        let dir_path = self.vfs(|tree| tree.path(dir))?;
        let snapshot = self.vfs(|tree| tree.snapshot_partial(dir))?;

        let case_map = if case_sensitive || snapshot.children.is_empty() {
            None
        } else {
            let names = self
                .io(|fs| fs.list(&dir_path))
                .map_err(|err| RefreshError::io(&dir_path, err))?;
            Some(CaseMap::new(&filter_names(names)))
        };

        tracing::trace!(
            target = "nova.vfs.refresh",
            dir = %dir,
            cached = snapshot.children.len(),
            suspicious = ?snapshot.suspicious_names,
            "partial directory diff"
        );

        let mut existing = Vec::with_capacity(snapshot.children.len());
        for child in &snapshot.children {
            self.check_cancel(dir)?;
            let attributes = self.stat(&dir_path.join(child.name.as_str()));
            existing.push((child.clone(), attributes));
        }

        let mut new_kids: Vec<ChildInfo> = Vec::with_capacity(snapshot.suspicious_names.len());
        for name in &snapshot.suspicious_names {
            let known = snapshot
                .children
                .iter()
                .map(|child| &child.name)
                .chain(new_kids.iter().map(|kid| &kid.name))
                .any(|existing| names_equal(existing, name, case_sensitive));
            if is_noise_name(name) || known {
                continue;
            }
            self.check_cancel(dir)?;
            if let Some(attributes) = self.stat(&dir_path.join(name.as_str())) {
                new_kids.push(self.child_info(&dir_path, name, attributes, true));
            }
        }

        if self.partial_snapshot_changed(dir, &snapshot)? {
            return Ok(DiffOutcome::Drifted);
        }

        let mut plan = DirectoryPlan::default();
        for (child, attributes) in existing {
            self.check_cancel(child.id)?;
            match attributes {
                Some(real) => {
                    self.check_child(&child, real, &dir_path.join(child.name.as_str()), &mut plan)?;
                    check_name_change(case_map.as_ref(), &child, &mut plan);
                }
                None => plan.deletions.push(child.id),
            }
        }
        plan.creations = new_kids;

        let followups = self.emit(dir, &dir_path, plan)?;
        if self.partial_snapshot_changed(dir, &snapshot)? {
            return Ok(DiffOutcome::Drifted);
        }
        Ok(DiffOutcome::Reconciled(followups))
    }

    /// Compares a dirty cached child with its real attributes.
    ///
    /// `path` is where the child lives on disk now (its new name when it is being renamed).
    fn check_child(
        &mut self,
        child: &CachedNode,
        real: FileAttributes,
        path: &Path,
        plan: &mut DirectoryPlan,
    ) -> Result<(), RefreshError> {
        if !child.dirty {
            return Ok(());
        }

        if kind_changed(
            &child.attributes,
            &real,
            self.options.ignore_file_type_changes,
        ) {
            let Some(parent) = child.parent else {
                tracing::error!(
                    target = "nova.vfs.refresh",
                    node = %child.id,
                    cached = ?child.attributes.kind(),
                    real = ?real.kind(),
                    "file type changed on a node without parent"
                );
                return Err(RefreshError::OrphanTypeChange { node: child.id });
            };
            let parent_path = self.vfs(|tree| tree.path(parent))?;
            let name = path
                .file_name()
                .map(|name| SmolStr::new(name.to_string_lossy()))
                .unwrap_or_else(|| child.name.clone());
            let symlink_target = if real.is_symlink() {
                self.resolve_symlink(path).unwrap_or(None)
            } else {
                None
            };
            plan.type_changes.push(TypeChange {
                node: child.id,
                parent,
                parent_path,
                replacement: ChildInfo {
                    name,
                    attributes: real,
                    symlink_target,
                    children: ChildrenHint::Unknown,
                },
            });
            plan.followups.clean.push(child.id);
            return Ok(());
        }

        let symlink_target = if real.is_symlink() {
            self.resolve_symlink(path)
        } else {
            Some(None)
        };
        if real.is_directory() && self.options.recursive {
            let target = symlink_target.clone().flatten();
            plan.followups.queue.push((child.id, target));
        }
        plan.updates.push(AttributeUpdate {
            node: child.clone(),
            real,
            symlink_target,
        });
        Ok(())
    }

    /// Schedules the planned events in their fixed order.
    fn emit(
        &mut self,
        dir: NodeId,
        dir_path: &Path,
        plan: DirectoryPlan,
    ) -> Result<Followups, RefreshError> {
        let DirectoryPlan {
            renames,
            type_changes,
            updates,
            deletions,
            creations,
            mut followups,
        } = plan;
        let expand = self.options.expand_created_directories;
        let tracks_hidden = self.options.platform_tracks_hidden;
        let fs = self.fs;
        let tree = self.tree;
        let helper = &mut *self.helper;
        let walk = &mut *self.walk;

        for (node, old, new) in renames {
            helper.schedule_attribute_change(node, PropertyChange::Name { old, new });
        }

        for change in type_changes {
            helper.schedule_deletion(change.node);
            let parent = change.parent;
            helper.schedule_creation(
                fs,
                parent,
                &change.parent_path,
                change.replacement,
                expand,
                &mut || walk.check_cancel(tree, parent),
            )?;
        }

        for update in updates {
            let node = &update.node;
            let real = &update.real;
            let mut changed = helper.check_writable_attribute_change(node, real.is_writable);
            if tracks_hidden {
                changed |= helper.check_hidden_attribute_change(node, real.is_hidden);
            }
            if let Some(target) = update.symlink_target.filter(|_| real.is_symlink()) {
                changed |= helper.check_symlink_change(node, target);
            }
            if !real.is_directory() {
                changed |= helper.check_content_changed(
                    node.id,
                    node.attributes.last_modified,
                    real.last_modified,
                    node.attributes.length,
                    real.length,
                );
            }
            // Changed nodes stay dirty until the consumer applies the batch. Directories stay
            // dirty until their own pass commits.
            if !changed && !real.is_directory() {
                followups.clean.push(node.id);
            }
        }

        for node in deletions {
            helper.schedule_deletion(node);
        }

        for child in creations {
            helper.schedule_creation(
                fs,
                dir,
                dir_path,
                child,
                expand,
                &mut || walk.check_cancel(tree, dir),
            )?;
        }

        Ok(followups)
    }

    fn full_snapshot_changed(
        &mut self,
        dir: NodeId,
        snapshot: &FullSnapshot,
    ) -> Result<bool, RefreshError> {
        self.check_cancel(dir)?;
        self.vfs(|tree| tree.children_or_names_changed(dir, &snapshot.names, &snapshot.children))
    }

    fn partial_snapshot_changed(
        &mut self,
        dir: NodeId,
        snapshot: &PartialSnapshot,
    ) -> Result<bool, RefreshError> {
        self.check_cancel(dir)?;
        self.vfs(|tree| tree.partial_snapshot_changed(dir, snapshot))
    }

    fn list(&mut self, dir_path: &Path) -> Result<Listing, RefreshError> {
        if self.options.prefer_batched_listing && self.fs.supports_batched_listing() {
            let entries = self
                .io(|fs| fs.list_with_attributes(dir_path))
                .map_err(|err| RefreshError::io(dir_path, err))?;
            let mut names = Vec::with_capacity(entries.len());
            let mut attributes = HashMap::with_capacity(entries.len());
            for (name, attrs) in entries {
                if is_noise_name(&name) {
                    continue;
                }
                names.push(name.clone());
                attributes.insert(name, attrs);
            }
            return Ok(Listing {
                names,
                attributes: Some(attributes),
            });
        }

        let names = self
            .io(|fs| fs.list(dir_path))
            .map_err(|err| RefreshError::io(dir_path, err))?;
        Ok(Listing {
            names: filter_names(names),
            attributes: None,
        })
    }

    fn child_attributes(
        &mut self,
        dir_path: &Path,
        name: &str,
        listing: &Listing,
    ) -> Option<FileAttributes> {
        if let Some(attributes) = listing.attributes.as_ref().and_then(|map| map.get(name)) {
            return Some(*attributes);
        }
        self.stat(&dir_path.join(name))
    }

    /// `None` if the entry is gone. I/O failures are treated the same way.
    fn stat(&mut self, path: &Path) -> Option<FileAttributes> {
        match self.io(|fs| fs.attributes(path)) {
            Ok(attributes) => attributes,
            Err(err) => {
                tracing::debug!(
                    target = "nova.vfs.refresh",
                    path = %path.display(),
                    error = %err,
                    "failed to read attributes; treating entry as gone"
                );
                None
            }
        }
    }

    fn resolve_symlink(&mut self, path: &Path) -> Option<Option<PathBuf>> {
        match self.io(|fs| fs.resolve_symlink(path)) {
            Ok(target) => Some(target),
            Err(err) => {
                tracing::debug!(
                    target = "nova.vfs.refresh",
                    path = %path.display(),
                    error = %err,
                    "failed to resolve symlink"
                );
                None
            }
        }
    }

    fn child_info(
        &mut self,
        dir_path: &Path,
        name: &str,
        attributes: FileAttributes,
        canonicalize: bool,
    ) -> ChildInfo {
        ChildInfo::read(
            self.fs,
            dir_path,
            name,
            attributes,
            canonicalize,
            &mut self.walk.counters.io_time,
        )
    }

    fn check_cancel(&mut self, at: NodeId) -> Result<(), RefreshError> {
        self.walk.check_cancel(self.tree, at)
    }

    fn vfs<R>(
        &mut self,
        f: impl FnOnce(&T) -> Result<R, InvalidNode>,
    ) -> Result<R, RefreshError> {
        let tree = self.tree;
        Ok(timed(&mut self.walk.counters.vfs_time, || f(tree))?)
    }

    fn io<R>(&mut self, f: impl FnOnce(&F) -> io::Result<R>) -> io::Result<R> {
        let fs = self.fs;
        timed(&mut self.walk.counters.io_time, || f(fs))
    }
}

fn check_name_change(case_map: Option<&CaseMap>, child: &CachedNode, plan: &mut DirectoryPlan) {
    if let Some(actual) = case_map.and_then(|map| map.renamed(&child.name)) {
        plan.renames
            .push((child.id, child.name.clone(), actual.clone()));
    }
}
