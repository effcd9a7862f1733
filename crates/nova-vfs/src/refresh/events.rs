use std::path::{Path, PathBuf};
use std::time::Duration;

use nova_core::{ContentStamp, FileAttributes, NodeId, SmolStr};
use serde::{Deserialize, Serialize};

use crate::fs::FileSystem;

use super::error::RefreshError;
use super::metrics::timed;
use super::tree::CachedNode;

/// What a create event knows about the new directory's contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "children", rename_all = "camelCase")]
pub enum ChildrenHint {
    /// Not enumerated (files, symlinks, or directories that were not expanded).
    Unknown,
    /// A directory observed to have no children.
    Empty,
    /// A directory enumerated while scheduling its creation.
    Loaded(Vec<ChildInfo>),
}

/// A real entry about to be created in the cached tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildInfo {
    pub name: SmolStr,
    pub attributes: FileAttributes,
    pub symlink_target: Option<PathBuf>,
    pub children: ChildrenHint,
}

impl ChildInfo {
    /// Builds the record for `name` in `dir` from already-fetched attributes.
    ///
    /// Directories with no children get [`ChildrenHint::Empty`]. With `canonicalize`, the name is
    /// replaced by its on-disk spelling. Failures of these secondary lookups only degrade the
    /// record (unknown children, no symlink target, name as given).
    pub(crate) fn read<F: FileSystem + ?Sized>(
        fs: &F,
        dir: &Path,
        name: &str,
        attributes: FileAttributes,
        canonicalize: bool,
        io_time: &mut Duration,
    ) -> Self {
        let path = dir.join(name);
        let mut children = ChildrenHint::Unknown;
        if attributes.is_directory() && !attributes.is_symlink() {
            match timed(io_time, || fs.has_children(&path)) {
                Ok(false) => children = ChildrenHint::Empty,
                Ok(true) => {}
                Err(err) => log_lookup_failure(&path, "has_children", &err),
            }
        }

        let symlink_target = if attributes.is_symlink() {
            timed(io_time, || fs.resolve_symlink(&path)).unwrap_or_else(|err| {
                log_lookup_failure(&path, "resolve_symlink", &err);
                None
            })
        } else {
            None
        };

        let name = if canonicalize {
            timed(io_time, || fs.canonical_cased_name(&path)).unwrap_or_else(|err| {
                log_lookup_failure(&path, "canonical_cased_name", &err);
                SmolStr::new(name)
            })
        } else {
            SmolStr::new(name)
        };

        ChildInfo {
            name,
            attributes,
            symlink_target,
            children,
        }
    }
}

fn log_lookup_failure(path: &Path, op: &'static str, err: &std::io::Error) {
    tracing::debug!(
        target = "nova.vfs.refresh",
        path = %path.display(),
        op,
        error = %err,
        "file system lookup failed while building a new child"
    );
}

/// A cached-node property an attribute change refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeProperty {
    Name,
    Writable,
    Hidden,
    SymlinkTarget,
    ContentStamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "property", rename_all = "camelCase")]
pub enum PropertyChange {
    Name { old: SmolStr, new: SmolStr },
    Writable { old: bool, new: bool },
    Hidden { old: bool, new: bool },
    SymlinkTarget {
        old: Option<PathBuf>,
        new: Option<PathBuf>,
    },
    ContentStamp { old: ContentStamp, new: ContentStamp },
}

impl PropertyChange {
    pub fn property(&self) -> NodeProperty {
        match self {
            PropertyChange::Name { .. } => NodeProperty::Name,
            PropertyChange::Writable { .. } => NodeProperty::Writable,
            PropertyChange::Hidden { .. } => NodeProperty::Hidden,
            PropertyChange::SymlinkTarget { .. } => NodeProperty::SymlinkTarget,
            PropertyChange::ContentStamp { .. } => NodeProperty::ContentStamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Delete,
    AttributeChange(NodeProperty),
}

/// A change to apply to the cached tree, produced by a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VfsEvent {
    Create {
        parent: NodeId,
        name: SmolStr,
        attributes: FileAttributes,
        symlink_target: Option<PathBuf>,
        children: ChildrenHint,
    },
    Delete {
        node: NodeId,
    },
    AttributeChange {
        node: NodeId,
        change: PropertyChange,
    },
}

impl VfsEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            VfsEvent::Create { .. } => EventKind::Create,
            VfsEvent::Delete { .. } => EventKind::Delete,
            VfsEvent::AttributeChange { change, .. } => {
                EventKind::AttributeChange(change.property())
            }
        }
    }

    fn create(parent: NodeId, child: ChildInfo) -> Self {
        VfsEvent::Create {
            parent,
            name: child.name,
            attributes: child.attributes,
            symlink_target: child.symlink_target,
            children: child.children,
        }
    }
}

/// Accumulates the events of one refresh.
///
/// Events are scheduled into the innermost open transaction. Committing a transaction appends its
/// events to the enclosing one (or to the committed batch); rolling it back drops them.
#[derive(Debug, Default)]
pub struct EventHelper {
    committed: Vec<VfsEvent>,
    transactions: Vec<Vec<VfsEvent>>,
    io_time: Duration,
}

impl EventHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_transaction(&mut self) {
        self.transactions.push(Vec::new());
    }

    /// Closes the innermost transaction. Returns `false` if no transaction was open.
    pub fn end_transaction(&mut self, commit: bool) -> bool {
        let Some(events) = self.transactions.pop() else {
            return false;
        };
        if commit {
            match self.transactions.last_mut() {
                Some(parent) => parent.extend(events),
                None => self.committed.extend(events),
            }
        }
        true
    }

    /// Number of open transactions.
    pub fn depth(&self) -> usize {
        self.transactions.len()
    }

    fn schedule(&mut self, event: VfsEvent) {
        match self.transactions.last_mut() {
            Some(current) => current.push(event),
            None => self.committed.push(event),
        }
    }

    pub fn schedule_deletion(&mut self, node: NodeId) {
        self.schedule(VfsEvent::Delete { node });
    }

    pub fn schedule_attribute_change(&mut self, node: NodeId, change: PropertyChange) {
        self.schedule(VfsEvent::AttributeChange { node, change });
    }

    /// Schedules the creation of `child` under `parent`.
    ///
    /// When `expand` is set and `child` is a non-symlink directory whose contents are unknown, its
    /// subtree is enumerated now and attached to the event. `probe` runs before every enumerated
    /// entry and aborts the expansion when it fails.
    pub fn schedule_creation<F: FileSystem + ?Sized>(
        &mut self,
        fs: &F,
        parent: NodeId,
        parent_path: &Path,
        mut child: ChildInfo,
        expand: bool,
        probe: &mut dyn FnMut() -> Result<(), RefreshError>,
    ) -> Result<(), RefreshError> {
        if expand {
            let path = parent_path.join(child.name.as_str());
            self.expand(fs, &path, &mut child, probe)?;
        }
        self.schedule(VfsEvent::create(parent, child));
        Ok(())
    }

    fn expand<F: FileSystem + ?Sized>(
        &mut self,
        fs: &F,
        path: &Path,
        child: &mut ChildInfo,
        probe: &mut dyn FnMut() -> Result<(), RefreshError>,
    ) -> Result<(), RefreshError> {
        if !child.attributes.is_directory()
            || child.attributes.is_symlink()
            || child.children != ChildrenHint::Unknown
        {
            return Ok(());
        }

        let names = match timed(&mut self.io_time, || fs.list(path)) {
            Ok(names) => names,
            Err(err) => {
                // Left unknown; the next refresh of the new directory enumerates it.
                tracing::debug!(
                    target = "nova.vfs.refresh",
                    path = %path.display(),
                    error = %err,
                    "failed to expand new directory"
                );
                return Ok(());
            }
        };

        let mut loaded = Vec::with_capacity(names.len());
        for name in crate::fs::filter_names(names) {
            probe()?;
            let attributes = match timed(&mut self.io_time, || fs.attributes(&path.join(name.as_str())))
            {
                Ok(Some(attributes)) => attributes,
                Ok(None) => continue,
                Err(err) => {
                    tracing::debug!(
                        target = "nova.vfs.refresh",
                        path = %path.join(name.as_str()).display(),
                        error = %err,
                        "failed to stat entry of new directory"
                    );
                    continue;
                }
            };
            let mut grandchild =
                ChildInfo::read(fs, path, &name, attributes, false, &mut self.io_time);
            self.expand(fs, &path.join(name.as_str()), &mut grandchild, probe)?;
            loaded.push(grandchild);
        }

        child.children = if loaded.is_empty() {
            ChildrenHint::Empty
        } else {
            loaded.sort_by(|a, b| a.name.cmp(&b.name));
            ChildrenHint::Loaded(loaded)
        };
        Ok(())
    }

    pub fn check_writable_attribute_change(&mut self, node: &CachedNode, new: bool) -> bool {
        let old = node.attributes.is_writable;
        if old == new {
            return false;
        }
        self.schedule_attribute_change(node.id, PropertyChange::Writable { old, new });
        true
    }

    pub fn check_hidden_attribute_change(&mut self, node: &CachedNode, new: bool) -> bool {
        let old = node.attributes.is_hidden;
        if old == new {
            return false;
        }
        self.schedule_attribute_change(node.id, PropertyChange::Hidden { old, new });
        true
    }

    pub fn check_symlink_change(&mut self, node: &CachedNode, new: Option<PathBuf>) -> bool {
        if node.symlink_target == new {
            return false;
        }
        self.schedule_attribute_change(
            node.id,
            PropertyChange::SymlinkTarget {
                old: node.symlink_target.clone(),
                new,
            },
        );
        true
    }

    /// Schedules a content change iff the timestamp or the length differs.
    pub fn check_content_changed(
        &mut self,
        node: NodeId,
        old_timestamp: i64,
        new_timestamp: i64,
        old_length: u64,
        new_length: u64,
    ) -> bool {
        if old_timestamp == new_timestamp && old_length == new_length {
            return false;
        }
        self.schedule_attribute_change(
            node,
            PropertyChange::ContentStamp {
                old: ContentStamp::new(old_timestamp, old_length),
                new: ContentStamp::new(new_timestamp, new_length),
            },
        );
        true
    }

    /// Committed events, in commit order.
    pub fn events(&self) -> &[VfsEvent] {
        &self.committed
    }

    pub fn take_events(&mut self) -> Vec<VfsEvent> {
        std::mem::take(&mut self.committed)
    }

    /// Time spent in file system calls while expanding created directories.
    pub fn io_time(&self) -> Duration {
        self.io_time
    }
}
