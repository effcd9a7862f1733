use std::path::{Path, PathBuf};

use nova_core::{names_equal, FileAttributes, NodeId, SmolStr};
use parking_lot::RwLock;

use crate::memory_fs::describe_entry;

use super::error::InvalidNode;
use super::events::{ChildInfo, ChildrenHint, PropertyChange, VfsEvent};
use super::tree::{CachedNode, CachedTreeView, DirectoryInfo, FullSnapshot, PartialSnapshot};

/// An in-memory cached tree.
///
/// Besides answering [`CachedTreeView`] queries it plays the downstream consumer: committed
/// refresh batches are applied with [`MemoryTree::apply`]. Nodes are never reused; a deleted or
/// invalidated id stays invalid.
#[derive(Debug)]
pub struct MemoryTree {
    state: RwLock<TreeState>,
}

#[derive(Debug)]
struct TreeState {
    root_path: PathBuf,
    nodes: Vec<Option<NodeRecord>>,
}

#[derive(Debug, Clone)]
struct NodeRecord {
    parent: Option<NodeId>,
    name: SmolStr,
    attributes: FileAttributes,
    symlink_target: Option<PathBuf>,
    dirty: bool,
    dir: Option<DirRecord>,
}

#[derive(Debug, Clone, Default)]
struct DirRecord {
    case_sensitive: bool,
    all_children_loaded: bool,
    children: Vec<NodeId>,
    suspicious: Vec<SmolStr>,
}

impl NodeRecord {
    fn new(
        parent: Option<NodeId>,
        name: SmolStr,
        attributes: FileAttributes,
        symlink_target: Option<PathBuf>,
        case_sensitive: bool,
    ) -> Self {
        let dir = attributes.is_directory().then(|| DirRecord {
            case_sensitive,
            ..DirRecord::default()
        });
        Self {
            parent,
            name,
            attributes,
            symlink_target,
            dirty: false,
            dir,
        }
    }
}

impl TreeState {
    fn record(&self, id: NodeId) -> Result<&NodeRecord, InvalidNode> {
        self.nodes
            .get(id.to_raw() as usize)
            .and_then(Option::as_ref)
            .ok_or(InvalidNode(id))
    }

    fn record_mut(&mut self, id: NodeId) -> Result<&mut NodeRecord, InvalidNode> {
        self.nodes
            .get_mut(id.to_raw() as usize)
            .and_then(Option::as_mut)
            .ok_or(InvalidNode(id))
    }

    fn dir(&self, id: NodeId) -> Result<&DirRecord, InvalidNode> {
        self.record(id)?.dir.as_ref().ok_or(InvalidNode(id))
    }

    fn cached_node(&self, id: NodeId) -> Result<CachedNode, InvalidNode> {
        let record = self.record(id)?;
        Ok(CachedNode {
            id,
            parent: record.parent,
            name: record.name.clone(),
            attributes: record.attributes,
            symlink_target: record.symlink_target.clone(),
            dirty: record.dirty,
        })
    }

    fn children(&self, dir: NodeId) -> Result<Vec<CachedNode>, InvalidNode> {
        self.dir(dir)?
            .children
            .iter()
            .map(|&child| self.cached_node(child))
            .collect()
    }

    fn path(&self, id: NodeId) -> Result<PathBuf, InvalidNode> {
        let mut names = Vec::new();
        let mut current = id;
        loop {
            let record = self.record(current)?;
            match record.parent {
                Some(parent) => {
                    names.push(record.name.clone());
                    current = parent;
                }
                None => break,
            }
        }
        let mut path = self.root_path.clone();
        for name in names.iter().rev() {
            path.push(name.as_str());
        }
        Ok(path)
    }

    fn find_child(&self, dir: NodeId, name: &str) -> Result<Option<NodeId>, InvalidNode> {
        let info = self.dir(dir)?;
        for &child in &info.children {
            if names_equal(&self.record(child)?.name, name, info.case_sensitive) {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    fn alloc(&mut self, record: NodeRecord) -> NodeId {
        let id = NodeId::from_raw(self.nodes.len() as u32);
        self.nodes.push(Some(record));
        id
    }

    fn add_child(
        &mut self,
        parent: NodeId,
        name: SmolStr,
        attributes: FileAttributes,
        symlink_target: Option<PathBuf>,
    ) -> Result<NodeId, InvalidNode> {
        let case_sensitive = self.dir(parent)?.case_sensitive;
        let id = self.alloc(NodeRecord::new(
            Some(parent),
            name.clone(),
            attributes,
            symlink_target,
            case_sensitive,
        ));
        let info = self
            .record_mut(parent)?
            .dir
            .as_mut()
            .ok_or(InvalidNode(parent))?;
        info.children.push(id);
        info.suspicious
            .retain(|suspicious| !names_equal(suspicious, &name, case_sensitive));
        Ok(id)
    }

    fn create(&mut self, parent: NodeId, child: &ChildInfo) -> Result<NodeId, InvalidNode> {
        let id = self.add_child(
            parent,
            child.name.clone(),
            child.attributes,
            child.symlink_target.clone(),
        )?;
        match &child.children {
            ChildrenHint::Unknown if child.attributes.is_directory() => {
                // Not enumerated yet: the next refresh must list it in full.
                self.set_loaded(id, true)?;
                self.record_mut(id)?.dirty = true;
            }
            ChildrenHint::Unknown => {}
            ChildrenHint::Empty => self.set_loaded(id, true)?,
            ChildrenHint::Loaded(children) => {
                self.set_loaded(id, true)?;
                for grandchild in children {
                    self.create(id, grandchild)?;
                }
            }
        }
        Ok(id)
    }

    fn set_loaded(&mut self, dir: NodeId, loaded: bool) -> Result<(), InvalidNode> {
        if let Some(info) = self.record_mut(dir)?.dir.as_mut() {
            info.all_children_loaded = loaded;
        }
        Ok(())
    }

    fn remove_subtree(&mut self, id: NodeId) -> Result<(), InvalidNode> {
        let record = self.record(id)?.clone();
        if let Some(parent) = record.parent {
            if let Ok(Some(info)) = self.record_mut(parent).map(|r| r.dir.as_mut()) {
                info.children.retain(|&child| child != id);
            }
        }
        self.drop_subtree(id);
        Ok(())
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let Some(record) = self
            .nodes
            .get_mut(id.to_raw() as usize)
            .and_then(Option::take)
        else {
            return;
        };
        if let Some(info) = record.dir {
            for child in info.children {
                self.drop_subtree(child);
            }
        }
    }

    fn apply_change(&mut self, node: NodeId, change: &PropertyChange) -> Result<(), InvalidNode> {
        let record = self.record_mut(node)?;
        match change {
            PropertyChange::Name { new, .. } => record.name = new.clone(),
            PropertyChange::Writable { new, .. } => record.attributes.is_writable = *new,
            PropertyChange::Hidden { new, .. } => record.attributes.is_hidden = *new,
            PropertyChange::SymlinkTarget { new, .. } => record.symlink_target = new.clone(),
            PropertyChange::ContentStamp { new, .. } => {
                record.attributes.length = new.length;
                record.attributes.last_modified = new.timestamp;
            }
        }
        record.dirty = false;
        Ok(())
    }

    fn describe_children(&self, dir: NodeId, prefix: &str, out: &mut Vec<String>) {
        let Ok(info) = self.dir(dir) else {
            return;
        };
        let mut children: Vec<(NodeId, &NodeRecord)> = info
            .children
            .iter()
            .filter_map(|&child| self.record(child).ok().map(|record| (child, record)))
            .collect();
        children.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        for (child, record) in children {
            let relative = format!("{prefix}{}", record.name);
            out.push(describe_entry(
                &relative,
                &record.attributes,
                record.symlink_target.as_deref(),
            ));
            if record.attributes.is_directory() && !record.attributes.is_symlink() {
                self.describe_children(child, &format!("{relative}/"), out);
            }
        }
    }

    fn subtree(&self, id: NodeId, out: &mut Vec<NodeId>) {
        out.push(id);
        if let Ok(info) = self.dir(id) {
            for &child in &info.children {
                self.subtree(child, out);
            }
        }
    }
}

impl MemoryTree {
    /// Creates a tree with a single, fully loaded root directory at `root_path`.
    pub fn new_root(root_path: impl Into<PathBuf>, case_sensitive: bool) -> (Self, NodeId) {
        let mut state = TreeState {
            root_path: root_path.into(),
            nodes: Vec::new(),
        };
        let name = SmolStr::new(
            state
                .root_path
                .file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default(),
        );
        let mut record = NodeRecord::new(None, name, FileAttributes::directory(), None, case_sensitive);
        if let Some(info) = record.dir.as_mut() {
            info.all_children_loaded = true;
        }
        let root = state.alloc(record);
        (
            Self {
                state: RwLock::new(state),
            },
            root,
        )
    }

    /// Adds a clean child. New directories start fully loaded and empty.
    pub fn add_child(
        &self,
        parent: NodeId,
        name: &str,
        attributes: FileAttributes,
    ) -> Result<NodeId, InvalidNode> {
        let mut state = self.state.write();
        let id = state.add_child(parent, SmolStr::new(name), attributes, None)?;
        state.set_loaded(id, true)?;
        Ok(id)
    }

    pub fn add_symlink(
        &self,
        parent: NodeId,
        name: &str,
        target_attributes: FileAttributes,
        target: Option<PathBuf>,
    ) -> Result<NodeId, InvalidNode> {
        self.state.write().add_child(
            parent,
            SmolStr::new(name),
            target_attributes.with_symlink(true),
            target,
        )
    }

    pub fn set_all_children_loaded(&self, dir: NodeId, loaded: bool) -> Result<(), InvalidNode> {
        let mut state = self.state.write();
        state.dir(dir)?;
        state.set_loaded(dir, loaded)
    }

    /// Records a name that may exist in `dir` but was never loaded.
    pub fn add_suspicious_name(&self, dir: NodeId, name: &str) -> Result<(), InvalidNode> {
        let mut state = self.state.write();
        state
            .record_mut(dir)?
            .dir
            .as_mut()
            .ok_or(InvalidNode(dir))?
            .suspicious
            .push(SmolStr::new(name));
        Ok(())
    }

    /// Drops `id` and its subtree, as if another actor deleted it concurrently.
    pub fn invalidate(&self, id: NodeId) -> Result<(), InvalidNode> {
        self.state.write().remove_subtree(id)
    }

    pub fn mark_dirty_recursively(&self, id: NodeId) -> Result<(), InvalidNode> {
        let mut state = self.state.write();
        state.record(id)?;
        let mut ids = Vec::new();
        state.subtree(id, &mut ids);
        for id in ids {
            state.record_mut(id)?.dirty = true;
        }
        Ok(())
    }

    /// Resolves a `/`-separated path relative to the root.
    pub fn find_by_path(&self, relative: &str) -> Option<NodeId> {
        let state = self.state.read();
        let mut current = NodeId::from_raw(0);
        state.record(current).ok()?;
        for name in Path::new(relative).iter() {
            current = state.find_child(current, &name.to_string_lossy()).ok()??;
        }
        Some(current)
    }

    pub fn is_valid(&self, id: NodeId) -> bool {
        self.state.read().record(id).is_ok()
    }

    /// Renders the subtree below `dir` in the format of [`MemoryFs::describe`](crate::MemoryFs::describe).
    pub fn describe(&self, dir: NodeId) -> Vec<String> {
        let mut out = Vec::new();
        self.state.read().describe_children(dir, "", &mut out);
        out
    }

    /// Applies a committed refresh batch.
    ///
    /// Stops at the first event that refers to a node that no longer exists.
    pub fn apply(&self, events: &[VfsEvent]) -> Result<(), InvalidNode> {
        let mut state = self.state.write();
        for event in events {
            match event {
                VfsEvent::Create {
                    parent,
                    name,
                    attributes,
                    symlink_target,
                    children,
                } => {
                    state.create(
                        *parent,
                        &ChildInfo {
                            name: name.clone(),
                            attributes: *attributes,
                            symlink_target: symlink_target.clone(),
                            children: children.clone(),
                        },
                    )?;
                }
                VfsEvent::Delete { node } => state.remove_subtree(*node)?,
                VfsEvent::AttributeChange { node, change } => state.apply_change(*node, change)?,
            }
        }
        Ok(())
    }
}

impl CachedTreeView for MemoryTree {
    fn node(&self, id: NodeId) -> Result<CachedNode, InvalidNode> {
        self.state.read().cached_node(id)
    }

    fn path(&self, id: NodeId) -> Result<PathBuf, InvalidNode> {
        self.state.read().path(id)
    }

    fn directory(&self, id: NodeId) -> Result<Option<DirectoryInfo>, InvalidNode> {
        Ok(self
            .state
            .read()
            .record(id)?
            .dir
            .as_ref()
            .map(|info| DirectoryInfo {
                case_sensitive: info.case_sensitive,
                all_children_loaded: info.all_children_loaded,
            }))
    }

    fn snapshot_full(&self, dir: NodeId) -> Result<FullSnapshot, InvalidNode> {
        let state = self.state.read();
        let children = state.children(dir)?;
        let names = children.iter().map(|child| child.name.clone()).collect();
        Ok(FullSnapshot { names, children })
    }

    fn snapshot_partial(&self, dir: NodeId) -> Result<PartialSnapshot, InvalidNode> {
        let state = self.state.read();
        Ok(PartialSnapshot {
            children: state.children(dir)?,
            suspicious_names: state.dir(dir)?.suspicious.clone(),
        })
    }

    fn children_or_names_changed(
        &self,
        dir: NodeId,
        names: &[SmolStr],
        children: &[CachedNode],
    ) -> Result<bool, InvalidNode> {
        let state = self.state.read();
        let info = state.dir(dir)?;
        if info.children.len() != children.len() || info.children.len() != names.len() {
            return Ok(true);
        }
        for ((&current, snapshot), name) in info.children.iter().zip(children).zip(names) {
            let record = state.record(current)?;
            if current != snapshot.id || record.name != snapshot.name || record.name != *name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn partial_snapshot_changed(
        &self,
        dir: NodeId,
        snapshot: &PartialSnapshot,
    ) -> Result<bool, InvalidNode> {
        let state = self.state.read();
        let info = state.dir(dir)?;
        if info.suspicious != snapshot.suspicious_names || info.children.len() != snapshot.children.len() {
            return Ok(true);
        }
        for (&current, cached) in info.children.iter().zip(&snapshot.children) {
            if current != cached.id || state.record(current)?.name != cached.name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn find_child(&self, dir: NodeId, name: &str) -> Result<Option<CachedNode>, InvalidNode> {
        let state = self.state.read();
        match state.find_child(dir, name)? {
            Some(child) => state.cached_node(child).map(Some),
            None => Ok(None),
        }
    }

    fn is_dirty(&self, id: NodeId) -> Result<bool, InvalidNode> {
        Ok(self.state.read().record(id)?.dirty)
    }

    fn mark_dirty(&self, id: NodeId) -> Result<(), InvalidNode> {
        self.state.write().record_mut(id)?.dirty = true;
        Ok(())
    }

    fn mark_clean(&self, id: NodeId) -> Result<(), InvalidNode> {
        self.state.write().record_mut(id)?.dirty = false;
        Ok(())
    }
}
