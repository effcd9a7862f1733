use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use nova_core::{fold_case, names_equal, FileAttributes, SmolStr};
use parking_lot::RwLock;

use crate::fs::FileSystem;

/// Deterministic in-memory file system.
///
/// This does not touch the OS. It is used by tests (and embedders without a physical disk) to
/// describe the "real tree" a refresh reconciles against. Paths are absolute, `/`-rooted and
/// compared case-insensitively when constructed with [`MemoryFs::case_insensitive`].
///
/// Missing parent directories are created implicitly by the `create_*` helpers.
#[derive(Debug)]
pub struct MemoryFs {
    case_sensitive: bool,
    batched: bool,
    inner: RwLock<MemoryFsInner>,
    stat_calls: AtomicU64,
}

#[derive(Debug, Default)]
struct MemoryFsInner {
    entries: HashMap<String, MemoryEntry>,
    failing_listings: HashSet<String>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    /// Case-exact path.
    path: PathBuf,
    attributes: FileAttributes,
    symlink_target: Option<PathBuf>,
    children: Vec<SmolStr>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    /// A case-sensitive file system containing only the root directory `/`.
    pub fn new() -> Self {
        Self::with_case_sensitivity(true)
    }

    /// A case-insensitive (but case-preserving) file system containing only `/`.
    pub fn case_insensitive() -> Self {
        Self::with_case_sensitivity(false)
    }

    fn with_case_sensitivity(case_sensitive: bool) -> Self {
        let fs = Self {
            case_sensitive,
            batched: false,
            inner: RwLock::new(MemoryFsInner::default()),
            stat_calls: AtomicU64::new(0),
        };
        fs.inner.write().entries.insert(
            fs.key(Path::new("/")),
            MemoryEntry {
                path: PathBuf::from("/"),
                attributes: FileAttributes::directory(),
                symlink_target: None,
                children: Vec::new(),
            },
        );
        fs
    }

    /// Enables [`FileSystem::list_with_attributes`].
    pub fn with_batched_listing(mut self, batched: bool) -> Self {
        self.batched = batched;
        self
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn create_dir(&self, path: impl AsRef<Path>) {
        self.insert(path.as_ref(), FileAttributes::directory(), None);
    }

    pub fn create_file(&self, path: impl AsRef<Path>, length: u64, last_modified: i64) {
        self.insert(
            path.as_ref(),
            FileAttributes::file(length, last_modified),
            None,
        );
    }

    pub fn create_special(&self, path: impl AsRef<Path>) {
        self.insert(path.as_ref(), FileAttributes::special(), None);
    }

    /// Creates a symlink whose target has `target_attributes` (the symlink flag is set here).
    pub fn create_symlink(
        &self,
        path: impl AsRef<Path>,
        target: impl Into<PathBuf>,
        target_attributes: FileAttributes,
    ) {
        self.insert(
            path.as_ref(),
            target_attributes.with_symlink(true),
            Some(target.into()),
        );
    }

    /// Inserts or replaces the entry at `path`.
    ///
    /// Replacing a directory with a non-directory drops its subtree.
    pub fn insert(
        &self,
        path: &Path,
        attributes: FileAttributes,
        symlink_target: Option<PathBuf>,
    ) {
        let mut inner = self.inner.write();
        self.insert_locked(&mut inner, path, attributes, symlink_target);
    }

    fn insert_locked(
        &self,
        inner: &mut MemoryFsInner,
        path: &Path,
        attributes: FileAttributes,
        symlink_target: Option<PathBuf>,
    ) {
        let path = normalize(path);
        let Some((parent, name)) = split_parent(&path) else {
            // The root always exists and is always a directory.
            return;
        };

        let parent_key = self.key(&parent);
        if !inner
            .entries
            .get(&parent_key)
            .is_some_and(|entry| entry.attributes.is_directory())
        {
            self.insert_locked(inner, &parent, FileAttributes::directory(), None);
        }

        let key = self.key(&path);
        if let Some(existing) = inner.entries.get_mut(&key) {
            let was_directory = existing.attributes.is_directory();
            existing.attributes = attributes;
            existing.symlink_target = symlink_target;
            if was_directory && !attributes.is_directory() {
                let subtree = std::mem::take(&mut existing.children);
                let existing_path = existing.path.clone();
                for child in subtree {
                    self.remove_locked(inner, &existing_path.join(child.as_str()));
                }
            }
            return;
        }

        // Use the parent's case-exact path so keys of descendants stay consistent.
        let Some(parent_entry) = inner.entries.get_mut(&parent_key) else {
            return;
        };
        let path = parent_entry.path.join(name.as_str());
        parent_entry.children.push(name);
        inner.entries.insert(
            key,
            MemoryEntry {
                path,
                attributes,
                symlink_target,
                children: Vec::new(),
            },
        );
    }

    /// Updates the attributes of an existing entry. Returns `false` if `path` does not exist.
    pub fn set_attributes(&self, path: impl AsRef<Path>, attributes: FileAttributes) -> bool {
        let path = path.as_ref();
        let Some(existing) = self.entry(path) else {
            return false;
        };
        self.insert(path, attributes, existing.symlink_target);
        true
    }

    /// Changes the length and timestamp of an existing entry.
    pub fn touch(&self, path: impl AsRef<Path>, length: u64, last_modified: i64) -> bool {
        let path = path.as_ref();
        let current = self
            .inner
            .read()
            .entries
            .get(&self.key(path))
            .map(|entry| entry.attributes);
        match current {
            Some(attrs) => self.set_attributes(path, attrs.with_content(length, last_modified)),
            None => false,
        }
    }

    /// Removes `path` and its subtree. Returns `false` if nothing was removed.
    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        let mut inner = self.inner.write();
        self.remove_locked(&mut inner, &normalize(path.as_ref()))
    }

    fn remove_locked(&self, inner: &mut MemoryFsInner, path: &Path) -> bool {
        let Some((parent, name)) = split_parent(path) else {
            return false;
        };
        let Some(entry) = inner.entries.remove(&self.key(path)) else {
            return false;
        };
        for child in &entry.children {
            self.remove_locked(inner, &entry.path.join(child.as_str()));
        }
        if let Some(parent_entry) = inner.entries.get_mut(&self.key(&parent)) {
            let case_sensitive = self.case_sensitive;
            parent_entry
                .children
                .retain(|child| !names_equal(child, &name, case_sensitive));
        }
        true
    }

    /// Renames `path` to `new_name` within the same parent directory, keeping its subtree.
    pub fn rename(&self, path: impl AsRef<Path>, new_name: &str) -> bool {
        let path = normalize(path.as_ref());
        let Some((parent, _)) = split_parent(&path) else {
            return false;
        };

        let mut inner = self.inner.write();
        let Some(entry) = inner.entries.get(&self.key(&path)).cloned() else {
            return false;
        };
        let mut subtree = Vec::new();
        self.collect_subtree(&inner, &entry, Path::new(""), &mut subtree);

        self.remove_locked(&mut inner, &path);
        let new_path = parent.join(new_name);
        self.insert_locked(&mut inner, &new_path, entry.attributes, entry.symlink_target);
        for (relative, attributes, target) in subtree {
            self.insert_locked(&mut inner, &new_path.join(relative), attributes, target);
        }
        true
    }

    fn collect_subtree(
        &self,
        inner: &MemoryFsInner,
        entry: &MemoryEntry,
        relative: &Path,
        out: &mut Vec<(PathBuf, FileAttributes, Option<PathBuf>)>,
    ) {
        for child in &entry.children {
            let Some(child_entry) = inner.entries.get(&self.key(&entry.path.join(child.as_str())))
            else {
                continue;
            };
            let child_relative = relative.join(child.as_str());
            out.push((
                child_relative.clone(),
                child_entry.attributes,
                child_entry.symlink_target.clone(),
            ));
            self.collect_subtree(inner, child_entry, &child_relative, out);
        }
    }

    /// Makes subsequent listings of `dir` fail (or succeed again) with an I/O error.
    pub fn fail_listing(&self, dir: impl AsRef<Path>, failing: bool) {
        let key = self.key(dir.as_ref());
        let mut inner = self.inner.write();
        if failing {
            inner.failing_listings.insert(key);
        } else {
            inner.failing_listings.remove(&key);
        }
    }

    /// Number of [`FileSystem::attributes`] calls served so far.
    pub fn stat_calls(&self) -> u64 {
        self.stat_calls.load(Ordering::Relaxed)
    }

    /// Renders the subtree below `root` as sorted, one-line-per-entry descriptions.
    ///
    /// The format matches `MemoryTree::describe`, so a reconciled cached tree can be compared
    /// with the real tree it was refreshed against.
    pub fn describe(&self, root: impl AsRef<Path>) -> Vec<String> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        if let Some(entry) = inner.entries.get(&self.key(root.as_ref())) {
            self.describe_children(&inner, entry, "", &mut out);
        }
        out
    }

    fn describe_children(
        &self,
        inner: &MemoryFsInner,
        entry: &MemoryEntry,
        prefix: &str,
        out: &mut Vec<String>,
    ) {
        let mut children: Vec<&SmolStr> = entry.children.iter().collect();
        children.sort();
        for child in children {
            let Some(child_entry) = inner.entries.get(&self.key(&entry.path.join(child.as_str())))
            else {
                continue;
            };
            let relative = format!("{prefix}{child}");
            // Dangling links render like unresolved ones, matching `resolve_symlink`.
            let target = child_entry
                .symlink_target
                .as_deref()
                .and_then(|target| self.resolve_locked(inner, &child_entry.path, target));
            out.push(describe_entry(
                &relative,
                &child_entry.attributes,
                target.as_deref(),
            ));
            if child_entry.attributes.is_directory() && !child_entry.attributes.is_symlink() {
                self.describe_children(inner, child_entry, &format!("{relative}/"), out);
            }
        }
    }

    /// Case-exact path of the entry `target` points at, relative targets resolved against the
    /// link's directory. `None` if it dangles.
    fn resolve_locked(&self, inner: &MemoryFsInner, link: &Path, target: &Path) -> Option<PathBuf> {
        let resolved = match link.parent() {
            Some(parent) if !target.is_absolute() => parent.join(target),
            _ => target.to_path_buf(),
        };
        inner
            .entries
            .get(&self.key(&resolved))
            .map(|entry| entry.path.clone())
    }

    fn key(&self, path: &Path) -> String {
        let normalized = normalize(path);
        let raw = normalized.to_string_lossy();
        if self.case_sensitive {
            raw.into_owned()
        } else {
            fold_case(&raw).into_owned()
        }
    }

    fn entry(&self, path: &Path) -> Option<MemoryEntry> {
        self.inner.read().entries.get(&self.key(path)).cloned()
    }

    fn directory(&self, dir: &Path) -> io::Result<MemoryEntry> {
        let key = self.key(dir);
        let inner = self.inner.read();
        if inner.failing_listings.contains(&key) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected listing failure ({})", dir.display()),
            ));
        }
        match inner.entries.get(&key) {
            Some(entry) if entry.attributes.is_directory() => Ok(entry.clone()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("not a directory ({})", dir.display()),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such directory ({})", dir.display()),
            )),
        }
    }
}

/// One-line description of an entry, shared by the in-memory real and cached trees.
pub(crate) fn describe_entry(
    relative: &str,
    attributes: &FileAttributes,
    symlink_target: Option<&Path>,
) -> String {
    let mut line = if attributes.is_directory() {
        format!("{relative}/ dir")
    } else if attributes.is_special() {
        format!("{relative} special")
    } else {
        format!(
            "{relative} file len={} mtime={}",
            attributes.length, attributes.last_modified
        )
    };
    if !attributes.is_writable {
        line.push_str(" ro");
    }
    if attributes.is_hidden {
        line.push_str(" hidden");
    }
    if attributes.is_symlink() {
        match symlink_target {
            Some(target) => line.push_str(&format!(" -> {}", target.display())),
            None => line.push_str(" -> ?"),
        }
    }
    line
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

fn split_parent(path: &Path) -> Option<(PathBuf, SmolStr)> {
    let name = path.file_name()?;
    let parent = path.parent()?;
    Some((parent.to_path_buf(), SmolStr::new(name.to_string_lossy())))
}

impl FileSystem for MemoryFs {
    fn attributes(&self, path: &Path) -> io::Result<Option<FileAttributes>> {
        self.stat_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.entry(path).map(|entry| entry.attributes))
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<SmolStr>> {
        Ok(self.directory(dir)?.children)
    }

    fn supports_batched_listing(&self) -> bool {
        self.batched
    }

    fn list_with_attributes(&self, dir: &Path) -> io::Result<Vec<(SmolStr, FileAttributes)>> {
        if !self.batched {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("batched listing not supported ({})", dir.display()),
            ));
        }
        let entry = self.directory(dir)?;
        let inner = self.inner.read();
        let mut out = Vec::with_capacity(entry.children.len());
        for child in entry.children {
            let key = self.key(&entry.path.join(child.as_str()));
            if let Some(child_entry) = inner.entries.get(&key) {
                out.push((child, child_entry.attributes));
            }
        }
        Ok(out)
    }

    fn has_children(&self, dir: &Path) -> io::Result<bool> {
        Ok(!self.directory(dir)?.children.is_empty())
    }

    fn resolve_symlink(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        let inner = self.inner.read();
        let Some(entry) = inner.entries.get(&self.key(path)) else {
            return Ok(None);
        };
        Ok(entry
            .symlink_target
            .as_deref()
            .and_then(|target| self.resolve_locked(&inner, &entry.path, target)))
    }

    fn canonical_cased_name(&self, path: &Path) -> io::Result<SmolStr> {
        match self.entry(path) {
            Some(entry) => Ok(entry
                .path
                .file_name()
                .map(|name| SmolStr::new(name.to_string_lossy()))
                .unwrap_or_else(|| SmolStr::new("/"))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such entry ({})", path.display()),
            )),
        }
    }
}
