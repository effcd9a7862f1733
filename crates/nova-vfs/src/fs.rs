use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use nova_core::{is_noise_name, names_equal, FileAttributes, FileType, SmolStr};

/// Real file system capability consumed by the refresh engine.
///
/// The trait is intentionally small so it can be implemented for different backends (local FS,
/// in-memory trees for tests, remote mounts, etc). It never writes.
///
/// Error conventions:
/// - A path that no longer exists is `Ok(None)` from [`FileSystem::attributes`], never an error.
/// - `Err` means a transient I/O failure; callers decide whether to retry or treat the entry as
///   gone.
pub trait FileSystem: Send + Sync {
    /// Returns the attributes of `path`, or `None` if it no longer exists.
    fn attributes(&self, path: &Path) -> io::Result<Option<FileAttributes>>;

    /// Lists the names of the entries of directory `dir` in unspecified order.
    fn list(&self, dir: &Path) -> io::Result<Vec<SmolStr>>;

    /// Whether [`FileSystem::list_with_attributes`] is implemented.
    fn supports_batched_listing(&self) -> bool {
        false
    }

    /// Lists names and attributes in one call.
    ///
    /// Only called when [`FileSystem::supports_batched_listing`] returns `true`.
    fn list_with_attributes(&self, dir: &Path) -> io::Result<Vec<(SmolStr, FileAttributes)>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("batched listing not supported ({})", dir.display()),
        ))
    }

    /// Returns whether directory `dir` has at least one entry.
    fn has_children(&self, dir: &Path) -> io::Result<bool> {
        Ok(self.list(dir)?.iter().any(|name| !is_noise_name(name)))
    }

    /// Resolves the final target of symlink `path`, or `None` if it dangles.
    fn resolve_symlink(&self, path: &Path) -> io::Result<Option<PathBuf>>;

    /// Returns the on-disk, case-exact name of `path`.
    fn canonical_cased_name(&self, path: &Path) -> io::Result<SmolStr>;
}

impl<F: ?Sized + FileSystem> FileSystem for &F {
    fn attributes(&self, path: &Path) -> io::Result<Option<FileAttributes>> {
        (**self).attributes(path)
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<SmolStr>> {
        (**self).list(dir)
    }

    fn supports_batched_listing(&self) -> bool {
        (**self).supports_batched_listing()
    }

    fn list_with_attributes(&self, dir: &Path) -> io::Result<Vec<(SmolStr, FileAttributes)>> {
        (**self).list_with_attributes(dir)
    }

    fn has_children(&self, dir: &Path) -> io::Result<bool> {
        (**self).has_children(dir)
    }

    fn resolve_symlink(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        (**self).resolve_symlink(path)
    }

    fn canonical_cased_name(&self, path: &Path) -> io::Result<SmolStr> {
        (**self).canonical_cased_name(path)
    }
}

impl<F: ?Sized + FileSystem> FileSystem for Arc<F> {
    fn attributes(&self, path: &Path) -> io::Result<Option<FileAttributes>> {
        self.as_ref().attributes(path)
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<SmolStr>> {
        self.as_ref().list(dir)
    }

    fn supports_batched_listing(&self) -> bool {
        self.as_ref().supports_batched_listing()
    }

    fn list_with_attributes(&self, dir: &Path) -> io::Result<Vec<(SmolStr, FileAttributes)>> {
        self.as_ref().list_with_attributes(dir)
    }

    fn has_children(&self, dir: &Path) -> io::Result<bool> {
        self.as_ref().has_children(dir)
    }

    fn resolve_symlink(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        self.as_ref().resolve_symlink(path)
    }

    fn canonical_cased_name(&self, path: &Path) -> io::Result<SmolStr> {
        self.as_ref().canonical_cased_name(path)
    }
}

/// Drops `.`/`..` and empty names from a raw listing.
pub(crate) fn filter_names(names: Vec<SmolStr>) -> Vec<SmolStr> {
    let mut names = names;
    names.retain(|name| !is_noise_name(name));
    names
}

/// Local OS file system implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }

    fn attributes_from(metadata: &fs::Metadata) -> FileAttributes {
        let file_type = metadata.file_type();
        let file_type = if file_type.is_dir() {
            FileType::Directory
        } else if file_type.is_file() {
            FileType::Regular
        } else {
            FileType::Special
        };

        FileAttributes::new(file_type)
            .with_writable(!metadata.permissions().readonly())
            .with_hidden(is_hidden(metadata))
            .with_content(metadata.len(), modified_nanos(metadata))
    }
}

#[cfg(windows)]
fn is_hidden(metadata: &fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;

    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

#[cfg(not(windows))]
fn is_hidden(_metadata: &fs::Metadata) -> bool {
    false
}

fn modified_nanos(metadata: &fs::Metadata) -> i64 {
    // Some platforms/filesystems don't record mtimes; treat those as the epoch so the stamp stays
    // stable across refreshes.
    let Ok(modified) = metadata.modified() else {
        return 0;
    };
    match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(err) => i64::try_from(err.duration().as_nanos())
            .map(|before| -before)
            .unwrap_or(i64::MIN),
    }
}

impl FileSystem for LocalFs {
    fn attributes(&self, path: &Path) -> io::Result<Option<FileAttributes>> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        if !metadata.file_type().is_symlink() {
            return Ok(Some(Self::attributes_from(&metadata)));
        }

        match fs::metadata(path) {
            Ok(target) => Ok(Some(Self::attributes_from(&target).with_symlink(true))),
            // Dangling link: report the link itself as a regular file so it still shows up.
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let mut attrs = Self::attributes_from(&metadata).with_symlink(true);
                attrs.file_type = FileType::Regular;
                Ok(Some(attrs))
            }
            Err(err) => Err(err),
        }
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<SmolStr>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            out.push(SmolStr::new(entry.file_name().to_string_lossy()));
        }
        Ok(filter_names(out))
    }

    fn supports_batched_listing(&self) -> bool {
        true
    }

    fn list_with_attributes(&self, dir: &Path) -> io::Result<Vec<(SmolStr, FileAttributes)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = SmolStr::new(entry.file_name().to_string_lossy());
            if is_noise_name(&name) {
                continue;
            }
            // Entries can vanish between `read_dir` and the stat.
            if let Some(attrs) = self.attributes(&entry.path())? {
                out.push((name, attrs));
            }
        }
        Ok(out)
    }

    fn has_children(&self, dir: &Path) -> io::Result<bool> {
        Ok(fs::read_dir(dir)?.next().is_some())
    }

    fn resolve_symlink(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        match dunce::canonicalize(path) {
            Ok(target) => Ok(Some(target)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn canonical_cased_name(&self, path: &Path) -> io::Result<SmolStr> {
        let Some(name) = path.file_name().map(|name| name.to_string_lossy()) else {
            return Ok(SmolStr::new(path.to_string_lossy()));
        };
        let Some(parent) = path.parent() else {
            return Ok(SmolStr::new(name));
        };

        let mut folded_match = None;
        for entry in fs::read_dir(parent)? {
            let entry = entry?;
            let candidate = entry.file_name();
            let candidate = candidate.to_string_lossy();
            if candidate == name {
                return Ok(SmolStr::new(candidate));
            }
            if folded_match.is_none() && names_equal(&candidate, &name, false) {
                folded_match = Some(SmolStr::new(candidate));
            }
        }
        Ok(folded_match.unwrap_or_else(|| SmolStr::new(name)))
    }
}
