use serde::{Deserialize, Serialize};

/// The type of the entry a path resolves to.
///
/// Symlinks are not a separate type here: a symlink reports the type of its target and sets
/// [`FileAttributes::is_symlink`]. See [`FileKind`] for the folded view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Regular,
    Directory,
    /// Devices, sockets, FIFOs and anything else that is neither a file nor a directory.
    Special,
}

/// Node kind as seen by consumers of refresh events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Special,
}

/// The pair compared when deciding whether a file's content changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentStamp {
    /// Last-modified time in nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub length: u64,
}

impl ContentStamp {
    #[inline]
    pub const fn new(timestamp: i64, length: u64) -> Self {
        Self { timestamp, length }
    }
}

/// Attributes of a file system entry, either observed on disk or persisted in the cached tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttributes {
    pub file_type: FileType,
    pub is_symlink: bool,
    /// Only meaningful on platforms that track a hidden bit (Windows).
    pub is_hidden: bool,
    pub is_writable: bool,
    pub length: u64,
    /// Last-modified time in nanoseconds since the Unix epoch.
    pub last_modified: i64,
}

impl FileAttributes {
    pub const fn new(file_type: FileType) -> Self {
        Self {
            file_type,
            is_symlink: false,
            is_hidden: false,
            is_writable: true,
            length: 0,
            last_modified: 0,
        }
    }

    /// A writable regular file.
    pub const fn file(length: u64, last_modified: i64) -> Self {
        Self {
            length,
            last_modified,
            ..Self::new(FileType::Regular)
        }
    }

    pub const fn directory() -> Self {
        Self::new(FileType::Directory)
    }

    pub const fn special() -> Self {
        Self::new(FileType::Special)
    }

    pub const fn with_symlink(mut self, is_symlink: bool) -> Self {
        self.is_symlink = is_symlink;
        self
    }

    pub const fn with_writable(mut self, is_writable: bool) -> Self {
        self.is_writable = is_writable;
        self
    }

    pub const fn with_hidden(mut self, is_hidden: bool) -> Self {
        self.is_hidden = is_hidden;
        self
    }

    pub const fn with_content(mut self, length: u64, last_modified: i64) -> Self {
        self.length = length;
        self.last_modified = last_modified;
        self
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    #[inline]
    pub fn is_special(&self) -> bool {
        self.file_type == FileType::Special
    }

    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.is_symlink
    }

    pub fn kind(&self) -> FileKind {
        if self.is_symlink {
            return FileKind::Symlink;
        }
        match self.file_type {
            FileType::Regular => FileKind::Regular,
            FileType::Directory => FileKind::Directory,
            FileType::Special => FileKind::Special,
        }
    }

    pub fn content_stamp(&self) -> ContentStamp {
        ContentStamp::new(self.last_modified, self.length)
    }
}
