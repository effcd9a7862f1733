//! Core shared types for Nova's virtual file system.
//!
//! This crate is intentionally small: it only holds the value types that both the cached tree
//! and the real file system speak (node ids, attributes, file-name comparison rules).

mod attributes;
mod id;
mod name;

pub use attributes::{ContentStamp, FileAttributes, FileKind, FileType};
pub use id::NodeId;
pub use name::{fold_case, is_noise_name, names_equal};
pub use smol_str::SmolStr;
