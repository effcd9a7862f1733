use std::path::PathBuf;

use nova_core::NodeId;

/// The cached tree no longer knows about a node (another actor invalidated it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cached node {0} is no longer valid")]
pub struct InvalidNode(pub NodeId);

/// Errors produced while refreshing a cached tree.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh cancelled")]
    Cancelled,

    #[error("cached node {0} is no longer valid")]
    InvalidNode(NodeId),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file type of {node} changed but it has no parent to re-create it under")]
    OrphanTypeChange { node: NodeId },

    #[error("cached node {0} was queued for a directory scan but is not a directory")]
    NotADirectory(NodeId),
}

impl RefreshError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RefreshError::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that abort the whole scan rather than a single directory pass.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RefreshError::OrphanTypeChange { .. } | RefreshError::NotADirectory(_)
        )
    }
}

impl From<InvalidNode> for RefreshError {
    fn from(err: InvalidNode) -> Self {
        RefreshError::InvalidNode(err.0)
    }
}

/// Errors produced while loading [`RefreshOptions`](super::RefreshOptions).
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("failed to read refresh options from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid refresh options: {0}")]
    Toml(#[from] toml::de::Error),
}
