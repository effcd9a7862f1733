use std::collections::VecDeque;

use nova_core::NodeId;
use tokio_util::sync::CancellationToken;

use super::error::RefreshError;
use super::tree::CachedTreeView;

pub(crate) type ProbeListener = Box<dyn FnMut(NodeId) + Send>;

/// The single suspension point of a refresh.
///
/// Every per-entry unit of work calls [`CancelProbe::check`]. Once the token is cancelled the
/// probe leaves everything the walk has not finished dirty and reports
/// [`RefreshError::Cancelled`].
pub(crate) struct CancelProbe {
    token: CancellationToken,
    listener: Option<ProbeListener>,
}

impl std::fmt::Debug for CancelProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelProbe")
            .field("cancelled", &self.token.is_cancelled())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl CancelProbe {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            token,
            listener: None,
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn set_token(&mut self, token: CancellationToken) {
        self.token = token;
    }

    pub(crate) fn set_listener(&mut self, listener: ProbeListener) {
        self.listener = Some(listener);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn check<T: CachedTreeView + ?Sized>(
        &mut self,
        tree: &T,
        at: NodeId,
        queue: &mut VecDeque<NodeId>,
    ) -> Result<(), RefreshError> {
        if let Some(listener) = self.listener.as_mut() {
            listener(at);
        }
        if !self.token.is_cancelled() {
            return Ok(());
        }

        tracing::trace!(
            target = "nova.vfs.refresh",
            at = %at,
            pending = queue.len(),
            "refresh cancelled"
        );
        force_mark_dirty(tree, at);
        drain_dirty(tree, queue);
        Err(RefreshError::Cancelled)
    }
}

/// Marks `id` dirty even if the tree treats an already-dirty node as a no-op.
pub(crate) fn force_mark_dirty<T: CachedTreeView + ?Sized>(tree: &T, id: NodeId) {
    let result = tree.mark_clean(id).and_then(|()| tree.mark_dirty(id));
    if let Err(err) = result {
        tracing::trace!(
            target = "nova.vfs.refresh",
            node = %id,
            error = %err,
            "could not mark node dirty"
        );
    }
}

/// Empties `queue`, leaving every drained node dirty for the next refresh.
pub(crate) fn drain_dirty<T: CachedTreeView + ?Sized>(tree: &T, queue: &mut VecDeque<NodeId>) {
    for id in queue.drain(..) {
        force_mark_dirty(tree, id);
    }
}
