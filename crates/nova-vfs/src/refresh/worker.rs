use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Instant;

use nova_core::NodeId;
use nova_metrics::MetricsRegistry;
use tokio_util::sync::CancellationToken;

use crate::fs::FileSystem;

use super::cancel::{drain_dirty, force_mark_dirty, CancelProbe};
use super::differ::{DiffOutcome, Followups, Reconciler};
use super::error::RefreshError;
use super::events::{EventHelper, VfsEvent};
use super::metrics::{timed, RefreshMetricsSink, RefreshStats, ScanCounters, ScanOutcome};
use super::options::RefreshOptions;
use super::tree::CachedTreeView;

/// Walk state shared between the worker loop and the differ.
#[derive(Debug)]
pub(crate) struct Walk {
    pub(crate) queue: VecDeque<NodeId>,
    pub(crate) probe: CancelProbe,
    pub(crate) counters: ScanCounters,
    /// Resolved targets of the symlinked directories queued so far.
    pub(crate) visited_targets: HashSet<PathBuf>,
}

impl Walk {
    pub(crate) fn check_cancel<T: CachedTreeView + ?Sized>(
        &mut self,
        tree: &T,
        at: NodeId,
    ) -> Result<(), RefreshError> {
        self.probe.check(tree, at, &mut self.queue)
    }
}

/// Reconciles the cached subtree below one root with the real file system.
///
/// A worker runs a single [`scan`](RefreshWorker::scan). The scan never mutates the cached tree's
/// structure: it produces a batch of [`VfsEvent`]s for the caller to apply, and only maintains
/// dirty flags. Overlapping refreshes of the same subtree must be serialized by the caller.
///
/// ```
/// use nova_core::FileAttributes;
/// use nova_vfs::refresh::{MemoryTree, RefreshOptions, RefreshWorker, ScanOutcome, VfsEvent};
/// use nova_vfs::MemoryFs;
///
/// let fs = MemoryFs::new();
/// fs.create_file("/work/x", 3, 100);
///
/// let (tree, root) = MemoryTree::new_root("/work", true);
/// tree.mark_dirty_recursively(root).unwrap();
///
/// let mut worker = RefreshWorker::new(&fs, &tree, root, RefreshOptions::default());
/// assert_eq!(worker.scan().unwrap(), ScanOutcome::Completed);
/// assert!(matches!(worker.events(), [VfsEvent::Create { name, .. }] if name == "x"));
/// ```
pub struct RefreshWorker<F, T> {
    fs: F,
    tree: T,
    options: RefreshOptions,
    helper: EventHelper,
    walk: Walk,
    metrics: Option<Box<dyn RefreshMetricsSink>>,
    last_stats: Option<RefreshStats>,
}

impl<F, T> RefreshWorker<F, T>
where
    F: FileSystem,
    T: CachedTreeView,
{
    pub fn new(fs: F, tree: T, root: NodeId, options: RefreshOptions) -> Self {
        Self {
            fs,
            tree,
            options,
            helper: EventHelper::new(),
            walk: Walk {
                queue: VecDeque::from([root]),
                probe: CancelProbe::new(CancellationToken::new()),
                counters: ScanCounters::default(),
                visited_targets: HashSet::new(),
            },
            metrics: Some(Box::new(MetricsRegistry::global())),
            last_stats: None,
        }
    }

    /// Uses `token` instead of the worker's own cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.walk.probe.set_token(token);
        self
    }

    pub fn with_metrics_sink(mut self, sink: impl RefreshMetricsSink + 'static) -> Self {
        self.metrics = Some(Box::new(sink));
        self
    }

    pub fn without_metrics(mut self) -> Self {
        self.metrics = None;
        self
    }

    /// Installs a hook that runs at every cancellation probe, with the node being worked on.
    pub fn with_probe_listener(mut self, listener: impl FnMut(NodeId) + Send + 'static) -> Self {
        self.walk.probe.set_listener(Box::new(listener));
        self
    }

    pub fn options(&self) -> &RefreshOptions {
        &self.options
    }

    /// A handle that cancels this worker from anywhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.walk.probe.token().clone()
    }

    pub fn cancel(&self) {
        self.walk.probe.token().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.walk.probe.is_cancelled()
    }

    /// Committed events so far.
    pub fn events(&self) -> &[VfsEvent] {
        self.helper.events()
    }

    pub fn take_events(&mut self) -> Vec<VfsEvent> {
        self.helper.take_events()
    }

    /// Statistics of the last finished scan.
    pub fn stats(&self) -> Option<RefreshStats> {
        self.last_stats
    }

    /// Runs the refresh.
    ///
    /// Cancellation is a normal outcome: every directory that was not finished is left dirty and
    /// only fully committed directory passes contribute events. Fatal invariant violations leave
    /// pending directories dirty as well and are returned as errors.
    pub fn scan(&mut self) -> Result<ScanOutcome, RefreshError> {
        let start = Instant::now();
        let result = match self.run() {
            Err(RefreshError::Cancelled) => Ok(ScanOutcome::Cancelled),
            other => other,
        };
        debug_assert_eq!(self.helper.depth(), 0, "refresh left a transaction open");

        let mut counters = self.walk.counters;
        counters.io_time += self.helper.io_time();
        let stats = RefreshStats::new(
            &counters,
            start.elapsed(),
            result.as_ref().ok().copied(),
            self.options.recursive,
        );
        tracing::debug!(
            target = "nova.vfs.refresh",
            outcome = ?stats.outcome,
            events = self.helper.events().len(),
            full = stats.full_scans,
            partial = stats.partial_scans,
            retries = stats.retries(),
            skipped = stats.skipped,
            wall_ms = stats.wall.as_millis() as u64,
            vfs_us = stats.vfs_time.as_micros() as u64,
            io_us = stats.io_time.as_micros() as u64,
            "refresh finished"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_scan(&stats);
        }
        self.last_stats = Some(stats);
        result
    }

    fn run(&mut self) -> Result<ScanOutcome, RefreshError> {
        if self.walk.probe.is_cancelled() {
            drain_dirty(&self.tree, &mut self.walk.queue);
            return Ok(ScanOutcome::Cancelled);
        }
        let Some(root) = self.walk.queue.pop_front() else {
            return Ok(ScanOutcome::Completed);
        };

        // The root can be invalidated between the two lookups.
        let located = self
            .tree
            .node(root)
            .and_then(|node| Ok((node, self.tree.path(root)?)));
        let (node, path) = match located {
            Ok(located) => located,
            Err(err) => {
                tracing::debug!(target = "nova.vfs.refresh", error = %err, "refresh root is gone");
                return Ok(ScanOutcome::RootInvalidated);
            }
        };
        let fs = &self.fs;
        let real = timed(&mut self.walk.counters.io_time, || fs.attributes(&path)).map_err(|err| {
            force_mark_dirty(&self.tree, root);
            RefreshError::io(&path, err)
        })?;
        let Some(real) = real else {
            tracing::trace!(target = "nova.vfs.refresh", root = %root, "refresh root was deleted");
            self.helper.schedule_deletion(root);
            self.tree.mark_clean(root)?;
            return Ok(ScanOutcome::RootDeleted);
        };

        self.helper.begin_transaction();
        let result = self.reconciler().refresh_root(&node, real);
        self.helper.end_transaction(result.is_ok());
        let followups = match result {
            Ok(followups) => followups,
            Err(RefreshError::InvalidNode(_)) => return Ok(ScanOutcome::RootInvalidated),
            Err(err) => return Err(self.abort(root, err)),
        };
        self.apply_followups(followups);

        if self.walk.queue.is_empty()
            && self.tree.is_dirty(root).unwrap_or(false)
            && matches!(self.tree.directory(root), Ok(Some(_)))
        {
            self.walk.queue.push_back(root);
        }

        self.process_queue()?;
        Ok(ScanOutcome::Completed)
    }

    fn process_queue(&mut self) -> Result<(), RefreshError> {
        let mut transient_failures: HashMap<NodeId, u32> = HashMap::new();

        while let Some(dir) = self.walk.queue.pop_front() {
            let info = match self.tree.directory(dir) {
                Ok(Some(info)) => info,
                Ok(None) => {
                    tracing::error!(
                        target = "nova.vfs.refresh",
                        dir = %dir,
                        "queued node is not a directory"
                    );
                    return Err(self.abort(dir, RefreshError::NotADirectory(dir)));
                }
                Err(err) => {
                    tracing::warn!(
                        target = "nova.vfs.refresh",
                        dir = %dir,
                        error = %err,
                        "skipping invalidated directory"
                    );
                    self.walk.counters.processed += 1;
                    self.walk.counters.skipped += 1;
                    continue;
                }
            };

            loop {
                if info.all_children_loaded {
                    self.walk.counters.full_scans += 1;
                } else {
                    self.walk.counters.partial_scans += 1;
                }

                self.helper.begin_transaction();
                let result = self.reconciler().reconcile(dir, info);
                match result {
                    Ok(DiffOutcome::Reconciled(followups)) => {
                        self.helper.end_transaction(true);
                        self.apply_followups(followups);
                        self.walk.counters.processed += 1;
                        if self.options.recursive {
                            self.mark_clean(dir);
                        }
                        break;
                    }
                    Ok(DiffOutcome::Drifted) => {
                        self.helper.end_transaction(false);
                        tracing::trace!(target = "nova.vfs.refresh", dir = %dir, "retry");
                    }
                    Err(RefreshError::InvalidNode(node)) => {
                        self.helper.end_transaction(false);
                        tracing::warn!(
                            target = "nova.vfs.refresh",
                            dir = %dir,
                            node = %node,
                            "cached node invalidated during refresh; skipping directory"
                        );
                        self.walk.counters.processed += 1;
                        self.walk.counters.skipped += 1;
                        break;
                    }
                    Err(RefreshError::Io { path, source }) => {
                        self.helper.end_transaction(false);
                        let failures = transient_failures.entry(dir).or_insert(0);
                        *failures += 1;
                        if *failures <= self.options.max_transient_retries {
                            tracing::debug!(
                                target = "nova.vfs.refresh",
                                dir = %dir,
                                path = %path.display(),
                                error = %source,
                                attempt = *failures,
                                "listing failed; re-queuing directory"
                            );
                            self.walk.queue.push_back(dir);
                        } else {
                            tracing::warn!(
                                target = "nova.vfs.refresh",
                                dir = %dir,
                                path = %path.display(),
                                error = %source,
                                "listing keeps failing; leaving directory dirty"
                            );
                            force_mark_dirty(&self.tree, dir);
                            self.walk.counters.processed += 1;
                            self.walk.counters.skipped += 1;
                        }
                        break;
                    }
                    Err(err) => {
                        self.helper.end_transaction(false);
                        return Err(self.abort(dir, err));
                    }
                }
            }
        }
        Ok(())
    }

    fn reconciler(&mut self) -> Reconciler<'_, F, T> {
        Reconciler {
            fs: &self.fs,
            tree: &self.tree,
            options: &self.options,
            helper: &mut self.helper,
            walk: &mut self.walk,
        }
    }

    fn apply_followups(&mut self, followups: Followups) {
        for (dir, target) in followups.queue {
            if let Some(target) = target {
                if !self.walk.visited_targets.insert(target.clone()) {
                    // Its target is scanned through another link already.
                    tracing::trace!(
                        target = "nova.vfs.refresh",
                        dir = %dir,
                        path = %target.display(),
                        "skipping symlink to an already queued directory"
                    );
                    self.mark_clean(dir);
                    continue;
                }
            }
            self.walk.queue.push_back(dir);
        }
        for node in followups.clean {
            self.mark_clean(node);
        }
    }

    fn mark_clean(&self, node: NodeId) {
        if let Err(err) = self.tree.mark_clean(node) {
            tracing::trace!(
                target = "nova.vfs.refresh",
                node = %node,
                error = %err,
                "could not mark node clean"
            );
        }
    }

    /// Leaves `at` and everything still queued dirty. A cancellation has already done so.
    fn abort(&mut self, at: NodeId, err: RefreshError) -> RefreshError {
        if !matches!(err, RefreshError::Cancelled) {
            if err.is_fatal() {
                tracing::error!(target = "nova.vfs.refresh", at = %at, error = %err, "refresh aborted");
            }
            force_mark_dirty(&self.tree, at);
            drain_dirty(&self.tree, &mut self.walk.queue);
        }
        err
    }
}
