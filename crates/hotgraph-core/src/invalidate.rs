//! Invalidation engine.
//!
//! Clears cached artifacts on a node and walks its importers upward. The
//! walk stops at HMR boundaries: an importer that accepts the changed node is
//! invalidated itself but its own importers are left alone.

use crate::error::Result;
use crate::graph::{GraphInner, ModuleGraph};
use crate::node::NodeId;
use std::collections::HashSet;
use tracing::{debug, trace};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Invalidate `root` and walk upward. Returns every node touched, in visit
/// order.
///
/// `seen` holds nodes that were fully processed. An accepting importer is
/// only touched as a boundary and recorded in `boundaries_touched`; a later
/// path that reaches it without acceptance still propagates through it, but
/// does not touch it a second time. Sharing both sets across calls makes a
/// batch touch each node at most once.
pub(crate) fn invalidate_in(
    inner: &mut GraphInner,
    root: NodeId,
    seen: &mut HashSet<NodeId>,
    boundaries_touched: &mut HashSet<NodeId>,
    timestamp: u64,
    is_hmr: bool,
    hmr_boundaries: &[NodeId],
) -> Vec<NodeId> {
    let mut touched = Vec::new();
    let mut stack = vec![(root, false)];

    while let Some((id, accepted_by_importer)) = stack.pop() {
        if seen.contains(&id) {
            continue;
        }
        let already_touched = if accepted_by_importer {
            if !boundaries_touched.insert(id) {
                continue;
            }
            false
        } else {
            seen.insert(id);
            boundaries_touched.contains(&id)
        };

        let Some(node) = inner.nodes.get_mut(id.0) else {
            continue;
        };
        if !already_touched {
            node.bump_timestamp(timestamp, is_hmr);
            let etag = node.clear_artifacts();
            trace!(url = %node.url, is_hmr, "Invalidated module");
            if let Some(etag) = etag {
                if inner.etag_to_module.get(&etag) == Some(&id) {
                    inner.etag_to_module.remove(&etag);
                }
            }
            touched.push(id);
        }

        if accepted_by_importer || hmr_boundaries.contains(&id) {
            continue;
        }

        let mut importers: Vec<NodeId> = inner.nodes[id.0].importers.iter().copied().collect();
        importers.sort_unstable_by(|a, b| b.cmp(a));
        for importer in importers {
            let accepts = inner
                .nodes
                .get(importer.0)
                .is_some_and(|n| n.accepted_hmr_deps.contains(&id));
            stack.push((importer, accepts));
        }
    }

    touched
}

impl ModuleGraph {
    /// Clear a node's cached artifacts and propagate to importers that do not
    /// accept it.
    ///
    /// `is_hmr` picks which clock is bumped: a source edit moves the HMR
    /// clock, a forced cache bust moves the invalidation clock. Nodes listed
    /// in `hmr_boundaries` are invalidated but not propagated past. Resolved
    /// import/export bookkeeping is never touched.
    pub fn invalidate_module(
        &self,
        id: NodeId,
        seen: &mut HashSet<NodeId>,
        timestamp: u64,
        is_hmr: bool,
        hmr_boundaries: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        let mut inner = self.write();
        inner.node(id)?;
        Ok(invalidate_in(
            &mut inner,
            id,
            seen,
            &mut HashSet::new(),
            timestamp,
            is_hmr,
            hmr_boundaries,
        ))
    }

    /// Invalidate every node under one timestamp. Returns the nodes touched;
    /// each appears exactly once.
    pub fn invalidate_all(&self) -> Vec<NodeId> {
        let timestamp = now_ms();
        let mut inner = self.write();
        let mut seen = HashSet::new();
        let mut boundaries = HashSet::new();
        let mut touched = Vec::with_capacity(inner.nodes.len());
        for index in 0..inner.nodes.len() {
            touched.extend(invalidate_in(
                &mut inner,
                NodeId(index),
                &mut seen,
                &mut boundaries,
                timestamp,
                false,
                &[],
            ));
        }
        debug!(modules = touched.len(), "Invalidated all modules");
        touched
    }

    /// Invalidate every node backed by `file`, each walking its own importer
    /// chain. Returns the nodes touched.
    pub fn on_file_change(&self, file: &str) -> Vec<NodeId> {
        let timestamp = now_ms();
        let mut inner = self.write();
        let mut touched = Vec::new();
        for id in inner.modules_by_file(file) {
            let mut seen = HashSet::new();
            let mut boundaries = HashSet::new();
            let walked = invalidate_in(
                &mut inner,
                id,
                &mut seen,
                &mut boundaries,
                timestamp,
                false,
                &[],
            );
            for node in walked {
                if !touched.contains(&node) {
                    touched.push(node);
                }
            }
        }
        debug!(file = %file, modules = touched.len(), "File changed");
        touched
    }

    /// Invalidate several files as one batch sharing a single `seen` set.
    /// Every node touched by the batch is returned once.
    pub fn on_files_change<I, S>(&self, files: I) -> Vec<NodeId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let timestamp = now_ms();
        let mut inner = self.write();
        let mut seen = HashSet::new();
        let mut boundaries = HashSet::new();
        let mut touched = Vec::new();
        for file in files {
            for id in inner.modules_by_file(file.as_ref()) {
                touched.extend(invalidate_in(
                    &mut inner,
                    id,
                    &mut seen,
                    &mut boundaries,
                    timestamp,
                    false,
                    &[],
                ));
            }
        }
        debug!(modules = touched.len(), "Files changed");
        touched
    }
}
