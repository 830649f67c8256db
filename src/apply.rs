//! Applies agent decisions to the decision tree.
//!
//! The applier is the only component that turns CREATE/APPEND
//! decisions into tree mutations. Concept names are resolved to node
//! ids with fuzzy matching; the ids touched by a batch land in the
//! shared dirty set drained by the Markdown projector. A failure
//! applying one decision never prevents applying the rest.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::agent::{DecisionAction, IntegrationDecision};
use crate::tree::{DecisionTree, NodeId, ROOT_ID};

/// A request to rewrite one node in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteRequest {
    /// The node to rewrite.
    pub node_id: NodeId,
}

/// Shared set of node ids whose Markdown files need re-projection.
///
/// Cloned handles share the same underlying set; the applier and the
/// background rewriter insert, the processor drains.
#[derive(Debug, Clone, Default)]
pub struct DirtySet {
    inner: Arc<Mutex<BTreeSet<NodeId>>>,
}

impl DirtySet {
    /// Creates an empty dirty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a node id dirty.
    pub fn insert(&self, id: NodeId) {
        self.guard().insert(id);
    }

    /// Removes and returns all dirty ids.
    #[must_use]
    pub fn drain(&self) -> BTreeSet<NodeId> {
        std::mem::take(&mut *self.guard())
    }

    /// Re-inserts ids whose projection failed, for retry next cycle.
    pub fn extend(&self, ids: impl IntoIterator<Item = NodeId>) {
        self.guard().extend(ids);
    }

    /// Returns a snapshot of the dirty ids without draining.
    #[must_use]
    pub fn snapshot(&self) -> BTreeSet<NodeId> {
        self.guard().clone()
    }

    /// Number of dirty ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Returns `true` when no ids are dirty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, BTreeSet<NodeId>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Outcome counters for one applied batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Nodes created.
    pub created: usize,
    /// Nodes appended to.
    pub appended: usize,
    /// Decisions skipped (missing data or resolution failure).
    pub skipped: usize,
}

/// Translates agent decisions into tree mutations.
#[derive(Debug)]
pub struct MutationApplier {
    dirty: DirtySet,
    first_cycle: bool,
    rewrite_every: u32,
    rewrite_tx: Option<mpsc::Sender<RewriteRequest>>,
}

impl MutationApplier {
    /// Creates an applier.
    ///
    /// `rewrite_tx` is the channel to the background rewriter; `None`
    /// disables rewrite notifications. `rewrite_every` is the append
    /// count between rewrites of a node.
    #[must_use]
    pub const fn new(
        dirty: DirtySet,
        rewrite_every: u32,
        rewrite_tx: Option<mpsc::Sender<RewriteRequest>>,
    ) -> Self {
        Self {
            dirty,
            first_cycle: true,
            rewrite_every,
            rewrite_tx,
        }
    }

    /// Handle to the shared dirty set.
    #[must_use]
    pub fn dirty(&self) -> DirtySet {
        self.dirty.clone()
    }

    /// Drops the rewrite channel so the background rewriter can drain
    /// and stop. Called during shutdown.
    pub fn disable_rewrites(&mut self) {
        self.rewrite_tx = None;
    }

    /// Applies a batch of decisions to the tree.
    ///
    /// On the first cycle the root id is marked dirty so the root's
    /// Markdown file exists. Per-decision failures are logged and do
    /// not abort the batch.
    pub fn apply(
        &mut self,
        tree: &mut DecisionTree,
        decisions: &[IntegrationDecision],
        transcript_excerpt: &str,
    ) -> ApplyStats {
        if self.first_cycle {
            self.dirty.insert(ROOT_ID);
            self.first_cycle = false;
        }

        let mut stats = ApplyStats::default();
        for decision in decisions {
            match decision.action {
                DecisionAction::Create => {
                    if self.apply_create(tree, decision) {
                        stats.created += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }
                DecisionAction::Append => {
                    if self.apply_append(tree, decision, transcript_excerpt) {
                        stats.appended += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }
            }
        }
        stats
    }

    /// Applies one CREATE decision. Returns `true` on success.
    fn apply_create(&self, tree: &mut DecisionTree, decision: &IntegrationDecision) -> bool {
        let Some(title) = decision.new_node_name.as_deref().filter(|t| !t.trim().is_empty())
        else {
            tracing::error!(chunk = %decision.name, "CREATE decision without a node name, skipping");
            return false;
        };

        let parent_id = if decision.targets_root() {
            ROOT_ID
        } else {
            tree.resolve_name_to_id(&decision.target_node)
        };

        let summary = decision.new_node_summary.as_deref().unwrap_or_default();
        let relationship = decision.relationship.as_deref().unwrap_or("child of");

        match tree.create_node(title, parent_id, &decision.content, summary, relationship) {
            Ok(id) => {
                self.dirty.insert(id);
                self.dirty.insert(parent_id);
                true
            }
            Err(e) => {
                tracing::error!(title, error = %e, "failed to create node");
                false
            }
        }
    }

    /// Applies one APPEND decision. Returns `true` on success.
    fn apply_append(
        &self,
        tree: &mut DecisionTree,
        decision: &IntegrationDecision,
        transcript_excerpt: &str,
    ) -> bool {
        let node_id = if decision.targets_root() {
            ROOT_ID
        } else {
            tree.resolve_name_to_id(&decision.target_node)
        };
        if tree.get(node_id).is_none() {
            tracing::error!(
                target = %decision.target_node,
                node_id,
                "APPEND target missing after resolution, skipping"
            );
            return false;
        }

        let summary = decision.updated_summary.as_deref().unwrap_or_default();
        match tree.append_content(node_id, &decision.content, summary, transcript_excerpt) {
            Ok(num_appends) => {
                self.dirty.insert(node_id);
                self.notify_rewriter(node_id, num_appends);
                true
            }
            Err(e) => {
                tracing::error!(node_id, error = %e, "failed to append to node");
                false
            }
        }
    }

    /// Fire-and-forget rewrite notification after every N-th append.
    fn notify_rewriter(&self, node_id: NodeId, num_appends: u32) {
        if self.rewrite_every == 0 || num_appends == 0 || num_appends % self.rewrite_every != 0 {
            return;
        }
        if let Some(tx) = &self.rewrite_tx {
            match tx.try_send(RewriteRequest { node_id }) {
                Ok(()) => tracing::debug!(node_id, num_appends, "queued background rewrite"),
                Err(e) => tracing::debug!(node_id, error = %e, "rewrite queue full, dropping request"),
            }
        }
    }
}
