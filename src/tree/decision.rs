//! The decision tree: authoritative in-memory graph state.
//!
//! All mutation flows through the methods here; readers operate on
//! cloned snapshots. The tree starts with a single dated root node and
//! assigns ids monotonically.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::TreeError;
use crate::tree::node::{Node, NodeId, Relationship, ROOT_ID};

/// Fuzzy name-resolution cutoff. Titles scoring below this ratio do
/// not match and resolution falls back to the root.
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

/// A neighbor entry returned by [`DecisionTree::get_neighbors`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    /// Neighbor node id.
    pub id: NodeId,
    /// Neighbor title.
    pub name: String,
    /// Neighbor summary.
    pub summary: String,
    /// Relationship label between the two nodes.
    pub relationship: Relationship,
}

/// Rooted tree of concept nodes with monotonically assigned ids.
///
/// # Examples
///
/// ```
/// use voicetree::tree::DecisionTree;
///
/// let mut tree = DecisionTree::new();
/// let id = tree
///     .create_node("Project Planning", 0, "- define scope", "Scope definition", "child of")
///     .unwrap();
/// assert_eq!(tree.get_parent_id(id), Some(0));
/// ```
#[derive(Debug, Clone)]
pub struct DecisionTree {
    nodes: BTreeMap<NodeId, Node>,
    next_id: NodeId,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTree {
    /// Creates a tree containing only the dated root node.
    #[must_use]
    pub fn new() -> Self {
        let date = Utc::now().format("%A %d %B");
        let mut root = Node::new(
            ROOT_ID,
            format!("{date}, Root"),
            format!("#### {date}, Root\n\n**The root node for today. Add unrelated content here.**\n"),
            "The default root node for today's work.",
            None,
        );
        // Stable filename regardless of the date in the title.
        root.filename = "0_root.md".to_string();

        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_ID, root);
        Self { nodes, next_id: 1 }
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the tree holds only the root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Returns a node by id.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Iterates nodes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Creates a new node under `parent_id`.
    ///
    /// Establishes the parent/child relationship on both sides and
    /// records the relationship label on the new node.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidParent`] when the parent does not
    /// exist. This is an invariant violation, not a recoverable miss:
    /// callers resolve names to ids before creating.
    pub fn create_node(
        &mut self,
        title: &str,
        parent_id: NodeId,
        content: &str,
        summary: &str,
        relationship_to_parent: &str,
    ) -> Result<NodeId, TreeError> {
        if !self.nodes.contains_key(&parent_id) {
            return Err(TreeError::InvalidParent { parent_id });
        }

        let id = self.next_id;
        self.next_id += 1;

        let mut node = Node::new(id, title, content, summary, Some(parent_id));
        node.relationships
            .insert(parent_id, Relationship::parse(relationship_to_parent));
        self.nodes.insert(id, node);

        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            parent.children.insert(id);
        }

        tracing::info!(id, parent_id, title, "created node");
        Ok(id)
    }

    /// Appends content to a node, replacing its summary and recording
    /// the transcript excerpt. Returns the node's append count.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NodeNotFound`] when the node is missing.
    pub fn append_content(
        &mut self,
        id: NodeId,
        new_content: &str,
        new_summary: &str,
        transcript_excerpt: &str,
    ) -> Result<u32, TreeError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(TreeError::NodeNotFound { id })?;
        node.append_content(new_content, new_summary, transcript_excerpt);
        Ok(node.num_appends)
    }

    /// Replaces a node's content and summary wholesale, preserving
    /// title, structure, and id.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NodeNotFound`] when the node is missing.
    pub fn update_node(
        &mut self,
        id: NodeId,
        new_content: &str,
        new_summary: &str,
    ) -> Result<(), TreeError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(TreeError::NodeNotFound { id })?;
        node.replace_content(new_content, new_summary);
        Ok(())
    }

    /// Moves a node under a new parent, updating child sets and the
    /// relationship label on the moved node.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::RootImmutable`] for the root,
    /// [`TreeError::NodeNotFound`]/[`TreeError::InvalidParent`] for
    /// missing endpoints, and [`TreeError::CycleDetected`] when the new
    /// parent is the node itself or one of its descendants.
    pub fn reparent(&mut self, id: NodeId, new_parent_id: NodeId) -> Result<(), TreeError> {
        if id == ROOT_ID {
            return Err(TreeError::RootImmutable);
        }
        if !self.nodes.contains_key(&id) {
            return Err(TreeError::NodeNotFound { id });
        }
        if !self.nodes.contains_key(&new_parent_id) {
            return Err(TreeError::InvalidParent {
                parent_id: new_parent_id,
            });
        }

        // Walk from the proposed parent toward the root; meeting the
        // moving node means the move would create a cycle.
        let mut cursor = Some(new_parent_id);
        while let Some(current) = cursor {
            if current == id {
                return Err(TreeError::CycleDetected {
                    id,
                    new_parent_id,
                });
            }
            cursor = self.nodes.get(&current).and_then(|n| n.parent_id);
        }

        let old_parent = self.nodes.get(&id).and_then(|n| n.parent_id);
        if let Some(old_parent_id) = old_parent {
            if old_parent_id == new_parent_id {
                return Ok(());
            }
            if let Some(parent) = self.nodes.get_mut(&old_parent_id) {
                parent.children.remove(&id);
            }
        }
        if let Some(parent) = self.nodes.get_mut(&new_parent_id) {
            parent.children.insert(id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            let label = old_parent
                .and_then(|p| node.relationships.remove(&p))
                .unwrap_or_default();
            node.parent_id = Some(new_parent_id);
            node.relationships.insert(new_parent_id, label);
            node.touch();
        }

        tracing::info!(id, new_parent_id, "reparented node");
        Ok(())
    }

    /// Returns up to `n` node ids sorted by `modified_at` descending.
    /// Ties break toward the higher id so ordering is deterministic.
    #[must_use]
    pub fn get_recent_nodes(&self, n: usize) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_by(|a, b| {
            let ta = self.nodes[a].modified_at;
            let tb = self.nodes[b].modified_at;
            tb.cmp(&ta).then(b.cmp(a))
        });
        ids.truncate(n);
        ids
    }

    /// Returns the parent id of a node, or `None` for the root or a
    /// missing id.
    #[must_use]
    pub fn get_parent_id(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent_id)
    }

    /// Returns the parent (first, if any) and children (in id order)
    /// of a node with their relationship labels.
    #[must_use]
    pub fn get_neighbors(&self, id: NodeId) -> Vec<Neighbor> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };

        let mut neighbors = Vec::new();
        if let Some(parent_id) = node.parent_id
            && let Some(parent) = self.nodes.get(&parent_id)
        {
            neighbors.push(Neighbor {
                id: parent_id,
                name: parent.title.clone(),
                summary: parent.summary.clone(),
                relationship: node
                    .relationships
                    .get(&parent_id)
                    .cloned()
                    .unwrap_or_default(),
            });
        }
        for &child_id in &node.children {
            if let Some(child) = self.nodes.get(&child_id) {
                neighbors.push(Neighbor {
                    id: child_id,
                    name: child.title.clone(),
                    summary: child.summary.clone(),
                    relationship: child
                        .relationships
                        .get(&id)
                        .cloned()
                        .unwrap_or_default(),
                });
            }
        }
        neighbors
    }

    /// Resolves a node name to an id.
    ///
    /// Exact title match wins (case-insensitive); otherwise the closest
    /// title by normalized edit distance at or above
    /// [`SIMILARITY_THRESHOLD`]. Falls back to the root id with a
    /// warning when nothing is close enough.
    #[must_use]
    pub fn resolve_name_to_id(&self, name: &str) -> NodeId {
        let needle = name.trim().to_lowercase();

        for node in self.nodes.values() {
            if node.title.to_lowercase() == needle {
                return node.id;
            }
        }

        let mut best: Option<(NodeId, f64)> = None;
        for node in self.nodes.values() {
            let ratio = strsim::normalized_levenshtein(&needle, &node.title.to_lowercase());
            if ratio >= SIMILARITY_THRESHOLD
                && best.is_none_or(|(_, best_ratio)| ratio > best_ratio)
            {
                best = Some((node.id, ratio));
            }
        }

        if let Some((id, ratio)) = best {
            tracing::info!(name, id, ratio, "fuzzy-matched node name");
            return id;
        }

        tracing::warn!(name, "no close match for node name, defaulting to root");
        ROOT_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_planning() -> (DecisionTree, NodeId) {
        let mut tree = DecisionTree::new();
        let id = tree
            .create_node(
                "Project Planning",
                ROOT_ID,
                "- define scope\n- identify stakeholders",
                "Project scope and stakeholder identification",
                "child of",
            )
            .unwrap();
        (tree, id)
    }

    #[test]
    fn test_new_tree_has_dated_root() {
        let tree = DecisionTree::new();
        assert_eq!(tree.len(), 1);
        let root = tree.get(ROOT_ID).unwrap();
        assert!(root.parent_id.is_none());
        assert!(root.title.contains("Root"));
        assert!(root.content.contains("unrelated content"));
        assert_eq!(root.filename, "0_root.md");
    }

    #[test]
    fn test_create_node_links_both_sides() {
        let (tree, id) = tree_with_planning();
        let node = tree.get(id).unwrap();
        assert_eq!(node.parent_id, Some(ROOT_ID));
        assert!(tree.get(ROOT_ID).unwrap().children.contains(&id));
        assert_eq!(
            node.relationships.get(&ROOT_ID),
            Some(&Relationship::ChildOf)
        );
    }

    #[test]
    fn test_create_node_invalid_parent() {
        let mut tree = DecisionTree::new();
        let result = tree.create_node("X", 99, "", "", "child of");
        assert!(matches!(result, Err(TreeError::InvalidParent { parent_id: 99 })));
    }

    #[test]
    fn test_ids_monotonic_and_unique() {
        let mut tree = DecisionTree::new();
        let a = tree.create_node("A", ROOT_ID, "", "", "child of").unwrap();
        let b = tree.create_node("B", ROOT_ID, "", "", "child of").unwrap();
        let c = tree.create_node("C", a, "", "", "child of").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_parent_child_symmetry() {
        let mut tree = DecisionTree::new();
        let a = tree.create_node("A", ROOT_ID, "", "", "child of").unwrap();
        let b = tree.create_node("B", a, "", "", "prereq for").unwrap();
        for node in tree.iter() {
            if let Some(parent_id) = node.parent_id {
                assert!(tree.get(parent_id).unwrap().children.contains(&node.id));
            } else {
                assert_eq!(node.id, ROOT_ID);
            }
            for &child in &node.children {
                assert_eq!(tree.get(child).unwrap().parent_id, Some(node.id));
            }
        }
        assert_eq!(tree.get_parent_id(b), Some(a));
    }

    #[test]
    fn test_append_content_updates_counter() {
        let (mut tree, id) = tree_with_planning();
        let count = tree
            .append_content(id, "- reach out to investors", "Adds investor outreach", "raw")
            .unwrap();
        assert_eq!(count, 1);
        let node = tree.get(id).unwrap();
        assert!(node.content.contains("investors"));
        assert!(node.modified_at >= node.created_at);
    }

    #[test]
    fn test_append_missing_node() {
        let mut tree = DecisionTree::new();
        assert!(matches!(
            tree.append_content(42, "", "", ""),
            Err(TreeError::NodeNotFound { id: 42 })
        ));
    }

    #[test]
    fn test_update_node() {
        let (mut tree, id) = tree_with_planning();
        tree.update_node(id, "clean content", "clean summary").unwrap();
        let node = tree.get(id).unwrap();
        assert_eq!(node.content, "clean content");
        assert_eq!(node.summary, "clean summary");
        assert_eq!(node.title, "Project Planning");
        assert!(matches!(
            tree.update_node(999, "", ""),
            Err(TreeError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn test_get_recent_nodes() {
        let mut tree = DecisionTree::new();
        let a = tree.create_node("A", ROOT_ID, "", "", "child of").unwrap();
        let b = tree.create_node("B", ROOT_ID, "", "", "child of").unwrap();
        tree.append_content(a, "newer", "s", "").unwrap();
        let recent = tree.get_recent_nodes(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0], a);
        assert!(recent.contains(&b) || recent.contains(&ROOT_ID));
    }

    #[test]
    fn test_get_neighbors_parent_first_children_in_order() {
        let mut tree = DecisionTree::new();
        let mid = tree.create_node("Mid", ROOT_ID, "", "", "child of").unwrap();
        let c2 = tree.create_node("C2", mid, "", "", "child of").unwrap();
        let c1 = tree.create_node("C1", mid, "", "", "prereq for").unwrap();
        let neighbors = tree.get_neighbors(mid);
        assert_eq!(neighbors.len(), 3);
        assert_eq!(neighbors[0].id, ROOT_ID);
        assert_eq!(neighbors[1].id, c2.min(c1));
        assert_eq!(neighbors[2].id, c2.max(c1));
        assert_eq!(neighbors[2].relationship, Relationship::PrereqFor);
    }

    #[test]
    fn test_resolve_exact_match() {
        let (tree, id) = tree_with_planning();
        assert_eq!(tree.resolve_name_to_id("Project Planning"), id);
        assert_eq!(tree.resolve_name_to_id("project planning"), id);
    }

    #[test]
    fn test_resolve_fuzzy_match() {
        let (tree, id) = tree_with_planning();
        // Typo still resolves (ratio >= 0.6).
        assert_eq!(tree.resolve_name_to_id("Project Plannng"), id);
    }

    #[test]
    fn test_resolve_falls_back_to_root() {
        let (tree, _) = tree_with_planning();
        assert_eq!(tree.resolve_name_to_id("completely unrelated concept"), ROOT_ID);
    }

    #[test]
    fn test_resolve_unique_titles_roundtrip() {
        let mut tree = DecisionTree::new();
        let titles = ["Entity Recognition", "Sentiment Analysis", "Transformer Models"];
        let ids: Vec<NodeId> = titles
            .iter()
            .map(|t| tree.create_node(t, ROOT_ID, "", "", "child of").unwrap())
            .collect();
        for (title, id) in titles.iter().zip(&ids) {
            assert_eq!(tree.resolve_name_to_id(title), *id);
        }
    }

    #[test]
    fn test_reparent() {
        let mut tree = DecisionTree::new();
        let a = tree.create_node("A", ROOT_ID, "", "", "child of").unwrap();
        let b = tree.create_node("B", ROOT_ID, "", "", "child of").unwrap();
        tree.reparent(b, a).unwrap();
        assert_eq!(tree.get_parent_id(b), Some(a));
        assert!(tree.get(a).unwrap().children.contains(&b));
        assert!(!tree.get(ROOT_ID).unwrap().children.contains(&b));
    }

    #[test]
    fn test_reparent_rejects_cycle() {
        let mut tree = DecisionTree::new();
        let a = tree.create_node("A", ROOT_ID, "", "", "child of").unwrap();
        let b = tree.create_node("B", a, "", "", "child of").unwrap();
        let c = tree.create_node("C", b, "", "", "child of").unwrap();
        // Moving A under its grandchild C would create a cycle.
        assert!(matches!(
            tree.reparent(a, c),
            Err(TreeError::CycleDetected { .. })
        ));
        // Self-parenting is also a cycle.
        assert!(matches!(
            tree.reparent(a, a),
            Err(TreeError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_reparent_root_rejected() {
        let mut tree = DecisionTree::new();
        let a = tree.create_node("A", ROOT_ID, "", "", "child of").unwrap();
        assert!(matches!(
            tree.reparent(ROOT_ID, a),
            Err(TreeError::RootImmutable)
        ));
    }

    #[test]
    fn test_reparent_same_parent_noop() {
        let mut tree = DecisionTree::new();
        let a = tree.create_node("A", ROOT_ID, "", "", "child of").unwrap();
        tree.reparent(a, ROOT_ID).unwrap();
        assert_eq!(tree.get_parent_id(a), Some(ROOT_ID));
    }

    #[test]
    fn test_root_invariant() {
        let mut tree = DecisionTree::new();
        tree.create_node("A", ROOT_ID, "", "", "child of").unwrap();
        let roots: Vec<_> = tree.iter().filter(|n| n.parent_id.is_none()).collect();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, ROOT_ID);
    }

    #[test]
    fn test_relationship_entry_for_parent() {
        let mut tree = DecisionTree::new();
        let a = tree.create_node("A", ROOT_ID, "", "", "blocked by").unwrap();
        let node = tree.get(a).unwrap();
        assert!(node.relationships.contains_key(&ROOT_ID));
    }
}
