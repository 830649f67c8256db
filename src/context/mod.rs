//! Context selection: which existing nodes the agent gets to see.
//!
//! Prompts have a bounded budget for describing the current graph, so
//! each cycle selects a limited, deterministic set of nodes: a recency
//! slice (most recently modified) plus a relevance slice ranked by
//! TF-IDF cosine similarity against the incoming segment, with a
//! keyword-overlap fallback when the TF-IDF path degenerates.

mod stopwords;
mod tfidf;

pub use stopwords::{StopwordSet, ENGLISH_STOPWORDS};
pub use tfidf::TfidfIndex;

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::tree::{DecisionTree, Node, NodeId};

/// Minimum cosine similarity for a node to count as query-relevant.
const RELEVANCE_THRESHOLD: f64 = 0.01;

/// Characters of node content included in the weighted document.
const CONTENT_SNIPPET_LEN: usize = 500;

/// Sentinel shown when the graph has no describable nodes.
pub const NO_NODES_PLACEHOLDER: &str = "No existing nodes";

/// Selects relevant nodes for prompt context.
#[derive(Debug, Clone)]
pub struct ContextSelector {
    stopwords: StopwordSet,
}

impl Default for ContextSelector {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl ContextSelector {
    /// Creates a selector with the given domain stopwords.
    #[must_use]
    pub fn new(domain_stopwords: &[String]) -> Self {
        Self {
            stopwords: StopwordSet::new(domain_stopwords),
        }
    }

    /// Returns up to `limit` node snapshots for the query, in
    /// ascending id order. Deterministic given the same inputs.
    ///
    /// When the whole tree fits within `limit`, every node is
    /// returned. Otherwise roughly 3/8 of the slots go to the most
    /// recently modified nodes and the remainder to query-relevant
    /// ones.
    #[must_use]
    pub fn select(&self, tree: &DecisionTree, limit: usize, query: &str) -> Vec<Node> {
        if limit == 0 {
            return Vec::new();
        }
        if tree.len() <= limit {
            return tree.iter().cloned().collect();
        }

        let mut selected: BTreeSet<NodeId> = BTreeSet::new();

        // Recency quota: 3/8 of the limit.
        let recency_quota = (3 * limit) / 8;
        for id in tree.get_recent_nodes(recency_quota) {
            selected.insert(id);
        }

        // Relevance quota: remaining slots, TF-IDF over the
        // not-yet-selected candidates.
        let remaining = limit.saturating_sub(selected.len());
        if remaining > 0 {
            for id in self.query_relevant(tree, query, remaining, &selected) {
                selected.insert(id);
                if selected.len() >= limit {
                    break;
                }
            }
        }

        selected
            .into_iter()
            .filter_map(|id| tree.get(id).cloned())
            .collect()
    }

    /// Ranks unselected candidates by TF-IDF cosine similarity,
    /// falling back to keyword overlap when the corpus degenerates.
    fn query_relevant(
        &self,
        tree: &DecisionTree,
        query: &str,
        slots: usize,
        already_selected: &BTreeSet<NodeId>,
    ) -> Vec<NodeId> {
        let candidates: Vec<&Node> = tree
            .iter()
            .filter(|n| !already_selected.contains(&n.id))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let documents: Vec<String> = candidates.iter().map(|n| weighted_text(n)).collect();

        if let Some(index) = TfidfIndex::fit(&documents, &self.stopwords) {
            let sims = index.similarities(query, &self.stopwords);
            let mut ranked: Vec<(NodeId, f64)> = candidates
                .iter()
                .zip(sims)
                .filter(|(_, sim)| *sim > RELEVANCE_THRESHOLD)
                .map(|(n, sim)| (n.id, sim))
                .collect();
            ranked.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });
            ranked.truncate(slots);
            return ranked.into_iter().map(|(id, _)| id).collect();
        }

        tracing::warn!("TF-IDF corpus degenerated, falling back to keyword overlap");
        self.keyword_relevant(&candidates, query, slots)
    }

    /// Keyword-overlap fallback: title matches count 3x, summary
    /// matches 1x, normalized by the query token count.
    fn keyword_relevant(&self, candidates: &[&Node], query: &str, slots: usize) -> Vec<NodeId> {
        let query_tokens: BTreeSet<String> =
            self.stopwords.tokenize(query).into_iter().collect();
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(NodeId, f64)> = candidates
            .iter()
            .filter_map(|node| {
                let title_tokens: BTreeSet<String> =
                    self.stopwords.tokenize(&node.title).into_iter().collect();
                let summary_tokens: BTreeSet<String> =
                    self.stopwords.tokenize(&node.summary).into_iter().collect();
                let mut score = 0.0;
                for token in &query_tokens {
                    if title_tokens.contains(token) {
                        score += 3.0;
                    }
                    if summary_tokens.contains(token) {
                        score += 1.0;
                    }
                }
                #[allow(clippy::cast_precision_loss)]
                let score = score / query_tokens.len() as f64;
                (score > 0.0).then_some((node.id, score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(slots);
        scored.into_iter().map(|(id, _)| id).collect()
    }
}

/// Weighted document text for a node: title 3x, summary 2x, first 500
/// chars of content once.
fn weighted_text(node: &Node) -> String {
    let snippet: String = node.content.chars().take(CONTENT_SNIPPET_LEN).collect();
    format!(
        "{title} {title} {title} {summary} {summary} {snippet}",
        title = node.title,
        summary = node.summary,
    )
}

/// Renders the selected nodes as the "existing nodes" block passed to
/// the agent: one line per node with title, summary, parent reference,
/// and a recency marker, most recently created first.
#[must_use]
pub fn render_context_block(nodes: &[Node], tree: &DecisionTree) -> String {
    if nodes.is_empty() {
        return NO_NODES_PLACEHOLDER.to_string();
    }

    let mut ordered: Vec<&Node> = nodes.iter().collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let mut block = String::new();
    for node in ordered {
        let _ = write!(block, "- {}: {}", node.title, node.summary);
        match node.parent_id.and_then(|p| tree.get(p)) {
            Some(parent) => {
                let _ = write!(block, " (child of {})", parent.title);
            }
            None => block.push_str(" (child of NO_RELEVANT_NODE)"),
        }
        if node.recently_updated() {
            block.push_str(" [recently updated]");
        }
        block.push('\n');
    }
    block.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ROOT_ID;

    fn build_tree(titles: &[(&str, &str)]) -> DecisionTree {
        let mut tree = DecisionTree::new();
        for (title, summary) in titles {
            tree.create_node(title, ROOT_ID, "content body", summary, "child of")
                .unwrap();
        }
        tree
    }

    #[test]
    fn test_small_tree_returns_all() {
        let tree = build_tree(&[("A", "a"), ("B", "b")]);
        let selector = ContextSelector::default();
        let nodes = selector.select(&tree, 10, "anything");
        assert_eq!(nodes.len(), 3);
        // Ascending id order.
        let ids: Vec<_> = nodes.iter().map(|n| n.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_limit_zero() {
        let tree = build_tree(&[("A", "a")]);
        let selector = ContextSelector::default();
        assert!(selector.select(&tree, 0, "q").is_empty());
    }

    #[test]
    fn test_selection_bounded_and_distinct() {
        let titles: Vec<(String, String)> = (0..20)
            .map(|i| (format!("Topic {i}"), format!("summary {i}")))
            .collect();
        let pairs: Vec<(&str, &str)> = titles
            .iter()
            .map(|(t, s)| (t.as_str(), s.as_str()))
            .collect();
        let tree = build_tree(&pairs);
        let selector = ContextSelector::default();
        let nodes = selector.select(&tree, 8, "Topic 3");
        assert!(nodes.len() <= 8);
        let ids: BTreeSet<_> = nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids.len(), nodes.len());
    }

    #[test]
    fn test_query_relevant_nodes_included() {
        let mut tree = DecisionTree::new();
        for i in 0..12 {
            tree.create_node(&format!("Filler {i}"), ROOT_ID, "", "filler noise", "child of")
                .unwrap();
        }
        let target = tree
            .create_node(
                "Entity Recognition",
                ROOT_ID,
                "named entity recognition details",
                "Extracting entities from text",
                "child of",
            )
            .unwrap();
        // Push the target out of the recency window.
        for i in 0..6 {
            let id = tree.resolve_name_to_id(&format!("Filler {i}"));
            tree.append_content(id, "more", "filler noise", "").unwrap();
        }

        let selector = ContextSelector::default();
        let nodes = selector.select(&tree, 6, "entity recognition in the pipeline");
        assert!(nodes.iter().any(|n| n.id == target));
    }

    #[test]
    fn test_deterministic_selection() {
        let titles: Vec<(String, String)> = (0..15)
            .map(|i| (format!("Node {i}"), format!("text {i}")))
            .collect();
        let pairs: Vec<(&str, &str)> = titles
            .iter()
            .map(|(t, s)| (t.as_str(), s.as_str()))
            .collect();
        let tree = build_tree(&pairs);
        let selector = ContextSelector::default();
        let a: Vec<_> = selector.select(&tree, 6, "Node 7").iter().map(|n| n.id).collect();
        let b: Vec<_> = selector.select(&tree, 6, "Node 7").iter().map(|n| n.id).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_keyword_fallback() {
        let tree = build_tree(&[
            ("Project Planning", "scope and stakeholders"),
            ("Investor Outreach", "raising money"),
        ]);
        let selector = ContextSelector::default();
        let candidates: Vec<&Node> = tree.iter().collect();
        let hits = selector.keyword_relevant(&candidates, "planning the scope", 2);
        assert!(!hits.is_empty());
        assert_eq!(hits[0], tree.resolve_name_to_id("Project Planning"));
    }

    #[test]
    fn test_render_context_block() {
        let tree = build_tree(&[("Project Planning", "Scope and stakeholders")]);
        let nodes: Vec<Node> = tree.iter().cloned().collect();
        let block = render_context_block(&nodes, &tree);
        assert!(block.contains("- Project Planning: Scope and stakeholders"));
        assert!(block.contains("(child of"));
        assert!(block.contains("NO_RELEVANT_NODE"));
    }

    #[test]
    fn test_render_context_block_empty() {
        let tree = DecisionTree::new();
        assert_eq!(render_context_block(&[], &tree), NO_NODES_PLACEHOLDER);
    }

    #[test]
    fn test_render_marks_recent_updates() {
        let mut tree = build_tree(&[("A", "a")]);
        let id = tree.resolve_name_to_id("A");
        tree.append_content(id, "more", "a", "").unwrap();
        let nodes: Vec<Node> = tree.iter().cloned().collect();
        let block = render_context_block(&nodes, &tree);
        // Appended node may carry the marker only if clocks advanced;
        // the render itself must never fail either way.
        assert!(block.contains("- A: a"));
    }

    #[test]
    fn test_weighted_text_repeats_title() {
        let node = Node::new(1, "Planning", "body text", "summary", Some(0));
        let text = weighted_text(&node);
        assert_eq!(text.matches("Planning").count(), 3);
        assert_eq!(text.matches("summary").count(), 2);
        assert_eq!(text.matches("body text").count(), 1);
    }
}
