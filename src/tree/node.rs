//! Node record for the decision tree.
//!
//! Nodes carry full Markdown content plus a dense summary used as
//! prompt context. Relationship labels live on the node's
//! `relationships` map, keyed by neighbor id.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Node identifier. Monotonically assigned; never reused.
pub type NodeId = u64;

/// The root node id, created at process start.
pub const ROOT_ID: NodeId = 0;

/// Upper bound on summary length in characters.
pub const MAX_SUMMARY_LEN: usize = 300;

/// Maximum slug length in a derived filename.
const MAX_SLUG_LEN: usize = 64;

#[allow(clippy::unwrap_used)]
static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Relationship label between a node and a neighbor.
///
/// A small set of common labels plus a free-form fallback; serialized
/// as the plain label string either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Relationship {
    /// Default parent/child containment.
    ChildOf,
    /// The neighbor depends on this node being done first.
    PrereqFor,
    /// This node blocks the neighbor.
    Blocks,
    /// This node elaborates on the neighbor.
    Elaborates,
    /// Generic topical relation.
    RelatesTo,
    /// Any other short verb phrase returned by the agent.
    Other(String),
}

impl Relationship {
    /// Parses a label string, mapping known phrases to their variants.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "" | "child of" => Self::ChildOf,
            "prereq for" | "prerequisite for" => Self::PrereqFor,
            "blocks" | "blocked by" => Self::Blocks,
            "elaborates" | "elaborates on" => Self::Elaborates,
            "relates to" | "related to" => Self::RelatesTo,
            _ => Self::Other(label.trim().to_string()),
        }
    }

    /// Returns the label as a display string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ChildOf => "child of",
            Self::PrereqFor => "prereq for",
            Self::Blocks => "blocks",
            Self::Elaborates => "elaborates",
            Self::RelatesTo => "relates to",
            Self::Other(label) => label,
        }
    }
}

impl Default for Relationship {
    fn default() -> Self {
        Self::ChildOf
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Relationship {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Relationship> for String {
    fn from(r: Relationship) -> Self {
        r.as_str().to_string()
    }
}

/// Subtree metadata written back by visualization tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtreeInfo {
    /// Subtree identifier.
    pub id: String,
    /// Short theme description.
    pub theme: String,
}

/// A single concept node in the decision tree.
///
/// Owned exclusively by the [`DecisionTree`](super::DecisionTree);
/// other components see clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Monotonically assigned id (0 is the root).
    pub id: NodeId,
    /// Short human-readable label.
    pub title: String,
    /// Full Markdown body. Grows by append or whole replacement.
    pub content: String,
    /// Dense summary (≤ 3 sentences), used as prompt context and as
    /// the node's subtitle.
    pub summary: String,
    /// Parent id; `None` only for the root.
    pub parent_id: Option<NodeId>,
    /// Ids of child nodes.
    pub children: BTreeSet<NodeId>,
    /// Relationship labels keyed by neighbor id. Always has an entry
    /// for `parent_id` when it is set.
    pub relationships: BTreeMap<NodeId, Relationship>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-modification timestamp. Never before `created_at`.
    pub modified_at: DateTime<Utc>,
    /// Derived Markdown filename (`<id>_<slug>.md`).
    pub filename: String,
    /// Optional tags.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Optional display color for visualization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Optional subtree metadata for visualization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtree: Option<SubtreeInfo>,
    /// Appends applied since creation or the last rewrite.
    #[serde(default)]
    pub num_appends: u32,
    /// Transcript excerpts accumulated for the background rewriter.
    #[serde(default)]
    pub transcript_history: String,
}

impl Node {
    /// Creates a new node. Timestamps are set to now; the filename is
    /// derived from the id and title.
    #[must_use]
    pub fn new(
        id: NodeId,
        title: impl Into<String>,
        content: impl Into<String>,
        summary: impl Into<String>,
        parent_id: Option<NodeId>,
    ) -> Self {
        let title = title.into();
        let now = Utc::now();
        Self {
            filename: derive_filename(id, &title),
            id,
            content: content.into(),
            summary: clamp_summary(&summary.into()),
            parent_id,
            children: BTreeSet::new(),
            relationships: BTreeMap::new(),
            created_at: now,
            modified_at: now,
            title,
            tags: BTreeSet::new(),
            color: None,
            subtree: None,
            num_appends: 0,
            transcript_history: String::new(),
        }
    }

    /// Appends content, replaces the summary, and records a transcript
    /// excerpt for the rewriter. The title never changes on append.
    pub fn append_content(&mut self, new_content: &str, summary: &str, transcript: &str) {
        self.content.push('\n');
        self.content.push_str(new_content);
        if !summary.trim().is_empty() {
            self.summary = clamp_summary(summary);
        }
        if !transcript.trim().is_empty() {
            self.transcript_history.push_str(transcript);
            self.transcript_history.push_str("... ");
        }
        self.touch();
        self.num_appends += 1;
    }

    /// Replaces content and summary wholesale, preserving title and
    /// structure. Resets the append counter.
    pub fn replace_content(&mut self, content: &str, summary: &str) {
        self.content = content.to_string();
        self.summary = clamp_summary(summary);
        self.num_appends = 0;
        self.touch();
    }

    /// Bumps `modified_at`, keeping it monotonic.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.modified_at = now.max(self.created_at);
    }

    /// Returns `true` when this node was modified after creation.
    #[must_use]
    pub fn recently_updated(&self) -> bool {
        self.modified_at > self.created_at
    }
}

/// Derives the Markdown filename for a node: `<id>_<slug>.md`.
#[must_use]
pub fn derive_filename(id: NodeId, title: &str) -> String {
    format!("{id}_{}.md", slugify(title))
}

/// Slugifies a title: lowercase, non-alphanumerics collapsed to single
/// underscores, trimmed, truncated to a bounded length.
#[must_use]
pub fn slugify(title: &str) -> String {
    let lower = title.to_lowercase();
    let slug = NON_ALNUM.replace_all(&lower, "_");
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        return "untitled".to_string();
    }
    let mut truncated: String = slug.chars().take(MAX_SLUG_LEN).collect();
    while truncated.ends_with('_') {
        truncated.pop();
    }
    truncated
}

/// Clamps a summary to [`MAX_SUMMARY_LEN`] characters.
fn clamp_summary(summary: &str) -> String {
    let summary = summary.trim();
    if summary.chars().count() <= MAX_SUMMARY_LEN {
        summary.to_string()
    } else {
        summary.chars().take(MAX_SUMMARY_LEN).collect()
    }
}
