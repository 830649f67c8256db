//! Typed payloads exchanged between agent stages.
//!
//! Each stage's LLM response is validated against these structures
//! before use; a response that does not parse is a schema violation
//! and abandons the cycle. Chunk `name` is the correlation key carried
//! across all three stages.

use serde::{Deserialize, Serialize};

/// Sentinel value the agent returns when no existing node applies.
pub const NO_RELEVANT_NODE: &str = "NO_RELEVANT_NODE";

/// A coherent thought unit produced by the segmentation stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkUnit {
    /// Short name for the thought unit; correlation key across stages.
    pub name: String,
    /// The text of the unit.
    pub text: String,
    /// `false` iff the unit appears to trail off mid-thought.
    pub is_complete: bool,
}

/// Response schema for the segmentation stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentationResponse {
    /// Ordered thought units covering the segment.
    pub chunks: Vec<ChunkUnit>,
}

/// Per-chunk relationship analysis from stage two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAnalysis {
    /// Correlation key matching a [`ChunkUnit::name`].
    pub name: String,
    /// The chunk text (carried through for the next stage).
    pub text: String,
    /// Short rationale for the chosen node and relationship.
    #[serde(default)]
    pub reasoning: String,
    /// An existing node title, or [`NO_RELEVANT_NODE`].
    pub relevant_node_name: String,
    /// Short verb phrase describing the relationship, if any.
    #[serde(default)]
    pub relationship: Option<String>,
}

/// Response schema for the relationship-analysis stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipResponse {
    /// One analysis per chunk, in chunk order.
    pub analyses: Vec<ChunkAnalysis>,
}

/// What to do with a chunk's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionAction {
    /// Create a new node attached to `target_node`.
    Create,
    /// Append the content to `target_node`.
    Append,
}

/// A single integration decision from stage three.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationDecision {
    /// Correlation key matching a [`ChunkUnit::name`].
    pub name: String,
    /// CREATE or APPEND.
    pub action: DecisionAction,
    /// For CREATE: the parent to attach to. For APPEND: the node to
    /// extend. [`NO_RELEVANT_NODE`] means the root.
    pub target_node: String,
    /// For CREATE: the new node's title.
    #[serde(default)]
    pub new_node_name: Option<String>,
    /// For CREATE: the new node's summary.
    #[serde(default)]
    pub new_node_summary: Option<String>,
    /// For CREATE: relationship label for the edge to the parent.
    #[serde(default)]
    pub relationship: Option<String>,
    /// For APPEND: the node's updated summary.
    #[serde(default)]
    pub updated_summary: Option<String>,
    /// Markdown body to create with or append.
    pub content: String,
}

/// Response schema for the integration-decision stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationResponse {
    /// One decision per complete chunk.
    pub decisions: Vec<IntegrationDecision>,
}

/// Response schema for a background node rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteResponse {
    /// Cleaned, deduplicated Markdown content.
    pub content: String,
    /// Rewritten summary.
    pub summary: String,
    /// Optional better parent for the node, by title.
    #[serde(default)]
    pub new_parent: Option<String>,
}

/// Final result of one staged-agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    /// Integration decisions for complete chunks.
    pub decisions: Vec<IntegrationDecision>,
    /// Titles of nodes the decisions will create.
    pub new_node_names: Vec<String>,
    /// Trailing text of an incomplete final chunk, to be re-buffered.
    pub incomplete_remainder: Option<String>,
}

impl IntegrationDecision {
    /// Returns `true` when the decision targets no existing node.
    #[must_use]
    pub fn targets_root(&self) -> bool {
        self.target_node.trim().is_empty() || self.target_node == NO_RELEVANT_NODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segmentation_roundtrip() {
        let json = r#"{"chunks":[{"name":"planning","text":"Define the scope.","is_complete":true}]}"#;
        let parsed: SegmentationResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.chunks.len(), 1);
        assert!(parsed.chunks[0].is_complete);
    }

    #[test]
    fn test_analysis_optional_fields_default() {
        let json = r#"{"analyses":[{"name":"a","text":"t","relevant_node_name":"NO_RELEVANT_NODE"}]}"#;
        let parsed: RelationshipResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.analyses[0].reasoning.is_empty());
        assert!(parsed.analyses[0].relationship.is_none());
    }

    #[test]
    fn test_decision_action_uppercase() {
        let parsed: DecisionAction = serde_json::from_str("\"CREATE\"").unwrap();
        assert_eq!(parsed, DecisionAction::Create);
        let parsed: DecisionAction = serde_json::from_str("\"APPEND\"").unwrap();
        assert_eq!(parsed, DecisionAction::Append);
        assert!(serde_json::from_str::<DecisionAction>("\"create\"").is_err());
    }

    #[test]
    fn test_integration_decision_parse() {
        let json = r#"{
            "decisions": [{
                "name": "planning",
                "action": "CREATE",
                "target_node": "NO_RELEVANT_NODE",
                "new_node_name": "Project Planning",
                "new_node_summary": "Scope definition",
                "relationship": "child of",
                "content": "- define scope"
            }]
        }"#;
        let parsed: IntegrationResponse = serde_json::from_str(json).unwrap();
        let decision = &parsed.decisions[0];
        assert_eq!(decision.action, DecisionAction::Create);
        assert!(decision.targets_root());
        assert_eq!(decision.new_node_name.as_deref(), Some("Project Planning"));
    }

    #[test]
    fn test_targets_root() {
        let mut decision = IntegrationDecision {
            name: "n".to_string(),
            action: DecisionAction::Append,
            target_node: "Project Planning".to_string(),
            new_node_name: None,
            new_node_summary: None,
            relationship: None,
            updated_summary: None,
            content: String::new(),
        };
        assert!(!decision.targets_root());
        decision.target_node = NO_RELEVANT_NODE.to_string();
        assert!(decision.targets_root());
        decision.target_node = "  ".to_string();
        assert!(decision.targets_root());
    }

    #[test]
    fn test_rewrite_response() {
        let json = r#"{"content":"clean","summary":"short"}"#;
        let parsed: RewriteResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.new_parent.is_none());
    }
}
