//! Agent-side state snapshot.
//!
//! An optional JSON file mapping node titles to their summaries and
//! parents, plus an execution history of pipeline cycles. The snapshot
//! exists so a restarted process can show what the previous run built;
//! the Markdown projection remains the authoritative on-disk artifact.
//! Snapshot I/O failures never affect the pipeline.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tree::DecisionTree;

/// A single node entry in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// The node's summary at snapshot time.
    pub summary: String,
    /// Parent node title, if any.
    pub parent: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// One pipeline cycle in the execution history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// When the cycle completed.
    pub at: DateTime<Utc>,
    /// Characters in the processed segment.
    pub segment_chars: usize,
    /// Decisions applied.
    pub decisions: usize,
}

/// The persisted snapshot structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Node title → summary/parent/creation time.
    pub nodes: BTreeMap<String, SnapshotNode>,
    /// Completed pipeline cycles, oldest first.
    #[serde(default)]
    pub execution_history: Vec<ExecutionRecord>,
}

impl StateSnapshot {
    /// Builds a snapshot of the current tree, carrying over the
    /// existing execution history.
    #[must_use]
    pub fn capture(tree: &DecisionTree, execution_history: Vec<ExecutionRecord>) -> Self {
        let nodes = tree
            .iter()
            .map(|node| {
                let parent = node
                    .parent_id
                    .and_then(|p| tree.get(p))
                    .map(|p| p.title.clone());
                (
                    node.title.clone(),
                    SnapshotNode {
                        summary: node.summary.clone(),
                        parent,
                        created_at: node.created_at,
                    },
                )
            })
            .collect();
        Self {
            nodes,
            execution_history,
        }
    }

    /// Loads a snapshot from `path`. Returns `None` when the file does
    /// not exist or cannot be parsed (logged, never fatal).
    #[must_use]
    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable state snapshot");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read state snapshot");
                None
            }
        }
    }

    /// Saves the snapshot to `path`, creating parent directories.
    /// Failures are logged and swallowed.
    pub fn save(&self, path: &Path) {
        let result = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| {
                let json = serde_json::to_string_pretty(self)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                std::fs::write(path, json)
            });
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to save state snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ROOT_ID;
    use tempfile::TempDir;

    fn sample_tree() -> DecisionTree {
        let mut tree = DecisionTree::new();
        let planning = tree
            .create_node("Project Planning", ROOT_ID, "- scope", "Scope work", "child of")
            .unwrap();
        tree.create_node("Investor Outreach", planning, "- calls", "Raising money", "child of")
            .unwrap();
        tree
    }

    #[test]
    fn test_capture() {
        let tree = sample_tree();
        let snapshot = StateSnapshot::capture(&tree, Vec::new());
        assert_eq!(snapshot.nodes.len(), 3);
        let outreach = &snapshot.nodes["Investor Outreach"];
        assert_eq!(outreach.parent.as_deref(), Some("Project Planning"));
        assert_eq!(outreach.summary, "Raising money");
        let root_title = tree.get(ROOT_ID).unwrap().title.clone();
        assert!(snapshot.nodes[&root_title].parent.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let tree = sample_tree();
        let history = vec![ExecutionRecord {
            at: Utc::now(),
            segment_chars: 120,
            decisions: 2,
        }];
        let snapshot = StateSnapshot::capture(&tree, history);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/snapshot.json");
        snapshot.save(&path);

        let loaded = StateSnapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.execution_history.len(), 1);
    }

    #[test]
    fn test_load_missing_returns_none() {
        assert!(StateSnapshot::load(Path::new("/nonexistent/snapshot.json")).is_none());
    }

    #[test]
    fn test_load_corrupt_returns_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(StateSnapshot::load(&path).is_none());
    }

    #[test]
    fn test_save_to_unwritable_path_does_not_panic() {
        let snapshot = StateSnapshot::default();
        snapshot.save(Path::new("/dev/null/impossible/x.json"));
    }
}
