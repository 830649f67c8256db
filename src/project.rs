//! Incremental Markdown projection of the decision tree.
//!
//! Each dirty node is rendered to `<id>_<slug>.md` in the output
//! directory: YAML frontmatter, a heading, a links section using the
//! `[[filename]]` wiki convention, then the node's content. Rendering
//! is deterministic for a given node state, and writes are atomic
//! (write-then-rename) so a concurrent reader never sees a partial
//! file. Frontmatter keys added by external tooling are preserved on
//! re-projection.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::error::ProjectError;
use crate::tree::{DecisionTree, Node, NodeId};

/// Renders dirty nodes to individual Markdown files.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownProjector;

impl MarkdownProjector {
    /// Creates a projector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Projects every node in `dirty_ids` to `output_dir`.
    ///
    /// Returns the ids whose files could not be written; the caller
    /// re-marks them dirty so projection is retried next cycle.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::DirectoryFailed`] when the output
    /// directory cannot be created. That is a configuration-level
    /// failure; individual file errors are only collected.
    pub fn project(
        &self,
        tree: &DecisionTree,
        dirty_ids: &BTreeSet<NodeId>,
        output_dir: &Path,
    ) -> Result<Vec<NodeId>, ProjectError> {
        if dirty_ids.is_empty() {
            return Ok(Vec::new());
        }

        std::fs::create_dir_all(output_dir).map_err(|e| ProjectError::DirectoryFailed {
            path: output_dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut failed = Vec::new();
        for &id in dirty_ids {
            let Some(node) = tree.get(id) else {
                tracing::warn!(id, "dirty id not present in tree, skipping");
                continue;
            };
            if let Err(e) = self.project_node(tree, node, output_dir) {
                tracing::warn!(id, error = %e, "node projection failed, will retry");
                failed.push(id);
            }
        }
        Ok(failed)
    }

    /// Renders and atomically writes a single node file.
    fn project_node(
        &self,
        tree: &DecisionTree,
        node: &Node,
        output_dir: &Path,
    ) -> Result<(), ProjectError> {
        let path = output_dir.join(&node.filename);
        let existing_frontmatter = read_existing_frontmatter(&path);
        let rendered = render_node(tree, node, existing_frontmatter.as_ref());

        let tmp_path = path.with_extension("md.tmp");
        std::fs::write(&tmp_path, &rendered).map_err(|e| ProjectError::WriteFailed {
            path: tmp_path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            ProjectError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        tracing::debug!(id = node.id, path = %path.display(), "projected node");
        Ok(())
    }
}

/// Renders the full Markdown document for a node.
#[must_use]
pub fn render_node(tree: &DecisionTree, node: &Node, existing: Option<&Mapping>) -> String {
    let mut doc = String::new();

    // Frontmatter: pre-existing keys (in their order) overlaid with
    // the canonical node keys.
    doc.push_str("---\n");
    doc.push_str(&render_frontmatter(node, existing));
    doc.push_str("---\n\n");

    // Heading.
    let _ = writeln!(doc, "### {}\n", node.title);

    // Links: parent first, then children in id order.
    let neighbors = tree.get_neighbors(node.id);
    if !neighbors.is_empty() {
        doc.push_str("Links:\n");
        for neighbor in &neighbors {
            let filename = tree
                .get(neighbor.id)
                .map_or_else(|| format!("{}_unknown.md", neighbor.id), |n| n.filename.clone());
            let _ = writeln!(doc, "- {} [[{}]]", neighbor.relationship, filename);
        }
        doc.push('\n');
    }

    // Body.
    let content = node.content.trim_end();
    if !content.is_empty() {
        doc.push_str(content);
        doc.push('\n');
    }

    doc
}

/// Builds the merged frontmatter mapping and serializes it.
fn render_frontmatter(node: &Node, existing: Option<&Mapping>) -> String {
    let mut mapping = existing.cloned().unwrap_or_default();

    mapping.insert(Value::from("node_id"), Value::from(node.id));
    mapping.insert(Value::from("title"), Value::from(node.title.as_str()));
    if !node.tags.is_empty() {
        let tags: Vec<Value> = node.tags.iter().map(|t| Value::from(t.as_str())).collect();
        mapping.insert(Value::from("tags"), Value::Sequence(tags));
    }
    if let Some(color) = &node.color {
        mapping.insert(Value::from("color"), Value::from(color.as_str()));
    }
    if let Some(subtree) = &node.subtree {
        mapping.insert(Value::from("subtree_id"), Value::from(subtree.id.as_str()));
        mapping.insert(
            Value::from("subtree_theme"),
            Value::from(subtree.theme.as_str()),
        );
    }

    serde_yaml::to_string(&mapping).unwrap_or_else(|_| format!("node_id: {}\n", node.id))
}

/// Extracts the frontmatter mapping from a previously projected file.
///
/// Returns `None` when the file does not exist or carries no parseable
/// frontmatter; unreadable frontmatter is dropped rather than failing
/// projection.
fn read_existing_frontmatter(path: &Path) -> Option<Mapping> {
    let content = std::fs::read_to_string(path).ok()?;
    let rest = content.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    match serde_yaml::from_str::<Mapping>(&rest[..end]) {
        Ok(mapping) => Some(mapping),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable frontmatter");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ROOT_ID;
    use tempfile::TempDir;

    fn tree_with_child() -> (DecisionTree, NodeId) {
        let mut tree = DecisionTree::new();
        let id = tree
            .create_node(
                "Project Planning",
                ROOT_ID,
                "- define scope\n- identify stakeholders",
                "Scope and stakeholders",
                "child of",
            )
            .unwrap();
        (tree, id)
    }

    #[test]
    fn test_project_writes_files() {
        let (tree, id) = tree_with_child();
        let dir = TempDir::new().unwrap();
        let projector = MarkdownProjector::new();
        let dirty: BTreeSet<NodeId> = [ROOT_ID, id].into_iter().collect();

        let failed = projector.project(&tree, &dirty, dir.path()).unwrap();
        assert!(failed.is_empty());
        assert!(dir.path().join("0_root.md").exists());
        assert!(dir.path().join("1_project_planning.md").exists());
    }

    #[test]
    fn test_rendered_layout() {
        let (tree, id) = tree_with_child();
        let node = tree.get(id).unwrap();
        let doc = render_node(&tree, node, None);

        assert!(doc.starts_with("---\n"));
        assert!(doc.contains("node_id: 1"));
        assert!(doc.contains("title: Project Planning"));
        assert!(doc.contains("### Project Planning"));
        assert!(doc.contains("- child of [[0_root.md]]"));
        assert!(doc.contains("- define scope"));
        // Frontmatter closed before the heading.
        let close = doc.find("\n---\n").unwrap();
        assert!(close < doc.find("###").unwrap());
    }

    #[test]
    fn test_parent_link_first_then_children_in_id_order() {
        let (mut tree, id) = tree_with_child();
        let c1 = tree.create_node("Alpha", id, "", "", "child of").unwrap();
        let c2 = tree.create_node("Beta", id, "", "", "prereq for").unwrap();
        let node = tree.get(id).unwrap();
        let doc = render_node(&tree, node, None);

        let root_pos = doc.find("[[0_root.md]]").unwrap();
        let c1_pos = doc.find(&format!("[[{c1}_alpha.md]]")).unwrap();
        let c2_pos = doc.find(&format!("[[{c2}_beta.md]]")).unwrap();
        assert!(root_pos < c1_pos && c1_pos < c2_pos);
        assert!(doc.contains("- prereq for [[3_beta.md]]"));
    }

    #[test]
    fn test_idempotent_projection() {
        let (tree, id) = tree_with_child();
        let dir = TempDir::new().unwrap();
        let projector = MarkdownProjector::new();
        let dirty: BTreeSet<NodeId> = [ROOT_ID, id].into_iter().collect();

        projector.project(&tree, &dirty, dir.path()).unwrap();
        let first = std::fs::read_to_string(dir.path().join("1_project_planning.md")).unwrap();
        projector.project(&tree, &dirty, dir.path()).unwrap();
        let second = std::fs::read_to_string(dir.path().join("1_project_planning.md")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_preserves_foreign_frontmatter_keys() {
        let (tree, id) = tree_with_child();
        let dir = TempDir::new().unwrap();
        let projector = MarkdownProjector::new();
        let dirty: BTreeSet<NodeId> = [id].into_iter().collect();

        projector.project(&tree, &dirty, dir.path()).unwrap();

        // External tooling annotates the file.
        let path = dir.path().join("1_project_planning.md");
        let content = std::fs::read_to_string(&path).unwrap();
        let annotated = content.replace("---\nnode_id", "---\nsubtree_color: '#FF6B6B'\nnode_id");
        std::fs::write(&path, annotated).unwrap();

        projector.project(&tree, &dirty, dir.path()).unwrap();
        let reprojected = std::fs::read_to_string(&path).unwrap();
        assert!(reprojected.contains("subtree_color: '#FF6B6B'"));
        assert!(reprojected.contains("node_id: 1"));
    }

    #[test]
    fn test_empty_dirty_set_is_noop() {
        let (tree, _) = tree_with_child();
        let projector = MarkdownProjector::new();
        // Output dir is not even created.
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("never");
        let failed = projector
            .project(&tree, &BTreeSet::new(), &missing)
            .unwrap();
        assert!(failed.is_empty());
        assert!(!missing.exists());
    }

    #[test]
    fn test_unknown_dirty_id_skipped() {
        let (tree, _) = tree_with_child();
        let dir = TempDir::new().unwrap();
        let projector = MarkdownProjector::new();
        let dirty: BTreeSet<NodeId> = [99].into_iter().collect();
        let failed = projector.project(&tree, &dirty, dir.path()).unwrap();
        assert!(failed.is_empty());
    }

    #[test]
    fn test_uncreatable_output_dir_is_error() {
        let (tree, id) = tree_with_child();
        let file = TempDir::new().unwrap();
        let blocked = file.path().join("file");
        std::fs::write(&blocked, "not a dir").unwrap();
        let projector = MarkdownProjector::new();
        let dirty: BTreeSet<NodeId> = [id].into_iter().collect();
        let result = projector.project(&tree, &dirty, &blocked.join("sub"));
        assert!(result.is_err());
    }

    #[test]
    fn test_no_leftover_tmp_files() {
        let (tree, id) = tree_with_child();
        let dir = TempDir::new().unwrap();
        let projector = MarkdownProjector::new();
        let dirty: BTreeSet<NodeId> = [ROOT_ID, id].into_iter().collect();
        projector.project(&tree, &dirty, dir.path()).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_subtree_metadata_rendered() {
        let (tree, id) = tree_with_child();
        let mut node = tree.get(id).unwrap().clone();
        node.color = Some("#4ECDC4".to_string());
        node.subtree = Some(crate::tree::SubtreeInfo {
            id: "subtree-1".to_string(),
            theme: "planning work".to_string(),
        });
        let doc = render_node(&tree, &node, None);
        assert!(doc.contains("color: '#4ECDC4'"));
        assert!(doc.contains("subtree_id: subtree-1"));
        assert!(doc.contains("subtree_theme: planning work"));
    }
}
