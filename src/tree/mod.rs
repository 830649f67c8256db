//! Decision-tree data model: nodes, relationships, and the
//! authoritative in-memory graph.

mod decision;
mod node;

pub use decision::{DecisionTree, Neighbor, SIMILARITY_THRESHOLD};
pub use node::{
    derive_filename, slugify, Node, NodeId, Relationship, SubtreeInfo, MAX_SUMMARY_LEN, ROOT_ID,
};
