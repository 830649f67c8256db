//! # VoiceTree
//!
//! Real-time voice-transcript to knowledge-graph pipeline.
//!
//! VoiceTree converts an unbounded stream of transcribed speech into a
//! persistent, evolving tree of named concept nodes, rendered
//! incrementally as Markdown files. Transcript bursts are buffered
//! into coherent segments, a staged LLM agent turns each segment into
//! CREATE/APPEND decisions against the tree, and dirty nodes are
//! re-projected to disk after every cycle.
//!
//! ## Pipeline
//!
//! - **Buffering**: adaptive segmentation that tolerates the erratic
//!   punctuation of voice-to-text engines
//! - **Context selection**: recency + TF-IDF relevance over existing
//!   nodes, bounded per prompt
//! - **Staged agent**: segmentation → relationship analysis →
//!   integration decision, with typed state between stages
//! - **Projection**: idempotent, atomically written Markdown files
//!   with YAML frontmatter and `[[wiki-links]]`
//! - **Background rewrites**: periodic LLM cleanup of append-heavy
//!   nodes, off the primary path

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
// Note: unsafe is needed for memory-mapped I/O (memmap2)
#![warn(unsafe_code)]

pub mod agent;
pub mod apply;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod io;
pub mod processor;
pub mod project;
pub mod rewrite;
pub mod snapshot;
pub mod tree;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export core domain types
pub use buffer::StreamBuffer;
pub use config::{Config, ConfigBuilder, ModelNames};
pub use tree::{DecisionTree, Node, NodeId, Relationship, ROOT_ID};

// Re-export pipeline components
pub use agent::{LlmProvider, StagedAgent};
pub use apply::{DirtySet, MutationApplier};
pub use context::ContextSelector;
pub use processor::{chunk_channel, feed_chunk, run_pipeline, ChunkProcessor};
pub use project::MarkdownProjector;
pub use rewrite::BackgroundRewriter;
pub use snapshot::StateSnapshot;
