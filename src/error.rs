//! Error types for the VoiceTree pipeline.
//!
//! This module provides the error hierarchy using `thiserror` for all
//! pipeline operations: tree mutation, the staged agent, Markdown
//! projection, I/O, and configuration.
//!
//! Recoverable failures (LLM blips, name-resolution misses, projection
//! I/O errors) are logged and absorbed by the pipeline; only invariant
//! violations and configuration errors propagate to the caller.

use thiserror::Error;

/// Result type alias for VoiceTree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for VoiceTree operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Tree mutation errors (invariant violations, missing nodes).
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    /// Staged-agent errors (LLM transport, schema violations).
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// Markdown projection errors.
    #[error("projection error: {0}")]
    Project(#[from] ProjectError),

    /// I/O errors (file operations).
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid state errors.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the invalid state.
        message: String,
    },

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

/// Errors raised by `DecisionTree` operations.
///
/// `NodeNotFound` on an update and the structural variants are
/// programming errors per the pipeline contract: they propagate to the
/// caller rather than being absorbed.
#[derive(Error, Debug)]
pub enum TreeError {
    /// A node id was not present in the tree.
    #[error("node not found: {id}")]
    NodeNotFound {
        /// Node id that was not found.
        id: u64,
    },

    /// A node was created against a parent id that does not exist.
    #[error("parent node {parent_id} does not exist")]
    InvalidParent {
        /// The missing parent id.
        parent_id: u64,
    },

    /// A reparent would make an ancestor into a descendant.
    #[error("reparenting node {id} under {new_parent_id} would create a cycle")]
    CycleDetected {
        /// The node being moved.
        id: u64,
        /// The rejected parent.
        new_parent_id: u64,
    },

    /// The root node cannot be moved or re-targeted.
    #[error("operation not permitted on the root node")]
    RootImmutable,
}

/// Errors raised by the staged agent and its LLM boundary.
#[derive(Error, Debug)]
pub enum AgentError {
    /// No API key found in configuration or environment.
    #[error("API key missing: set OPENAI_API_KEY or VOICETREE_API_KEY")]
    ApiKeyMissing,

    /// Unknown provider name in configuration.
    #[error("unsupported LLM provider: {name}")]
    UnsupportedProvider {
        /// The provider name that was not recognized.
        name: String,
    },

    /// Transport-level failure (network, HTTP) after retries were
    /// exhausted.
    #[error("LLM request failed: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// A stage call exceeded the configured timeout.
    #[error("LLM call timed out after {seconds}s in stage {stage}")]
    Timeout {
        /// Stage name.
        stage: String,
        /// Timeout in seconds.
        seconds: u64,
    },

    /// The response did not conform to the stage schema.
    ///
    /// Carries the raw response so the offending content can be logged
    /// verbatim to the per-stage debug log.
    #[error("schema violation in stage {stage}: {message}")]
    SchemaViolation {
        /// Stage name.
        stage: String,
        /// Parse diagnostic.
        message: String,
        /// The raw response content.
        content: String,
    },
}

/// Errors raised by the Markdown projector.
#[derive(Error, Debug)]
pub enum ProjectError {
    /// Failed to write a node file.
    #[error("failed to write node file {path}: {reason}")]
    WriteFailed {
        /// Path of the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to create the output directory.
    #[error("failed to create output directory {path}: {reason}")]
    DirectoryFailed {
        /// Path of the directory.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Frontmatter in an existing file could not be parsed.
    #[error("invalid frontmatter in {path}: {reason}")]
    InvalidFrontmatter {
        /// Path of the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },
}

/// I/O-specific errors for file operations.
#[derive(Error, Debug)]
pub enum IoError {
    /// File not found.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path to the file that was not found.
        path: String,
    },

    /// Failed to read file.
    #[error("failed to read file: {path}: {reason}")]
    ReadFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to write file.
    #[error("failed to write file: {path}: {reason}")]
    WriteFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Memory mapping error.
    #[error("memory mapping failed: {path}: {reason}")]
    MmapFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Generic I/O error wrapper.
    #[error("I/O error: {0}")]
    Generic(String),
}

// Implement From traits for standard library errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(IoError::Generic(err.to_string()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidState {
            message: format!("serialization error: {err}"),
        }
    }
}

impl Error {
    /// Returns `true` when the pipeline should absorb this error and
    /// continue (logged at WARN), `false` when it must propagate.
    ///
    /// Invariant violations and configuration errors are fatal; agent,
    /// projection, and I/O failures are recovered per cycle.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Agent(_) | Self::Project(_) | Self::Io(_) => true,
            Self::Tree(_) | Self::InvalidState { .. } | Self::Config { .. } => false,
        }
    }
}
