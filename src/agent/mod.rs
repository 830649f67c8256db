//! The staged LLM agent and its provider boundary.
//!
//! The agent turns one transcript segment into a set of typed
//! integration decisions through three sequential LLM stages. All LLM
//! traffic flows through the [`LlmProvider`] trait so tests can swap
//! in a scripted provider.

mod debug_log;
mod message;
mod pipeline;
pub mod prompt;
mod provider;
mod providers;
mod schema;
mod structured;

pub use debug_log::StageLogger;
pub use message::{system_message, user_message, ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
pub use pipeline::StagedAgent;
pub use prompt::PromptSet;
pub use provider::{create_provider, LlmProvider};
pub use providers::OpenAiProvider;
pub use schema::{
    AgentOutcome, ChunkAnalysis, ChunkUnit, DecisionAction, IntegrationDecision,
    IntegrationResponse, RelationshipResponse, RewriteResponse, SegmentationResponse,
    NO_RELEVANT_NODE,
};
pub use structured::{call_structured, CallOptions};
