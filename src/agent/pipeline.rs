//! The staged agent: segmentation → relationship analysis →
//! integration decision.
//!
//! Stages run strictly in sequence with typed state passed through. A
//! filtering transform between stages two and three drops incomplete
//! chunks (and their analyses); the chunk `name` correlates records
//! across stages. The trailing incomplete chunk, if any, is returned
//! so the caller can feed it back into the stream buffer.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::debug_log::StageLogger;
use crate::agent::prompt::{render, PromptSet};
use crate::agent::provider::LlmProvider;
use crate::agent::schema::{
    AgentOutcome, ChunkAnalysis, ChunkUnit, DecisionAction, IntegrationResponse,
    RelationshipResponse, SegmentationResponse,
};
use crate::agent::structured::{call_structured, CallOptions};
use crate::config::Config;
use crate::error::AgentError;

/// Stage name constants, shared with the debug logger.
const STAGE_SEGMENTATION: &str = "segmentation";
/// Relationship-analysis stage name.
const STAGE_RELATIONSHIP: &str = "relationship_analysis";
/// Integration-decision stage name.
const STAGE_INTEGRATION: &str = "integration_decision";

/// Orchestrates the fixed three-stage LLM workflow.
pub struct StagedAgent {
    provider: Arc<dyn LlmProvider>,
    prompts: PromptSet,
    logger: StageLogger,
    models: crate::config::ModelNames,
    timeout: Duration,
    max_retries: u32,
}

impl std::fmt::Debug for StagedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedAgent")
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl StagedAgent {
    /// Creates an agent from configuration. Prompt templates are
    /// loaded once here and cached for the agent's lifetime.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, config: &Config) -> Self {
        let prompts = PromptSet::load(config.prompt_dir.as_deref());
        let logger = StageLogger::new(config.resolved_debug_log_dir());
        Self {
            provider,
            prompts,
            logger,
            models: config.model_names.clone(),
            timeout: config.llm_timeout,
            max_retries: config.max_retries,
        }
    }

    /// Runs the full workflow over one transcript segment.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when a stage fails after retries or
    /// returns schema-violating output. The caller abandons the cycle
    /// and retains the segment for the next one.
    pub async fn run(
        &self,
        transcript_segment: &str,
        transcript_history: &str,
        existing_nodes: &str,
    ) -> Result<AgentOutcome, AgentError> {
        // Stage 1: segmentation.
        let chunks = self
            .run_segmentation(transcript_segment, transcript_history)
            .await?;
        if chunks.is_empty() {
            tracing::info!("segmentation produced no chunks");
            return Ok(AgentOutcome::default());
        }

        let incomplete_remainder = chunks
            .iter()
            .rev()
            .find(|c| !c.is_complete)
            .map(|c| c.text.clone());

        // Stage 2: relationship analysis over all chunks.
        let analyses = self.run_relationship(&chunks, existing_nodes).await?;

        // Transform: only complete chunks reach the decision stage.
        let complete_names: BTreeSet<&str> = chunks
            .iter()
            .filter(|c| c.is_complete)
            .map(|c| c.name.as_str())
            .collect();
        let complete_analyses: Vec<&ChunkAnalysis> = analyses
            .iter()
            .filter(|a| complete_names.contains(a.name.as_str()))
            .collect();

        if complete_analyses.is_empty() {
            tracing::info!("no complete chunks this cycle");
            return Ok(AgentOutcome {
                decisions: Vec::new(),
                new_node_names: Vec::new(),
                incomplete_remainder,
            });
        }

        // Stage 3: integration decisions for complete chunks.
        let decisions = self
            .run_integration(&complete_analyses, existing_nodes)
            .await?;

        let new_node_names = decisions
            .iter()
            .filter(|d| d.action == DecisionAction::Create)
            .filter_map(|d| d.new_node_name.clone())
            .collect();

        Ok(AgentOutcome {
            decisions,
            new_node_names,
            incomplete_remainder,
        })
    }

    async fn run_segmentation(
        &self,
        transcript_segment: &str,
        transcript_history: &str,
    ) -> Result<Vec<ChunkUnit>, AgentError> {
        let mut vars = HashMap::new();
        vars.insert("transcript_text", transcript_segment.to_string());
        vars.insert("transcript_history", transcript_history.to_string());
        let prompt = render(&self.prompts.segmentation, &vars);

        let response: SegmentationResponse = self
            .call_stage(STAGE_SEGMENTATION, &self.models.segmentation, &prompt, transcript_segment)
            .await?;
        Ok(response.chunks)
    }

    async fn run_relationship(
        &self,
        chunks: &[ChunkUnit],
        existing_nodes: &str,
    ) -> Result<Vec<ChunkAnalysis>, AgentError> {
        let chunks_json =
            serde_json::to_string_pretty(chunks).unwrap_or_else(|_| "[]".to_string());
        let mut vars = HashMap::new();
        vars.insert("existing_nodes", existing_nodes.to_string());
        vars.insert("chunks", chunks_json.clone());
        let prompt = render(&self.prompts.relationship, &vars);

        let response: RelationshipResponse = self
            .call_stage(STAGE_RELATIONSHIP, &self.models.relationship, &prompt, &chunks_json)
            .await?;
        Ok(response.analyses)
    }

    async fn run_integration(
        &self,
        analyses: &[&ChunkAnalysis],
        existing_nodes: &str,
    ) -> Result<Vec<crate::agent::schema::IntegrationDecision>, AgentError> {
        let analyses_json =
            serde_json::to_string_pretty(analyses).unwrap_or_else(|_| "[]".to_string());
        let mut vars = HashMap::new();
        vars.insert("existing_nodes", existing_nodes.to_string());
        vars.insert("analyzed_chunks", analyses_json.clone());
        let prompt = render(&self.prompts.integration, &vars);

        let response: IntegrationResponse = self
            .call_stage(STAGE_INTEGRATION, &self.models.integration, &prompt, &analyses_json)
            .await?;
        Ok(response.decisions)
    }

    /// Executes one stage call and writes the stage debug record.
    async fn call_stage<T: serde::de::DeserializeOwned + serde::Serialize>(
        &self,
        stage: &str,
        model: &str,
        prompt: &str,
        input_state: &str,
    ) -> Result<T, AgentError> {
        let options = CallOptions {
            stage: stage.to_string(),
            model: model.to_string(),
            timeout: self.timeout,
            max_retries: self.max_retries,
        };

        match call_structured::<T>(self.provider.as_ref(), prompt, &options).await {
            Ok((value, response)) => {
                let output_state =
                    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "<unprintable>".to_string());
                self.logger
                    .log_stage(stage, input_state, prompt, &response.content, &output_state);
                Ok(value)
            }
            Err(err) => {
                if let AgentError::SchemaViolation { content, message, .. } = &err {
                    self.logger.log_failure(stage, prompt, content, message);
                } else {
                    self.logger.log_failure(stage, prompt, "", &err.to_string());
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::{ChatRequest, ChatResponse, TokenUsage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Provider scripted with one response per expected call.
    struct ScriptedProvider {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<&str>) -> Self {
            let mut responses: Vec<String> =
                responses.into_iter().map(String::from).collect();
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, AgentError> {
            let content = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| AgentError::Transport {
                    message: "script exhausted".to_string(),
                })?;
            Ok(ChatResponse {
                content,
                usage: TokenUsage::default(),
                finish_reason: Some("stop".to_string()),
            })
        }
    }

    fn agent_with(provider: ScriptedProvider, debug_dir: Option<std::path::PathBuf>) -> StagedAgent {
        let mut config = Config::builder()
            .api_key("test")
            .max_retries(0)
            .build()
            .unwrap();
        config.debug_log_dir = debug_dir;
        StagedAgent {
            provider: Arc::new(provider),
            prompts: PromptSet::defaults(),
            logger: StageLogger::new(config.debug_log_dir.clone()),
            models: config.model_names.clone(),
            timeout: config.llm_timeout,
            max_retries: config.max_retries,
        }
    }

    const SEGMENTATION_JSON: &str = r#"{"chunks": [
        {"name": "project scope", "text": "Define the project scope.", "is_complete": true},
        {"name": "trailing", "text": "And then we should", "is_complete": false}
    ]}"#;

    const RELATIONSHIP_JSON: &str = r#"{"analyses": [
        {"name": "project scope", "text": "Define the project scope.", "reasoning": "extends planning", "relevant_node_name": "Project Planning", "relationship": "child of"},
        {"name": "trailing", "text": "And then we should", "reasoning": "incomplete", "relevant_node_name": "NO_RELEVANT_NODE", "relationship": null}
    ]}"#;

    const INTEGRATION_JSON: &str = r#"{"decisions": [
        {"name": "project scope", "action": "CREATE", "target_node": "Project Planning",
         "new_node_name": "Scope Definition", "new_node_summary": "Defining project scope.",
         "relationship": "child of", "content": "- define the scope"}
    ]}"#;

    #[tokio::test]
    async fn test_full_run() {
        let provider = ScriptedProvider::new(vec![
            SEGMENTATION_JSON,
            RELATIONSHIP_JSON,
            INTEGRATION_JSON,
        ]);
        let agent = agent_with(provider, None);
        let outcome = agent
            .run("Define the project scope. And then we should", "", "No existing nodes")
            .await
            .unwrap();

        assert_eq!(outcome.decisions.len(), 1);
        assert_eq!(outcome.new_node_names, vec!["Scope Definition"]);
        assert_eq!(outcome.incomplete_remainder.as_deref(), Some("And then we should"));
    }

    #[tokio::test]
    async fn test_empty_segmentation_short_circuits() {
        let provider = ScriptedProvider::new(vec![r#"{"chunks": []}"#]);
        let agent = agent_with(provider, None);
        let outcome = agent.run("text", "", "nodes").await.unwrap();
        assert!(outcome.decisions.is_empty());
        assert!(outcome.incomplete_remainder.is_none());
    }

    #[tokio::test]
    async fn test_all_chunks_incomplete_skips_integration() {
        // Only two scripted responses: integration must not be called.
        let provider = ScriptedProvider::new(vec![
            r#"{"chunks": [{"name": "t", "text": "trailing off", "is_complete": false}]}"#,
            r#"{"analyses": [{"name": "t", "text": "trailing off", "relevant_node_name": "NO_RELEVANT_NODE"}]}"#,
        ]);
        let agent = agent_with(provider, None);
        let outcome = agent.run("trailing off", "", "nodes").await.unwrap();
        assert!(outcome.decisions.is_empty());
        assert_eq!(outcome.incomplete_remainder.as_deref(), Some("trailing off"));
    }

    #[tokio::test]
    async fn test_schema_violation_surfaces() {
        let provider = ScriptedProvider::new(vec!["this is not json"]);
        let agent = agent_with(provider, None);
        let result = agent.run("text", "", "nodes").await;
        assert!(matches!(result, Err(AgentError::SchemaViolation { .. })));
    }

    #[tokio::test]
    async fn test_stage_logs_written() {
        let dir = tempfile::TempDir::new().unwrap();
        let provider = ScriptedProvider::new(vec![
            SEGMENTATION_JSON,
            RELATIONSHIP_JSON,
            INTEGRATION_JSON,
        ]);
        let agent = agent_with(provider, Some(dir.path().to_path_buf()));
        agent.run("segment text", "", "nodes").await.unwrap();

        for stage in ["segmentation", "relationship_analysis", "integration_decision"] {
            let path = dir.path().join(format!("{stage}.log"));
            assert!(path.exists(), "missing log for {stage}");
            let content = std::fs::read_to_string(path).unwrap();
            assert!(content.contains("--- prompt ---"));
            assert!(content.contains("--- response ---"));
        }
    }

    #[tokio::test]
    async fn test_failure_logged_verbatim() {
        let dir = tempfile::TempDir::new().unwrap();
        let provider = ScriptedProvider::new(vec!["garbage response"]);
        let agent = agent_with(provider, Some(dir.path().to_path_buf()));
        let _ = agent.run("text", "", "nodes").await;

        let content =
            std::fs::read_to_string(dir.path().join("segmentation.log")).unwrap();
        assert!(content.contains("FAILURE"));
        assert!(content.contains("garbage response"));
    }

    #[tokio::test]
    async fn test_correlation_by_name_filters_analyses() {
        // Analysis for an unknown name must not reach integration.
        let provider = ScriptedProvider::new(vec![
            r#"{"chunks": [{"name": "known", "text": "a thought.", "is_complete": true}]}"#,
            r#"{"analyses": [
                {"name": "known", "text": "a thought.", "relevant_node_name": "NO_RELEVANT_NODE"},
                {"name": "phantom", "text": "??", "relevant_node_name": "NO_RELEVANT_NODE"}
            ]}"#,
            r#"{"decisions": [{"name": "known", "action": "APPEND", "target_node": "NO_RELEVANT_NODE", "content": "- a thought"}]}"#,
        ]);
        let agent = agent_with(provider, None);
        let outcome = agent.run("a thought.", "", "nodes").await.unwrap();
        assert_eq!(outcome.decisions.len(), 1);
        assert_eq!(outcome.decisions[0].name, "known");
    }
}
