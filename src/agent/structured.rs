//! The single LLM boundary: structured calls with retry and timeout.
//!
//! [`call_structured`] renders nothing itself; it takes a fully
//! rendered prompt, sends it through an [`LlmProvider`] in JSON mode,
//! extracts the JSON payload (tolerating markdown code fences), and
//! parses it into the stage's typed schema. Transport failures retry
//! transparently with backoff; a response that fails to parse is a
//! schema violation carrying the raw content for the debug log.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::agent::message::{system_message, user_message, ChatRequest, ChatResponse};
use crate::agent::provider::LlmProvider;
use crate::error::AgentError;

/// Base delay between retries; doubled per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// System preamble shared by all stages.
const SYSTEM_PREAMBLE: &str =
    "You are a precise structured-output engine. Respond with a single JSON object matching the requested schema, and nothing else.";

/// Options for a structured call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Stage name for logging and error attribution.
    pub stage: String,
    /// Model identifier.
    pub model: String,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Maximum retry attempts for transport failures.
    pub max_retries: u32,
}

/// Executes a structured LLM call, returning the parsed value and the
/// raw response.
///
/// # Errors
///
/// Returns [`AgentError::Timeout`] when the call exceeds the timeout,
/// [`AgentError::Transport`] when retries are exhausted, and
/// [`AgentError::SchemaViolation`] when the response does not parse
/// into `T`.
pub async fn call_structured<T: DeserializeOwned>(
    provider: &dyn LlmProvider,
    prompt: &str,
    options: &CallOptions,
) -> Result<(T, ChatResponse), AgentError> {
    let request = ChatRequest {
        model: options.model.clone(),
        messages: vec![system_message(SYSTEM_PREAMBLE), user_message(prompt)],
        temperature: Some(0.0),
        max_tokens: None,
        json_mode: true,
    };

    let response = chat_with_retry(provider, &request, options).await?;

    match parse_json_payload::<T>(&response.content) {
        Ok(value) => Ok((value, response)),
        Err(message) => Err(AgentError::SchemaViolation {
            stage: options.stage.clone(),
            message,
            content: response.content,
        }),
    }
}

/// Sends the request, retrying transport failures with exponential
/// backoff and bounding every attempt by the configured timeout.
async fn chat_with_retry(
    provider: &dyn LlmProvider,
    request: &ChatRequest,
    options: &CallOptions,
) -> Result<ChatResponse, AgentError> {
    let mut last_error = None;

    for attempt in 0..=options.max_retries {
        if attempt > 0 {
            let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
            tracing::warn!(stage = %options.stage, attempt, ?delay, "retrying LLM call");
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(options.timeout, provider.chat(request)).await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(err)) => {
                tracing::warn!(stage = %options.stage, error = %err, "LLM call failed");
                last_error = Some(err);
            }
            Err(_) => {
                return Err(AgentError::Timeout {
                    stage: options.stage.clone(),
                    seconds: options.timeout.as_secs(),
                });
            }
        }
    }

    Err(last_error.unwrap_or_else(|| AgentError::Transport {
        message: "no attempts were made".to_string(),
    }))
}

/// Extracts and parses the JSON payload from a raw response.
///
/// Tolerates markdown code fences and leading/trailing prose around a
/// single top-level JSON object or array.
fn parse_json_payload<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    let trimmed = content.trim();

    // Strip markdown code fences if present.
    let candidate = if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    };

    let direct_err = match serde_json::from_str::<T>(candidate) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    // Fall back to the outermost JSON object or array embedded in the
    // text (some models wrap payloads in prose despite instructions).
    if let Some(slice) = outermost_json(candidate)
        && let Ok(value) = serde_json::from_str::<T>(slice)
    {
        return Ok(value);
    }

    let preview_len = candidate.len().min(200);
    let preview = &candidate[..floor_boundary(candidate, preview_len)];
    Err(format!(
        "failed to parse response JSON: {direct_err}. Response length: {} bytes, preview: {preview:?}",
        candidate.len(),
    ))
}

/// Finds the outermost `{...}` or `[...]` slice in the text.
fn outermost_json(text: &str) -> Option<&str> {
    let open = text.find(['{', '['])?;
    let close_char = if text.as_bytes()[open] == b'{' { '}' } else { ']' };
    let close = text.rfind(close_char)?;
    (close > open).then(|| &text[open..=close])
}

/// Clamps a byte offset down to a char boundary.
fn floor_boundary(s: &str, mut pos: usize) -> usize {
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}
