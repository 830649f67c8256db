//! Pipeline configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.
//! There are no hidden globals: a [`Config`] is constructed at startup
//! and passed into the processor.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AgentError, Error};

/// Default buffer emission threshold in characters.
pub const DEFAULT_BUFFER_THRESHOLD: usize = 500;
/// Hard ceiling on accumulated buffer size before forced emission.
pub const BUFFER_HARD_CEILING: usize = 6_000;
/// Default rolling-transcript window size in multiples of the threshold.
pub const DEFAULT_HISTORY_MULTIPLIER: usize = 3;
/// Default maximum nodes passed to the agent per cycle.
const DEFAULT_CONTEXT_LIMIT: usize = 20;
/// Default recency slice within the context.
const DEFAULT_NUM_RECENT_NODES: usize = 10;
/// Default append count between background rewrites of a node.
const DEFAULT_REWRITE_EVERY_N_APPENDS: u32 = 2;
/// Default per-stage LLM timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Default max retries per LLM request.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default voice-source channel capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 64;
/// Default subdirectory for debug logs under the user data dir.
const DEFAULT_DEBUG_LOG_SUBDIR: &str = "voicetree/debug_logs";

/// Per-stage model identifiers passed through to the LLM provider.
#[derive(Debug, Clone)]
pub struct ModelNames {
    /// Model for the segmentation stage.
    pub segmentation: String,
    /// Model for the relationship-analysis stage.
    pub relationship: String,
    /// Model for the integration-decision stage.
    pub integration: String,
    /// Model for background node rewrites.
    pub rewrite: String,
}

impl Default for ModelNames {
    fn default() -> Self {
        let default_model = "gpt-5-mini-2025-08-07".to_string();
        Self {
            segmentation: default_model.clone(),
            relationship: default_model.clone(),
            integration: default_model.clone(),
            rewrite: default_model,
        }
    }
}

/// Configuration for the full pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// LLM provider name (e.g., "openai").
    pub provider: String,
    /// API key for the provider.
    pub api_key: String,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Per-stage model identifiers.
    pub model_names: ModelNames,
    /// Buffer emission size threshold in characters.
    pub buffer_size_threshold: usize,
    /// Rolling transcript window in multiples of the threshold.
    pub transcript_history_multiplier: usize,
    /// Maximum nodes passed to the agent per cycle.
    pub context_limit: usize,
    /// Recency slice within the context.
    pub num_recent_nodes_include: usize,
    /// A node is rewritten in the background after every N appends.
    pub background_rewrite_every_n_appends: u32,
    /// Directory for per-node Markdown files.
    pub output_dir: PathBuf,
    /// Optional path for the JSON state snapshot.
    pub state_file_path: Option<PathBuf>,
    /// Directory for per-stage debug logs.
    pub debug_log_dir: Option<PathBuf>,
    /// Directory containing prompt template overrides.
    pub prompt_dir: Option<PathBuf>,
    /// Per-stage LLM timeout.
    pub llm_timeout: Duration,
    /// Maximum retry attempts per LLM request.
    pub max_retries: u32,
    /// Voice-source channel capacity.
    pub queue_capacity: usize,
    /// Drop chunks instead of blocking when the queue is full.
    pub drop_when_full: bool,
    /// Additional domain-specific stopwords for relevance scoring.
    pub domain_stopwords: Vec<String>,
}

impl Config {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key is found.
    pub fn from_env() -> Result<Self, Error> {
        Self::builder().from_env().build()
    }

    /// Hard ceiling on accumulated buffer size before forced emission.
    #[must_use]
    pub const fn buffer_hard_ceiling(&self) -> usize {
        BUFFER_HARD_CEILING
    }

    /// Resolved debug-log directory.
    ///
    /// Resolution order: explicit config → `VOICETREE_DEBUG_DIR` env
    /// var → `<user data dir>/voicetree/debug_logs`.
    #[must_use]
    pub fn resolved_debug_log_dir(&self) -> Option<PathBuf> {
        self.debug_log_dir
            .clone()
            .or_else(|| std::env::var("VOICETREE_DEBUG_DIR").ok().map(PathBuf::from))
            .or_else(|| dirs::data_dir().map(|d| d.join(DEFAULT_DEBUG_LOG_SUBDIR)))
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    model_names: Option<ModelNames>,
    buffer_size_threshold: Option<usize>,
    transcript_history_multiplier: Option<usize>,
    context_limit: Option<usize>,
    num_recent_nodes_include: Option<usize>,
    background_rewrite_every_n_appends: Option<u32>,
    output_dir: Option<PathBuf>,
    state_file_path: Option<PathBuf>,
    debug_log_dir: Option<PathBuf>,
    prompt_dir: Option<PathBuf>,
    llm_timeout: Option<Duration>,
    max_retries: Option<u32>,
    queue_capacity: Option<usize>,
    drop_when_full: Option<bool>,
    domain_stopwords: Option<Vec<String>>,
}

impl ConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = std::env::var("VOICETREE_PROVIDER").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("VOICETREE_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("OPENAI_BASE_URL")
                .or_else(|_| std::env::var("VOICETREE_BASE_URL"))
                .ok();
        }
        if self.buffer_size_threshold.is_none() {
            self.buffer_size_threshold = std::env::var("VOICETREE_BUFFER_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.context_limit.is_none() {
            self.context_limit = std::env::var("VOICETREE_CONTEXT_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.output_dir.is_none() {
            self.output_dir = std::env::var("VOICETREE_OUTPUT_DIR").ok().map(PathBuf::from);
        }
        if self.state_file_path.is_none() {
            self.state_file_path = std::env::var("VOICETREE_STATE_FILE").ok().map(PathBuf::from);
        }
        if self.debug_log_dir.is_none() {
            self.debug_log_dir = std::env::var("VOICETREE_DEBUG_DIR").ok().map(PathBuf::from);
        }
        if self.prompt_dir.is_none() {
            self.prompt_dir = std::env::var("VOICETREE_PROMPT_DIR").ok().map(PathBuf::from);
        }
        self
    }

    /// Sets the LLM provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the per-stage model names.
    #[must_use]
    pub fn model_names(mut self, names: ModelNames) -> Self {
        self.model_names = Some(names);
        self
    }

    /// Sets the buffer emission threshold.
    #[must_use]
    pub const fn buffer_size_threshold(mut self, n: usize) -> Self {
        self.buffer_size_threshold = Some(n);
        self
    }

    /// Sets the transcript-history multiplier.
    #[must_use]
    pub const fn transcript_history_multiplier(mut self, n: usize) -> Self {
        self.transcript_history_multiplier = Some(n);
        self
    }

    /// Sets the context limit.
    #[must_use]
    pub const fn context_limit(mut self, n: usize) -> Self {
        self.context_limit = Some(n);
        self
    }

    /// Sets the recency slice size.
    #[must_use]
    pub const fn num_recent_nodes_include(mut self, n: usize) -> Self {
        self.num_recent_nodes_include = Some(n);
        self
    }

    /// Sets the background-rewrite append interval.
    #[must_use]
    pub const fn background_rewrite_every_n_appends(mut self, n: u32) -> Self {
        self.background_rewrite_every_n_appends = Some(n);
        self
    }

    /// Sets the Markdown output directory.
    #[must_use]
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Sets the state snapshot path.
    #[must_use]
    pub fn state_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file_path = Some(path.into());
        self
    }

    /// Sets the debug-log directory.
    #[must_use]
    pub fn debug_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_log_dir = Some(dir.into());
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Sets the per-stage LLM timeout.
    #[must_use]
    pub const fn llm_timeout(mut self, duration: Duration) -> Self {
        self.llm_timeout = Some(duration);
        self
    }

    /// Sets the max retries.
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Sets the voice-source channel capacity.
    #[must_use]
    pub const fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = Some(n);
        self
    }

    /// Sets whether to drop chunks when the queue is full.
    #[must_use]
    pub const fn drop_when_full(mut self, drop: bool) -> Self {
        self.drop_when_full = Some(drop);
        self
    }

    /// Sets additional domain-specific stopwords.
    #[must_use]
    pub fn domain_stopwords(mut self, words: Vec<String>) -> Self {
        self.domain_stopwords = Some(words);
        self
    }

    /// Builds the [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key was set, or
    /// a configuration error for out-of-range values.
    pub fn build(self) -> Result<Config, Error> {
        let api_key = self.api_key.ok_or(AgentError::ApiKeyMissing)?;

        let buffer_size_threshold = self.buffer_size_threshold.unwrap_or(DEFAULT_BUFFER_THRESHOLD);
        if buffer_size_threshold == 0 {
            return Err(Error::Config {
                message: "buffer_size_threshold must be > 0".to_string(),
            });
        }
        if buffer_size_threshold > BUFFER_HARD_CEILING {
            return Err(Error::Config {
                message: format!(
                    "buffer_size_threshold ({buffer_size_threshold}) exceeds the hard ceiling ({BUFFER_HARD_CEILING})"
                ),
            });
        }

        Ok(Config {
            provider: self.provider.unwrap_or_else(|| "openai".to_string()),
            api_key,
            base_url: self.base_url,
            model_names: self.model_names.unwrap_or_default(),
            buffer_size_threshold,
            transcript_history_multiplier: self
                .transcript_history_multiplier
                .unwrap_or(DEFAULT_HISTORY_MULTIPLIER),
            context_limit: self.context_limit.unwrap_or(DEFAULT_CONTEXT_LIMIT),
            num_recent_nodes_include: self
                .num_recent_nodes_include
                .unwrap_or(DEFAULT_NUM_RECENT_NODES),
            background_rewrite_every_n_appends: self
                .background_rewrite_every_n_appends
                .unwrap_or(DEFAULT_REWRITE_EVERY_N_APPENDS),
            output_dir: self
                .output_dir
                .unwrap_or_else(|| PathBuf::from("markdown_vault")),
            state_file_path: self.state_file_path,
            debug_log_dir: self.debug_log_dir,
            prompt_dir: self.prompt_dir,
            llm_timeout: self
                .llm_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            drop_when_full: self.drop_when_full.unwrap_or(false),
            domain_stopwords: self.domain_stopwords.unwrap_or_default(),
        })
    }
}
