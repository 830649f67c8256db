//! Top-level coordinator: the only public entry point of the pipeline.
//!
//! The processor receives transcript chunks from the voice source,
//! drives buffer → context selection → staged agent → mutation →
//! projection, and owns the shutdown sequence. One chunk is fully
//! processed before the next begins; the voice source hands chunks
//! over a bounded channel. Recoverable failures abandon the cycle and
//! retain the buffered text; only invariant violations and
//! configuration errors propagate.

use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;

use crate::agent::{LlmProvider, StagedAgent};
use crate::apply::{DirtySet, MutationApplier};
use crate::buffer::StreamBuffer;
use crate::config::Config;
use crate::context::{render_context_block, ContextSelector};
use crate::error::{Error, Result};
use crate::project::MarkdownProjector;
use crate::rewrite::BackgroundRewriter;
use crate::snapshot::{ExecutionRecord, StateSnapshot};
use crate::tree::DecisionTree;

/// Grace period for draining background rewrites at shutdown.
const REWRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Filename of the finalize-time report.
const REPORT_FILENAME: &str = "PROCESSING_REPORT.md";

/// Counters accumulated across the processor's lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessingMetrics {
    /// Chunks received from the voice source.
    pub chunks_received: usize,
    /// Pipeline cycles executed (segments processed).
    pub cycles: usize,
    /// Nodes created.
    pub nodes_created: usize,
    /// Append operations applied.
    pub nodes_appended: usize,
    /// Decisions skipped or cycles abandoned.
    pub errors: usize,
    /// Total wall-clock time spent in cycles.
    pub total_elapsed: Duration,
}

/// The pipeline coordinator.
pub struct ChunkProcessor {
    config: Config,
    buffer: StreamBuffer,
    tree: Arc<RwLock<DecisionTree>>,
    selector: ContextSelector,
    agent: StagedAgent,
    applier: MutationApplier,
    projector: MarkdownProjector,
    dirty: DirtySet,
    rewriter: Option<BackgroundRewriter>,
    metrics: ProcessingMetrics,
    execution_history: Vec<ExecutionRecord>,
}

impl std::fmt::Debug for ChunkProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkProcessor")
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl ChunkProcessor {
    /// Creates a processor, verifying the output directory and
    /// spawning the background rewriter.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the output directory cannot
    /// be created.
    pub fn new(config: Config, provider: Arc<dyn LlmProvider>) -> Result<Self> {
        std::fs::create_dir_all(&config.output_dir).map_err(|e| Error::Config {
            message: format!(
                "cannot create output directory {}: {e}",
                config.output_dir.display()
            ),
        })?;

        let tree = Arc::new(RwLock::new(DecisionTree::new()));
        let dirty = DirtySet::new();

        // Prior-run state is informational: the Markdown projection is
        // the durable artifact, the snapshot carries history forward.
        let execution_history = config
            .state_file_path
            .as_ref()
            .and_then(|path| StateSnapshot::load(path))
            .map(|snapshot| {
                tracing::info!(
                    nodes = snapshot.nodes.len(),
                    executions = snapshot.execution_history.len(),
                    "loaded prior state snapshot"
                );
                snapshot.execution_history
            })
            .unwrap_or_default();

        let (rewrite_tx, rewriter) = BackgroundRewriter::spawn(
            Arc::clone(&provider),
            Arc::clone(&tree),
            dirty.clone(),
            &config,
        );

        let applier = MutationApplier::new(
            dirty.clone(),
            config.background_rewrite_every_n_appends,
            Some(rewrite_tx),
        );

        Ok(Self {
            buffer: StreamBuffer::new(
                config.buffer_size_threshold,
                config.transcript_history_multiplier,
            ),
            selector: ContextSelector::new(&config.domain_stopwords),
            agent: StagedAgent::new(provider, &config),
            applier,
            projector: MarkdownProjector::new(),
            dirty,
            rewriter: Some(rewriter),
            metrics: ProcessingMetrics::default(),
            execution_history,
            tree,
            config,
        })
    }

    /// Read access to the tree for inspection and tests.
    #[must_use]
    pub fn tree(&self) -> RwLockReadGuard<'_, DecisionTree> {
        match self.tree.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current metrics.
    #[must_use]
    pub const fn metrics(&self) -> ProcessingMetrics {
        self.metrics
    }

    /// Processes one transcript chunk from the voice source.
    ///
    /// Returns without effect while the buffer accumulates. A cycle
    /// abandoned on an LLM failure restores its text to the buffer.
    ///
    /// # Errors
    ///
    /// Propagates only non-recoverable errors (invariant violations,
    /// unusable output directory).
    pub async fn process(&mut self, chunk: &str) -> Result<()> {
        self.metrics.chunks_received += 1;
        let Some(segment) = self.buffer.add_text(chunk) else {
            return Ok(());
        };
        self.run_cycle(&segment).await
    }

    /// Flushes remaining buffered text, projects everything dirty,
    /// writes the processing report, and stops the rewriter.
    ///
    /// # Errors
    ///
    /// Propagates only non-recoverable errors.
    pub async fn finalize(&mut self) -> Result<()> {
        if let Some(rest) = self.buffer.force_drain() {
            tracing::info!(len = rest.len(), "processing remaining buffered text");
            self.run_cycle(&rest).await?;
        }

        self.project_dirty()?;
        self.save_snapshot();
        self.write_report();

        // Closing the request channel lets the rewriter drain.
        self.applier.disable_rewrites();
        if let Some(rewriter) = self.rewriter.take() {
            rewriter.shutdown(REWRITER_SHUTDOWN_GRACE).await;
        }
        // Rewrites may have dirtied nodes while draining.
        self.project_dirty()?;
        Ok(())
    }

    /// One full pipeline cycle over an emitted segment.
    async fn run_cycle(&mut self, segment: &str) -> Result<()> {
        let started = Instant::now();
        self.metrics.cycles += 1;

        // Context block from a consistent tree snapshot.
        let existing_nodes = {
            let tree = self.tree();
            let selected = self
                .selector
                .select(&tree, self.config.context_limit, segment);
            render_context_block(&selected, &tree)
        };
        let transcript_history = self.buffer.transcript_history();

        let outcome = match self
            .agent
            .run(segment, &transcript_history, &existing_nodes)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // Abandon the cycle; the text gets another chance.
                tracing::warn!(error = %e, "cycle abandoned, retaining segment");
                self.buffer.restore_segment(segment);
                self.metrics.errors += 1;
                return Ok(());
            }
        };

        if let Some(remainder) = &outcome.incomplete_remainder {
            self.buffer.set_incomplete_remainder(remainder);
        }

        let stats = {
            let tree = Arc::clone(&self.tree);
            let mut tree = match tree.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            self.applier.apply(&mut tree, &outcome.decisions, segment)
        };
        self.metrics.nodes_created += stats.created;
        self.metrics.nodes_appended += stats.appended;
        self.metrics.errors += stats.skipped;

        self.project_dirty()?;

        self.execution_history.push(ExecutionRecord {
            at: Utc::now(),
            segment_chars: segment.len(),
            decisions: outcome.decisions.len(),
        });
        self.save_snapshot();

        self.metrics.total_elapsed += started.elapsed();
        tracing::info!(
            created = stats.created,
            appended = stats.appended,
            skipped = stats.skipped,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "cycle complete"
        );
        Ok(())
    }

    /// Drains the dirty set and projects it; failed ids return to the
    /// dirty set for retry on the next cycle.
    fn project_dirty(&mut self) -> Result<()> {
        let dirty_ids = self.dirty.drain();
        if dirty_ids.is_empty() {
            return Ok(());
        }
        let failed = {
            let tree = self.tree();
            self.projector
                .project(&tree, &dirty_ids, &self.config.output_dir)?
        };
        if !failed.is_empty() {
            self.metrics.errors += failed.len();
            self.dirty.extend(failed);
        }
        Ok(())
    }

    /// Saves the state snapshot if a path is configured.
    fn save_snapshot(&self) {
        let Some(path) = &self.config.state_file_path else {
            return;
        };
        let snapshot = {
            let tree = self.tree();
            StateSnapshot::capture(&tree, self.execution_history.clone())
        };
        snapshot.save(path);
    }

    /// Writes the finalize-time processing report.
    fn write_report(&self) {
        let tree_size = self.tree().len();
        let report = format!(
            "# VoiceTree Processing Report\n\n\
             Generated: {now}\n\n\
             ## Configuration\n\n\
             - Provider: {provider}\n\
             - Buffer threshold: {threshold} chars\n\
             - Context limit: {context_limit} nodes\n\
             - Background rewrite every {rewrite_n} appends\n\
             - Output directory: `{output_dir}`\n\n\
             ## Metrics\n\n\
             - Chunks received: {chunks}\n\
             - Cycles: {cycles}\n\
             - Nodes created: {created}\n\
             - Appends applied: {appended}\n\
             - Errors: {errors}\n\
             - Total processing time: {elapsed:.2}s\n\n\
             ## Tree\n\n\
             - Nodes: {tree_size}\n",
            now = Utc::now().format("%Y-%m-%d %H:%M:%S"),
            provider = self.config.provider,
            threshold = self.config.buffer_size_threshold,
            context_limit = self.config.context_limit,
            rewrite_n = self.config.background_rewrite_every_n_appends,
            output_dir = self.config.output_dir.display(),
            chunks = self.metrics.chunks_received,
            cycles = self.metrics.cycles,
            created = self.metrics.nodes_created,
            appended = self.metrics.nodes_appended,
            errors = self.metrics.errors,
            elapsed = self.metrics.total_elapsed.as_secs_f64(),
        );

        let path = self.config.output_dir.join(REPORT_FILENAME);
        if let Err(e) = std::fs::write(&path, report) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write processing report");
        }
    }
}

/// Creates the bounded voice-source channel for a configuration.
#[must_use]
pub fn chunk_channel(config: &Config) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(config.queue_capacity.max(1))
}

/// Delivers one chunk from the voice source.
///
/// Blocks when the queue is full unless `drop_when_full` is set, in
/// which case the chunk is discarded with a warning. Returns `false`
/// when the chunk was dropped or the pipeline is gone.
pub async fn feed_chunk(tx: &mpsc::Sender<String>, chunk: String, drop_when_full: bool) -> bool {
    if drop_when_full {
        match tx.try_send(chunk) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("pipeline queue full, dropping chunk");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    } else {
        tx.send(chunk).await.is_ok()
    }
}

/// Consumes the voice-source channel in arrival order, then finalizes.
///
/// # Errors
///
/// Propagates non-recoverable processor errors.
pub async fn run_pipeline(
    mut rx: mpsc::Receiver<String>,
    processor: &mut ChunkProcessor,
) -> Result<()> {
    while let Some(chunk) = rx.recv().await {
        processor.process(&chunk).await?;
    }
    processor.finalize().await
}
