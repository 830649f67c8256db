//! Background node rewrites.
//!
//! After repeated appends a node's content degrades into overlapping
//! fragments. The rewriter consumes [`RewriteRequest`]s from its own
//! channel, asks the LLM for a cleaned rewrite of the node's content
//! and summary, and applies it through `update_node` (optionally
//! moving the node under a better parent, cycle-guarded). Rewrites are
//! fire-and-forget: they never block the primary pipeline, at most one
//! rewrite is in flight per node id, and every failure is logged and
//! dropped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::agent::prompt::{render, PromptSet};
use crate::agent::{call_structured, CallOptions, LlmProvider, RewriteResponse, StageLogger};
use crate::apply::{DirtySet, RewriteRequest};
use crate::config::Config;
use crate::context::{render_context_block, ContextSelector};
use crate::tree::{DecisionTree, NodeId};

/// Debug-log stage name for rewrites.
const STAGE_REWRITE: &str = "rewrite";

/// Capacity of the rewrite request channel.
const REWRITE_QUEUE_CAPACITY: usize = 32;

/// Handle to the spawned rewriter task.
#[derive(Debug)]
pub struct BackgroundRewriter {
    handle: JoinHandle<()>,
}

/// Everything a single rewrite needs, cloneable across tasks.
struct RewriteContext {
    provider: Arc<dyn LlmProvider>,
    tree: Arc<RwLock<DecisionTree>>,
    dirty: DirtySet,
    selector: ContextSelector,
    prompts: PromptSet,
    logger: StageLogger,
    options: CallOptions,
    context_limit: usize,
}

impl BackgroundRewriter {
    /// Spawns the rewriter task and returns the request sender plus
    /// the task handle.
    #[must_use]
    pub fn spawn(
        provider: Arc<dyn LlmProvider>,
        tree: Arc<RwLock<DecisionTree>>,
        dirty: DirtySet,
        config: &Config,
    ) -> (mpsc::Sender<RewriteRequest>, Self) {
        let (tx, rx) = mpsc::channel(REWRITE_QUEUE_CAPACITY);
        let context = Arc::new(RewriteContext {
            provider,
            tree,
            dirty,
            selector: ContextSelector::new(&config.domain_stopwords),
            prompts: PromptSet::load(config.prompt_dir.as_deref()),
            logger: StageLogger::new(config.resolved_debug_log_dir()),
            options: CallOptions {
                stage: STAGE_REWRITE.to_string(),
                model: config.model_names.rewrite.clone(),
                timeout: config.llm_timeout,
                max_retries: config.max_retries,
            },
            context_limit: config.context_limit,
        });

        let handle = tokio::spawn(worker_loop(rx, context));
        (tx, Self { handle })
    }

    /// Waits up to `grace` for in-flight rewrites to finish, then
    /// aborts the task. The request channel must already be closed
    /// (all senders dropped) or the grace period will elapse.
    pub async fn shutdown(mut self, grace: Duration) {
        if tokio::time::timeout(grace, &mut self.handle).await.is_err() {
            tracing::warn!("background rewriter did not drain in time, aborting");
            self.handle.abort();
        }
    }
}

/// Consumes requests until the channel closes, one task per node with
/// per-node serialization.
async fn worker_loop(mut rx: mpsc::Receiver<RewriteRequest>, context: Arc<RewriteContext>) {
    let mut tasks: JoinSet<NodeId> = JoinSet::new();
    let mut in_flight: HashSet<NodeId> = HashSet::new();

    loop {
        tokio::select! {
            request = rx.recv() => {
                let Some(request) = request else { break };
                if in_flight.contains(&request.node_id) {
                    tracing::debug!(node_id = request.node_id, "rewrite already in flight, skipping");
                    continue;
                }
                in_flight.insert(request.node_id);
                let context = Arc::clone(&context);
                tasks.spawn(async move {
                    rewrite_node(&context, request.node_id).await;
                    request.node_id
                });
            }
            Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                if let Ok(node_id) = finished {
                    in_flight.remove(&node_id);
                }
            }
        }
    }

    // Channel closed: let in-flight rewrites run to completion. The
    // shutdown grace period bounds this from the outside.
    while tasks.join_next().await.is_some() {}
}

/// Runs one rewrite end to end. All failures log and return.
async fn rewrite_node(context: &RewriteContext, node_id: NodeId) {
    // Snapshot under the read lock; never hold it across an await.
    let Some((node, existing_nodes)) = snapshot_for_rewrite(context, node_id) else {
        tracing::warn!(node_id, "rewrite target disappeared");
        return;
    };

    let mut vars = HashMap::new();
    vars.insert("title", node.title.clone());
    vars.insert("content", node.content.clone());
    vars.insert("summary", node.summary.clone());
    vars.insert("transcript_history", node.transcript_history.clone());
    vars.insert("existing_nodes", existing_nodes);
    let prompt = render(&context.prompts.rewrite, &vars);

    let response =
        match call_structured::<RewriteResponse>(context.provider.as_ref(), &prompt, &context.options)
            .await
        {
            Ok((response, raw)) => {
                context.logger.log_stage(
                    STAGE_REWRITE,
                    &node.title,
                    &prompt,
                    &raw.content,
                    &response.content,
                );
                response
            }
            Err(e) => {
                tracing::warn!(node_id, error = %e, "background rewrite failed, dropping");
                context.logger.log_failure(STAGE_REWRITE, &prompt, "", &e.to_string());
                return;
            }
        };

    apply_rewrite(context, node_id, &response);
}

/// Clones the node and renders the context block under the read lock.
fn snapshot_for_rewrite(
    context: &RewriteContext,
    node_id: NodeId,
) -> Option<(crate::tree::Node, String)> {
    let tree = match context.tree.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let node = tree.get(node_id)?.clone();
    let selected = context
        .selector
        .select(&tree, context.context_limit, &node.title);
    let block = render_context_block(&selected, &tree);
    Some((node, block))
}

/// Applies the rewrite under the write lock.
fn apply_rewrite(context: &RewriteContext, node_id: NodeId, response: &RewriteResponse) {
    let mut tree = match context.tree.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    if let Err(e) = tree.update_node(node_id, &response.content, &response.summary) {
        tracing::warn!(node_id, error = %e, "rewrite could not be applied");
        return;
    }

    if let Some(parent_name) = response
        .new_parent
        .as_deref()
        .filter(|p| !p.trim().is_empty())
    {
        let new_parent = tree.resolve_name_to_id(parent_name);
        if new_parent != node_id && tree.get_parent_id(node_id) != Some(new_parent) {
            match tree.reparent(node_id, new_parent) {
                Ok(()) => {
                    context.dirty.insert(new_parent);
                    tracing::info!(node_id, new_parent, "rewrite moved node");
                }
                Err(e) => {
                    tracing::warn!(node_id, new_parent, error = %e, "rewrite reparent rejected");
                }
            }
        }
    }

    context.dirty.insert(node_id);
    tracing::info!(node_id, "applied background rewrite");
}
