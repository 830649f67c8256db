//! Command-line interface.
//!
//! `voicetree run` replays a transcript file (or stdin) through the
//! pipeline in voice-sized bursts; `voicetree prompts` scaffolds the
//! stage prompt templates for customization.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::agent::{create_provider, PromptSet};
use crate::config::Config;
use crate::io::{read_transcript, BurstIter};
use crate::processor::{chunk_channel, feed_chunk, run_pipeline, ChunkProcessor};

/// Default burst size when replaying a transcript, approximating one
/// voice-to-text emission.
const DEFAULT_BURST_SIZE: usize = 120;

/// Convert live voice transcripts into a Markdown knowledge tree.
#[derive(Debug, Parser)]
#[command(name = "voicetree", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Replay a transcript through the pipeline.
    Run {
        /// Transcript file to process, or `-` for stdin.
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Directory for the per-node Markdown files.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Path for the JSON state snapshot.
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Directory with prompt template overrides.
        #[arg(long)]
        prompt_dir: Option<PathBuf>,

        /// Buffer emission threshold in characters.
        #[arg(long)]
        buffer_threshold: Option<usize>,

        /// Burst size for replay, in characters.
        #[arg(long, default_value_t = DEFAULT_BURST_SIZE)]
        burst_size: usize,
    },

    /// Write the default prompt templates to a directory for editing.
    Prompts {
        /// Target directory (defaults to the user prompt directory).
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

/// Executes the parsed CLI command, returning the text to print.
///
/// # Errors
///
/// Returns an error for configuration problems, unreadable input, or
/// non-recoverable pipeline failures.
pub async fn execute(cli: Cli) -> anyhow::Result<String> {
    match cli.command {
        Commands::Run {
            input,
            output_dir,
            state_file,
            prompt_dir,
            buffer_threshold,
            burst_size,
        } => {
            let mut builder = Config::builder().from_env();
            if let Some(dir) = output_dir {
                builder = builder.output_dir(dir);
            }
            if let Some(path) = state_file {
                builder = builder.state_file_path(path);
            }
            if let Some(dir) = prompt_dir {
                builder = builder.prompt_dir(dir);
            }
            if let Some(threshold) = buffer_threshold {
                builder = builder.buffer_size_threshold(threshold);
            }
            let config = builder.build()?;

            run_transcript(&input, config, burst_size).await
        }

        Commands::Prompts { dir } => {
            let target = dir
                .or_else(|| dirs::home_dir().map(|h| h.join(".config/voicetree/prompts")))
                .ok_or_else(|| anyhow::anyhow!("no prompt directory given and no home directory"))?;
            let written = PromptSet::write_defaults(&target)?;
            if written.is_empty() {
                Ok(format!("All templates already present in {}\n", target.display()))
            } else {
                Ok(format!(
                    "Wrote {} template(s) to {}\n",
                    written.len(),
                    target.display()
                ))
            }
        }
    }
}

/// Reads the transcript and drives it through the pipeline.
async fn run_transcript(input: &str, config: Config, burst_size: usize) -> anyhow::Result<String> {
    let transcript = if input == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        read_transcript(input)?
    };

    let provider: Arc<dyn crate::agent::LlmProvider> = Arc::from(create_provider(&config)?);
    let output_dir = config.output_dir.clone();
    let drop_when_full = config.drop_when_full;
    let (tx, rx) = chunk_channel(&config);
    let mut processor = ChunkProcessor::new(config, provider)?;

    let producer = tokio::spawn(async move {
        for burst in BurstIter::new(&transcript, burst_size) {
            if !feed_chunk(&tx, burst.to_string(), drop_when_full).await {
                tracing::warn!("chunk not delivered to pipeline");
            }
        }
    });

    run_pipeline(rx, &mut processor).await?;
    producer
        .await
        .map_err(|e| anyhow::anyhow!("voice-source task failed: {e}"))?;

    let metrics = processor.metrics();
    Ok(format!(
        "Processed {} chunk(s) in {} cycle(s): {} node(s) created, {} append(s), {} error(s).\n\
         Markdown written to {}\n",
        metrics.chunks_received,
        metrics.cycles,
        metrics.nodes_created,
        metrics.nodes_appended,
        metrics.errors,
        output_dir.display(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["voicetree", "run"]).unwrap();
        match cli.command {
            Commands::Run { input, burst_size, .. } => {
                assert_eq!(input, "-");
                assert_eq!(burst_size, DEFAULT_BURST_SIZE);
            }
            Commands::Prompts { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_with_flags() {
        let cli = Cli::try_parse_from([
            "voicetree",
            "run",
            "--input",
            "meeting.txt",
            "--output-dir",
            "/tmp/vault",
            "--buffer-threshold",
            "200",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                input,
                output_dir,
                buffer_threshold,
                ..
            } => {
                assert_eq!(input, "meeting.txt");
                assert_eq!(output_dir, Some(PathBuf::from("/tmp/vault")));
                assert_eq!(buffer_threshold, Some(200));
            }
            Commands::Prompts { .. } => panic!("expected run"),
        }
    }

    #[tokio::test]
    async fn test_prompts_command_writes_templates() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("prompts");
        let cli = Cli::try_parse_from([
            "voicetree",
            "prompts",
            "--dir",
            target.to_str().unwrap(),
        ])
        .unwrap();
        let output = execute(cli).await.unwrap();
        assert!(output.contains("Wrote 4 template(s)"));
        assert!(target.join("segmentation.md").exists());
    }
}
