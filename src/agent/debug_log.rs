//! Per-stage debug logging.
//!
//! Every stage appends its input state, rendered prompt, raw response,
//! and output state to `<debug_dir>/<stage>.log`. These logs exist for
//! prompt debugging; a logging failure must never affect the pipeline,
//! so every I/O error here is swallowed with a WARN.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

/// Appends stage records to per-stage log files.
#[derive(Debug, Clone)]
pub struct StageLogger {
    dir: Option<PathBuf>,
}

impl StageLogger {
    /// Creates a logger writing under `dir`. `None` disables logging.
    ///
    /// The directory is created lazily on first write.
    #[must_use]
    pub const fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Creates a disabled logger.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { dir: None }
    }

    /// Returns the log file path for a stage, if logging is enabled.
    #[must_use]
    pub fn stage_path(&self, stage: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{stage}.log")))
    }

    /// Logs one full stage execution.
    pub fn log_stage(&self, stage: &str, input: &str, prompt: &str, response: &str, output: &str) {
        let Some(path) = self.stage_path(stage) else {
            return;
        };
        let record = format!(
            "===== {timestamp} =====\n--- input ---\n{input}\n--- prompt ---\n{prompt}\n--- response ---\n{response}\n--- output ---\n{output}\n\n",
            timestamp = Utc::now().to_rfc3339(),
        );
        Self::append(&path, &record);
    }

    /// Logs a failed stage with the offending prompt and raw response
    /// verbatim.
    pub fn log_failure(&self, stage: &str, prompt: &str, response: &str, error: &str) {
        let Some(path) = self.stage_path(stage) else {
            return;
        };
        let record = format!(
            "===== {timestamp} FAILURE =====\n--- error ---\n{error}\n--- prompt ---\n{prompt}\n--- response ---\n{response}\n\n",
            timestamp = Utc::now().to_rfc3339(),
        );
        Self::append(&path, &record);
    }

    fn append(path: &Path, record: &str) {
        let result = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
            })
            .and_then(|mut file| file.write_all(record.as_bytes()));

        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "debug log write failed");
        }
    }
}
