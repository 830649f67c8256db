//! Adaptive stream buffer for transcript segmentation.
//!
//! Voice-to-text engines emit text in arbitrarily sized bursts with
//! unreliable punctuation. The [`StreamBuffer`] accumulates those bursts
//! and decides per call whether enough coherent text has arrived to hand
//! a segment to the pipeline: either the burst alone meets the size
//! threshold, or it carries at least two genuine sentence endings, or a
//! previously incomplete remainder was just completed. A hard ceiling
//! bounds memory growth regardless of punctuation.

use std::sync::Mutex;

use regex::Regex;
use std::sync::LazyLock;

use crate::config::{BUFFER_HARD_CEILING, DEFAULT_BUFFER_THRESHOLD, DEFAULT_HISTORY_MULTIPLIER};

/// Sentence terminators preceded by a known abbreviation do not count
/// as sentence endings (e.g. "Dr." in "Dr. Smith").
#[allow(clippy::unwrap_used)]
static ABBREV_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Dr|Mr|Ms|Mrs|Prof|Inc|Ltd|etc|vs|i\.e|e\.g)\.?$").unwrap()
});

/// Sentence-terminator runs (`.`, `!`, `?`).
#[allow(clippy::unwrap_used)]
static TERMINATOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").unwrap());

/// Minimum number of genuine sentence endings that triggers immediate
/// processing of a burst below the size threshold.
const MIN_SENTENCE_ENDINGS: usize = 2;

/// Interior state of the buffer, guarded by a single lock.
#[derive(Debug, Default)]
struct BufferState {
    /// Current accumulator awaiting emission.
    text_buffer: String,
    /// Rolling transcript window used as prompt context.
    transcript_history: String,
    /// Trailing fragment handed back by the agent after a segment
    /// ended mid-thought.
    incomplete_remainder: String,
    /// Latched false after the first emission.
    first_processing: bool,
}

/// Snapshot of buffer sizes for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    /// Bytes currently accumulated.
    pub text_buffer_len: usize,
    /// Bytes of rolling transcript history.
    pub transcript_history_len: usize,
    /// Bytes of pending incomplete remainder.
    pub incomplete_remainder_len: usize,
    /// Configured emission threshold.
    pub threshold: usize,
}

/// Thread-safe adaptive stream buffer.
///
/// All operations lock a single interior [`Mutex`]; the voice-source
/// thread may call [`add_text`](Self::add_text) while the pipeline
/// thread reads [`transcript_history`](Self::transcript_history).
///
/// # Examples
///
/// ```
/// use voicetree::buffer::StreamBuffer;
///
/// let buffer = StreamBuffer::new(500, 3);
/// // Two genuine sentence endings emit immediately.
/// let segment = buffer.add_text("First thought. Second thought.");
/// assert!(segment.is_some());
/// ```
#[derive(Debug)]
pub struct StreamBuffer {
    threshold: usize,
    history_limit: usize,
    state: Mutex<BufferState>,
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_THRESHOLD, DEFAULT_HISTORY_MULTIPLIER)
    }
}

impl StreamBuffer {
    /// Creates a buffer with the given emission threshold and
    /// transcript-history multiplier.
    #[must_use]
    pub fn new(threshold: usize, history_multiplier: usize) -> Self {
        Self {
            threshold,
            history_limit: threshold.saturating_mul(history_multiplier),
            state: Mutex::new(BufferState {
                first_processing: true,
                ..BufferState::default()
            }),
        }
    }

    /// Appends a transcript burst and returns a segment ready for
    /// processing, or `None` while the buffer accumulates.
    ///
    /// Empty or whitespace-only input returns `None` without any state
    /// change. A pending incomplete remainder is prepended (and
    /// cleared) before the decision policy runs.
    pub fn add_text(&self, chunk: &str) -> Option<String> {
        if chunk.trim().is_empty() {
            return None;
        }

        let mut state = self.lock();

        // Consume any pending remainder first. Joined without an
        // inserted space: transcription bursts carry their own
        // spacing, so direct concatenation heals mid-word splits
        // ("transfor" + "mer models").
        let had_remainder = !state.incomplete_remainder.is_empty();
        let full_text = if had_remainder {
            let combined = format!("{}{}", state.incomplete_remainder, chunk);
            state.incomplete_remainder.clear();
            tracing::debug!(len = combined.len(), "prepended incomplete remainder");
            combined
        } else {
            chunk.to_string()
        };

        // Safety escape: never let the accumulator outgrow the ceiling.
        if state.text_buffer.len() + full_text.len() > BUFFER_HARD_CEILING {
            tracing::warn!(
                buffered = state.text_buffer.len(),
                incoming = full_text.len(),
                "buffer hard ceiling reached, forcing emission"
            );
            Self::push_history(&mut state, self.history_limit, &full_text);
            let mut segment = std::mem::take(&mut state.text_buffer);
            if !segment.is_empty() && !segment.ends_with(' ') {
                segment.push(' ');
            }
            segment.push_str(&full_text);
            return Some(segment.trim().to_string());
        }

        if Self::should_process_immediately(&full_text, self.threshold, had_remainder) {
            Self::push_history(&mut state, self.history_limit, &full_text);
            // Anything already buffered is flushed with the burst so
            // segments preserve arrival order.
            let mut segment = std::mem::take(&mut state.text_buffer);
            if !segment.is_empty() && !segment.ends_with(' ') {
                segment.push(' ');
            }
            segment.push_str(&full_text);
            return Some(segment.trim().to_string());
        }

        // Accumulate and emit once the threshold is met.
        state.text_buffer.push_str(&full_text);
        state.text_buffer.push(' ');
        Self::push_history(&mut state, self.history_limit, &full_text);

        if state.text_buffer.trim().len() >= self.threshold {
            let segment = std::mem::take(&mut state.text_buffer);
            tracing::debug!(len = segment.len(), "buffer reached threshold, emitting");
            return Some(segment.trim().to_string());
        }

        tracing::trace!(
            buffered = state.text_buffer.len(),
            threshold = self.threshold,
            "buffer accumulating"
        );
        None
    }

    /// Stores an incomplete trailing fragment to be prepended to the
    /// next burst. An empty remainder clears the pending fragment.
    pub fn set_incomplete_remainder(&self, remainder: &str) {
        let mut state = self.lock();
        state.incomplete_remainder = remainder.trim().to_string();
        if !state.incomplete_remainder.is_empty() {
            tracing::debug!(
                len = state.incomplete_remainder.len(),
                "stored incomplete remainder"
            );
        }
    }

    /// Re-queues an emitted segment after an abandoned pipeline cycle
    /// so its text is retried on the next cycle.
    pub fn restore_segment(&self, segment: &str) {
        if segment.trim().is_empty() {
            return;
        }
        let mut state = self.lock();
        let existing = std::mem::take(&mut state.text_buffer);
        state.text_buffer = format!("{} {existing}", segment.trim());
        tracing::debug!(len = segment.len(), "restored abandoned segment");
    }

    /// Returns the rolling transcript window.
    #[must_use]
    pub fn transcript_history(&self) -> String {
        self.lock().transcript_history.clone()
    }

    /// Drains everything still buffered (threshold bypassed), for use
    /// at shutdown. Returns `None` when nothing is pending.
    #[must_use]
    pub fn force_drain(&self) -> Option<String> {
        let mut state = self.lock();
        let mut pending = std::mem::take(&mut state.text_buffer);
        let remainder = std::mem::take(&mut state.incomplete_remainder);
        if !remainder.is_empty() {
            pending = if pending.trim().is_empty() {
                remainder
            } else {
                format!("{remainder} {pending}")
            };
        }
        let pending = pending.trim().to_string();
        if pending.is_empty() {
            None
        } else {
            Some(pending)
        }
    }

    /// One-shot latch: `true` on the first call after construction (or
    /// [`clear`](Self::clear)), `false` afterwards.
    #[must_use]
    pub fn is_first_processing(&self) -> bool {
        let mut state = self.lock();
        if state.first_processing {
            state.first_processing = false;
            true
        } else {
            false
        }
    }

    /// Clears all buffers and re-arms the first-processing latch.
    pub fn clear(&self) {
        let mut state = self.lock();
        *state = BufferState {
            first_processing: true,
            ..BufferState::default()
        };
    }

    /// Returns current buffer sizes.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        let state = self.lock();
        BufferStats {
            text_buffer_len: state.text_buffer.len(),
            transcript_history_len: state.transcript_history.len(),
            incomplete_remainder_len: state.incomplete_remainder.len(),
            threshold: self.threshold,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        // A poisoned lock means another thread panicked mid-update;
        // the buffer content is still structurally valid text.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Decision: process `text` now, or buffer for more.
    fn should_process_immediately(text: &str, threshold: usize, had_remainder: bool) -> bool {
        if text.trim().len() >= threshold {
            return true;
        }
        if Self::count_sentence_endings(text) >= MIN_SENTENCE_ENDINGS {
            return true;
        }
        // Flush a completed remainder promptly with its new context.
        had_remainder
    }

    /// Counts sentence-terminator runs that are not abbreviation dots.
    fn count_sentence_endings(text: &str) -> usize {
        TERMINATOR_PATTERN
            .find_iter(text)
            .filter(|m| {
                let before = text[..m.start()].trim_end();
                // Check the final word plus the terminator itself, so
                // "i.e." and "e.g." match the abbreviation list.
                let tail_start = before
                    .rfind(char::is_whitespace)
                    .map_or(0, |pos| pos + 1);
                !ABBREV_PATTERN.is_match(&before[tail_start..])
            })
            .count()
    }

    fn push_history(state: &mut BufferState, limit: usize, text: &str) {
        state.transcript_history.push_str(text);
        state.transcript_history.push(' ');
        if state.transcript_history.len() > limit {
            let cut = state.transcript_history.len() - limit;
            let cut = ceil_char_boundary(&state.transcript_history, cut);
            state.transcript_history.drain(..cut);
        }
    }
}

/// Returns the smallest char boundary at or after `pos`.
fn ceil_char_boundary(s: &str, pos: usize) -> usize {
    let mut boundary = pos;
    while boundary < s.len() && !s.is_char_boundary(boundary) {
        boundary += 1;
    }
    boundary
}
