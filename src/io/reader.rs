//! Transcript file reading with memory mapping support.
//!
//! Replay transcripts can be hours of speech; files at or above the
//! mmap threshold are memory-mapped instead of read into an
//! intermediate buffer. [`BurstIter`] then yields word-preserving
//! bursts of roughly fixed size so the CLI can feed the pipeline the
//! way a live voice source would.

// Memory mapping requires unsafe but is safe for read-only access.
#![allow(unsafe_code)]

use std::fs::File;
use std::io::Read;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{IoError, Result};

/// Threshold for using memory mapping (1MB).
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Maximum transcript size to accept (1GB).
const MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Reader for a transcript file.
///
/// Chooses the read strategy by size: small files are read directly,
/// large files are memory-mapped.
///
/// # Examples
///
/// ```no_run
/// use voicetree::io::TranscriptReader;
///
/// let reader = TranscriptReader::open("meeting.txt").unwrap();
/// let transcript = reader.read_to_string().unwrap();
/// ```
pub struct TranscriptReader {
    /// File handle.
    file: File,
    /// File size in bytes.
    size: u64,
    /// File path for error messages.
    path: String,
}

impl TranscriptReader {
    /// Opens a transcript file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist, can't be opened, or
    /// exceeds the size cap.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy().to_string();

        if !path_ref.exists() {
            return Err(IoError::FileNotFound { path: path_str }.into());
        }

        let file = File::open(path_ref).map_err(|e| IoError::ReadFailed {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;

        let metadata = file.metadata().map_err(|e| IoError::ReadFailed {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;

        let size = metadata.len();
        if size > MAX_FILE_SIZE {
            return Err(IoError::ReadFailed {
                path: path_str,
                reason: format!("file too large: {size} bytes (max: {MAX_FILE_SIZE} bytes)"),
            }
            .into());
        }

        Ok(Self {
            file,
            size,
            path: path_str,
        })
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Reads the transcript as a string, memory-mapping large files.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or content is not valid UTF-8.
    pub fn read_to_string(&self) -> Result<String> {
        let bytes = if self.size >= MMAP_THRESHOLD {
            self.read_mmap_bytes()?
        } else {
            self.read_direct_bytes()?
        };
        String::from_utf8(bytes).map_err(|e| {
            IoError::ReadFailed {
                path: self.path.clone(),
                reason: format!("invalid UTF-8: {e}"),
            }
            .into()
        })
    }

    /// Reads bytes using memory mapping.
    fn read_mmap_bytes(&self) -> Result<Vec<u8>> {
        // Safety: we only read from the mapping.
        let mmap = unsafe {
            Mmap::map(&self.file).map_err(|e| IoError::MmapFailed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?
        };
        Ok(mmap.to_vec())
    }

    /// Reads bytes directly into memory.
    #[allow(clippy::cast_possible_truncation)]
    fn read_direct_bytes(&self) -> Result<Vec<u8>> {
        let mut file = &self.file;
        let mut buffer = Vec::with_capacity(self.size as usize);
        file.read_to_end(&mut buffer)
            .map_err(|e| IoError::ReadFailed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(buffer)
    }
}

/// Reads a transcript file to a string.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid UTF-8.
pub fn read_transcript<P: AsRef<Path>>(path: P) -> Result<String> {
    TranscriptReader::open(path)?.read_to_string()
}

/// Iterator yielding word-preserving bursts of approximately
/// `burst_size` characters, simulating voice-to-text output.
///
/// Words are never split; a burst ends at the first whitespace at or
/// after the target size.
#[derive(Debug)]
pub struct BurstIter<'a> {
    remaining: &'a str,
    burst_size: usize,
}

impl<'a> BurstIter<'a> {
    /// Creates a burst iterator over a transcript.
    #[must_use]
    pub const fn new(transcript: &'a str, burst_size: usize) -> Self {
        Self {
            remaining: transcript,
            burst_size: if burst_size == 0 { 1 } else { burst_size },
        }
    }
}

impl<'a> Iterator for BurstIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let text = self.remaining.trim_start();
        if text.is_empty() {
            self.remaining = "";
            return None;
        }
        if text.len() <= self.burst_size {
            self.remaining = "";
            return Some(text);
        }

        // Cut at the first whitespace at or after the target size.
        let target = ceil_char_boundary(text, self.burst_size);
        let cut = text[target..]
            .find(char::is_whitespace)
            .map_or(text.len(), |pos| target + pos);
        let (burst, rest) = text.split_at(cut);
        self.remaining = rest;
        Some(burst)
    }
}

/// Returns the smallest char boundary at or after `pos`.
fn ceil_char_boundary(s: &str, pos: usize) -> usize {
    let mut boundary = pos.min(s.len());
    while boundary < s.len() && !s.is_char_boundary(boundary) {
        boundary += 1;
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_small_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.txt");
        std::fs::write(&path, "Hello, world!").unwrap();
        assert_eq!(read_transcript(&path).unwrap(), "Hello, world!");
    }

    #[test]
    fn test_read_nonexistent_file() {
        assert!(read_transcript("/nonexistent/path/file.txt").is_err());
    }

    #[test]
    fn test_reader_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.txt");
        std::fs::write(&path, "Hello").unwrap();
        let reader = TranscriptReader::open(&path).unwrap();
        assert_eq!(reader.size(), 5);
    }

    #[test]
    fn test_read_large_file_mmap_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("large.txt");
        let content = "spoken words here ".repeat(100_000);
        std::fs::write(&path, &content).unwrap();

        let reader = TranscriptReader::open(&path).unwrap();
        assert!(reader.size() >= MMAP_THRESHOLD);
        assert_eq!(reader.read_to_string().unwrap().len(), content.len());
    }

    #[test]
    fn test_read_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("invalid.bin");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x01]).unwrap();
        let reader = TranscriptReader::open(&path).unwrap();
        assert!(reader.read_to_string().is_err());
    }

    #[test]
    fn test_read_utf8_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unicode.txt");
        std::fs::write(&path, "Hello, 世界!").unwrap();
        assert_eq!(read_transcript(&path).unwrap(), "Hello, 世界!");
    }

    #[test]
    fn test_bursts_preserve_words() {
        let transcript = "the quick brown fox jumps over the lazy dog again and again";
        let bursts: Vec<&str> = BurstIter::new(transcript, 15).collect();
        assert!(bursts.len() > 1);
        for burst in &bursts {
            // No burst starts or ends mid-word.
            assert!(!burst.starts_with(char::is_whitespace));
            assert!(!burst.ends_with(char::is_whitespace));
        }
        let rejoined: Vec<&str> = bursts.iter().flat_map(|b| b.split_whitespace()).collect();
        let original: Vec<&str> = transcript.split_whitespace().collect();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn test_bursts_small_input_single_burst() {
        let bursts: Vec<&str> = BurstIter::new("short text", 100).collect();
        assert_eq!(bursts, vec!["short text"]);
    }

    #[test]
    fn test_bursts_empty_input() {
        assert_eq!(BurstIter::new("", 10).count(), 0);
        assert_eq!(BurstIter::new("   ", 10).count(), 0);
    }

    #[test]
    fn test_bursts_zero_size_makes_progress() {
        let bursts: Vec<&str> = BurstIter::new("a b c", 0).collect();
        assert!(!bursts.is_empty());
        assert!(bursts.len() <= 3);
    }

    #[test]
    fn test_bursts_multibyte_boundaries() {
        let transcript = "日本語のテキスト and some english words here";
        let bursts: Vec<&str> = BurstIter::new(transcript, 8).collect();
        // Must not panic on multi-byte boundaries; content preserved.
        let rejoined = bursts.join(" ");
        assert!(rejoined.contains("日本語のテキスト"));
    }
}
