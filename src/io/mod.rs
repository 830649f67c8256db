//! Transcript I/O.
//!
//! Reading of replay transcripts with memory mapping for large files,
//! and burst splitting to simulate a live voice source.

mod reader;

pub use reader::{read_transcript, BurstIter, TranscriptReader};
