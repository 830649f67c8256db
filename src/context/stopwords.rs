//! Stopword handling for relevance scoring.
//!
//! Combines a fixed English stopword list with a configurable
//! domain-specific list so that filler vocabulary ("project", "thing",
//! "basically") does not dominate TF-IDF scores for a given corpus.

use std::collections::HashSet;

/// English stopwords used by the tokenizer.
///
/// A compact list covering determiners, pronouns, auxiliaries,
/// conjunctions, and common spoken filler.
pub const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "you", "your", "yours", "yourself",
    "yourselves", "also", "like", "really", "actually", "basically", "going", "get", "got",
    "gonna", "kind", "sort", "thing", "things", "stuff", "yeah", "okay", "well", "um", "uh",
];

/// A stopword set: English plus caller-supplied domain terms.
#[derive(Debug, Clone)]
pub struct StopwordSet {
    words: HashSet<String>,
}

impl Default for StopwordSet {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl StopwordSet {
    /// Builds the set from the English list plus `domain_words`.
    #[must_use]
    pub fn new(domain_words: &[String]) -> Self {
        let mut words: HashSet<String> =
            ENGLISH_STOPWORDS.iter().map(|w| (*w).to_string()).collect();
        words.extend(domain_words.iter().map(|w| w.to_lowercase()));
        Self { words }
    }

    /// Returns `true` if `word` (already lowercase) is a stopword.
    #[must_use]
    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    /// Tokenizes text: lowercase, punctuation-trimmed words with
    /// stopwords and single characters removed.
    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| w.chars().count() > 1 && !self.contains(w))
            .collect()
    }
}
