//! TF-IDF scoring over node text.
//!
//! Builds a term-frequency / inverse-document-frequency matrix over a
//! small corpus (one weighted document per candidate node) with
//! unigram and bigram features, then ranks candidates by cosine
//! similarity against a transformed query. Candidate scoring is
//! parallelized with rayon.
//!
//! This is lexical relevance, not semantics: an embedding backend can
//! replace it behind the same selection contract.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::context::stopwords::StopwordSet;

/// A fitted TF-IDF model over a fixed corpus.
#[derive(Debug)]
pub struct TfidfIndex {
    /// Term → column index.
    vocabulary: HashMap<String, usize>,
    /// Smoothed IDF per column.
    idf: Vec<f64>,
    /// L2-normalized sparse document vectors (column → weight).
    doc_vectors: Vec<HashMap<usize, f64>>,
}

impl TfidfIndex {
    /// Fits the model over `documents` with unigram+bigram features.
    ///
    /// Returns `None` when the corpus produces an empty vocabulary
    /// (all documents empty or pure stopwords); callers fall back to
    /// keyword scoring in that case.
    #[must_use]
    pub fn fit(documents: &[String], stopwords: &StopwordSet) -> Option<Self> {
        if documents.is_empty() {
            return None;
        }

        let tokenized: Vec<Vec<String>> = documents
            .iter()
            .map(|doc| ngram_features(doc, stopwords))
            .collect();

        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        for terms in &tokenized {
            for term in terms {
                let next = vocabulary.len();
                vocabulary.entry(term.clone()).or_insert(next);
            }
        }
        if vocabulary.is_empty() {
            return None;
        }

        // Document frequency per term.
        let mut df = vec![0usize; vocabulary.len()];
        for terms in &tokenized {
            let mut seen: Vec<usize> = terms
                .iter()
                .filter_map(|t| vocabulary.get(t).copied())
                .collect();
            seen.sort_unstable();
            seen.dedup();
            for col in seen {
                df[col] += 1;
            }
        }

        // Smoothed IDF: ln((1 + n) / (1 + df)) + 1.
        #[allow(clippy::cast_precision_loss)]
        let n_docs = documents.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let idf: Vec<f64> = df
            .iter()
            .map(|&d| ((1.0 + n_docs) / (1.0 + d as f64)).ln() + 1.0)
            .collect();

        let doc_vectors: Vec<HashMap<usize, f64>> = tokenized
            .iter()
            .map(|terms| vectorize(terms, &vocabulary, &idf))
            .collect();

        Some(Self {
            vocabulary,
            idf,
            doc_vectors,
        })
    }

    /// Cosine similarity of the query against every document, in
    /// corpus order.
    #[must_use]
    pub fn similarities(&self, query: &str, stopwords: &StopwordSet) -> Vec<f64> {
        let terms = ngram_features(query, stopwords);
        let query_vec = vectorize(&terms, &self.vocabulary, &self.idf);
        if query_vec.is_empty() {
            return vec![0.0; self.doc_vectors.len()];
        }

        self.doc_vectors
            .par_iter()
            .map(|doc| sparse_dot(&query_vec, doc))
            .collect()
    }

    /// Number of terms in the fitted vocabulary.
    #[must_use]
    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Unigram + bigram features for a text.
fn ngram_features(text: &str, stopwords: &StopwordSet) -> Vec<String> {
    let unigrams = stopwords.tokenize(text);
    let mut features = Vec::with_capacity(unigrams.len() * 2);
    for window in unigrams.windows(2) {
        features.push(format!("{} {}", window[0], window[1]));
    }
    features.extend(unigrams);
    features
}

/// Builds an L2-normalized sparse TF-IDF vector for a term list.
fn vectorize(
    terms: &[String],
    vocabulary: &HashMap<String, usize>,
    idf: &[f64],
) -> HashMap<usize, f64> {
    let mut counts: HashMap<usize, f64> = HashMap::new();
    for term in terms {
        if let Some(&col) = vocabulary.get(term) {
            *counts.entry(col).or_insert(0.0) += 1.0;
        }
    }
    for (col, value) in &mut counts {
        *value *= idf[*col];
    }
    let norm: f64 = counts.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for value in counts.values_mut() {
            *value /= norm;
        }
    }
    counts
}

/// Dot product of two sparse vectors. Both are unit length, so this is
/// the cosine similarity.
fn sparse_dot(a: &HashMap<usize, f64>, b: &HashMap<usize, f64>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(col, v)| large.get(col).map(|w| v * w))
        .sum()
}
