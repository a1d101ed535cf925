//! Feature-hashing embedder.
//!
//! Each normalized token is hashed into one bucket; the resulting term
//! counts are L2-normalized. Texts sharing vocabulary score high under
//! cosine similarity, unrelated texts score near zero.

use super::Embedder;
use crate::{Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Bound on tokens considered per text.
const MAX_TOKENS: usize = 4096;

/// Words that carry no retrieval signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "my", "of", "on", "or", "our", "the", "this", "to", "was", "what",
    "when", "where", "which", "who", "will", "with", "you", "your",
];

/// Deterministic hash-based embedder.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Default number of dimensions.
    pub const DEFAULT_DIMENSIONS: usize = 256;

    /// Creates an embedder producing vectors of `dimensions` length.
    ///
    /// A zero dimension count falls back to [`Self::DEFAULT_DIMENSIONS`].
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        let dimensions = if dimensions == 0 {
            Self::DEFAULT_DIMENSIONS
        } else {
            dimensions
        };
        Self { dimensions }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() % self.dimensions as u64) as usize
    }

    fn normalize(embedding: &mut [f32]) {
        let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
        if norm_sq <= 0.0 {
            return;
        }
        let inv_norm = norm_sq.sqrt().recip();
        for v in embedding.iter_mut() {
            *v *= inv_norm;
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

/// Lowercases, splits on non-alphanumerics, drops stopwords and folds a
/// trailing plural `s`.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .map(|w| match w.strip_suffix('s') {
            Some(stem) if stem.len() > 2 && !stem.ends_with('s') => stem.to_string(),
            _ => w,
        })
        .take(MAX_TOKENS)
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot embed empty text".to_string()));
        }
        let mut embedding = vec![0.0f32; self.dimensions];
        for token in tokens(text) {
            let idx = self.bucket(&token);
            if let Some(slot) = embedding.get_mut(idx) {
                *slot += 1.0;
            }
        }
        Self::normalize(&mut embedding);
        Ok(embedding)
    }
}
