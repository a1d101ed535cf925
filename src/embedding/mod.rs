//! Embedding generation for the policy index.
//!
//! Two implementations sit behind the [`Embedder`] seam:
//!
//! | Embedder | Feature | Similarity |
//! |----------|---------|------------|
//! | `FastEmbedEmbedder` | `fastembed-embeddings` | Semantic (all-MiniLM-L6-v2) |
//! | [`HashEmbedder`] | always | Lexical, deterministic, offline |
//!
//! [`policy_embedder`] picks the semantic model when it is compiled in and
//! loads, and the hash embedder otherwise.

// Hash-to-index arithmetic.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

mod hash;
#[cfg(feature = "fastembed-embeddings")]
mod semantic;

pub use hash::HashEmbedder;
#[cfg(feature = "fastembed-embeddings")]
pub use semantic::FastEmbedEmbedder;

use crate::Result;
use crate::config::RetrievalConfig;
use std::sync::Arc;

/// Trait for embedding generators.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Builds the embedder for the policy index.
#[cfg(feature = "fastembed-embeddings")]
#[must_use]
pub fn policy_embedder(config: &RetrievalConfig) -> Arc<dyn Embedder> {
    match FastEmbedEmbedder::try_new() {
        Ok(embedder) => {
            tracing::info!(model = embedder.model_name(), "Using semantic embeddings");
            Arc::new(embedder)
        },
        Err(e) => {
            tracing::warn!(error = %e, "Semantic model unavailable, using hash embeddings");
            Arc::new(HashEmbedder::new(config.dimensions))
        },
    }
}

/// Builds the embedder for the policy index.
#[cfg(not(feature = "fastembed-embeddings"))]
#[must_use]
pub fn policy_embedder(config: &RetrievalConfig) -> Arc<dyn Embedder> {
    tracing::debug!(dimensions = config.dimensions, "Using hash embeddings");
    Arc::new(HashEmbedder::new(config.dimensions))
}

/// Cosine similarity of two vectors.
///
/// Returns `0.0` for mismatched lengths or zero vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
