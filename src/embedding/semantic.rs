//! Sentence-transformer embeddings via fastembed.
//!
//! Uses all-MiniLM-L6-v2 (384 dimensions) through the ONNX runtime. The
//! model is process-wide and loaded once; [`FastEmbedEmbedder::try_new`]
//! loads it eagerly so a missing model surfaces at startup rather than on
//! the first query.

use super::Embedder;
use crate::{Error, Result};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Instant;

const MODEL_NAME: &str = "all-MiniLM-L6-v2";

static EMBEDDING_MODEL: OnceLock<Mutex<::fastembed::TextEmbedding>> = OnceLock::new();

/// Semantic embedder backed by all-MiniLM-L6-v2.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastEmbedEmbedder;

impl FastEmbedEmbedder {
    /// Output dimensions of the model.
    pub const DIMENSIONS: usize = 384;

    /// Creates the embedder, loading the model if this is the first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the model cannot be loaded.
    pub fn try_new() -> Result<Self> {
        model()?;
        Ok(Self)
    }

    /// Name of the underlying model.
    #[must_use]
    pub const fn model_name(&self) -> &'static str {
        MODEL_NAME
    }

    fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let batch_size = texts.len();
        let mut model = model()?
            .lock()
            .unwrap_or_else(|poisoned| {
                tracing::warn!("Embedding model mutex poisoned, recovering");
                PoisonError::into_inner(poisoned)
            });

        // The ONNX runtime can panic on malformed input.
        catch_unwind(AssertUnwindSafe(|| model.embed(texts, None)))
            .map_err(|_| {
                tracing::error!(batch_size, "ONNX runtime panicked during embedding");
                Error::OperationFailed {
                    operation: "embed".to_string(),
                    cause: "ONNX runtime panic".to_string(),
                }
            })?
            .map_err(|e| Error::OperationFailed {
                operation: "embed".to_string(),
                cause: e.to_string(),
            })
    }
}

fn model() -> Result<&'static Mutex<::fastembed::TextEmbedding>> {
    if let Some(model) = EMBEDDING_MODEL.get() {
        return Ok(model);
    }

    tracing::info!(model = MODEL_NAME, "Loading embedding model");
    let start = Instant::now();
    let options = ::fastembed::InitOptions::new(::fastembed::EmbeddingModel::AllMiniLML6V2)
        .with_show_download_progress(false);
    let loaded = ::fastembed::TextEmbedding::try_new(options).map_err(|e| {
        Error::OperationFailed {
            operation: "load_embedding_model".to_string(),
            cause: e.to_string(),
        }
    })?;
    tracing::info!(
        model = MODEL_NAME,
        elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Embedding model loaded"
    );

    // Another thread may have won the race; either instance is fine.
    Ok(EMBEDDING_MODEL.get_or_init(|| Mutex::new(loaded)))
}

impl Embedder for FastEmbedEmbedder {
    fn dimensions(&self) -> usize {
        Self::DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; Self::DIMENSIONS]);
        }
        self.run(vec![text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::OperationFailed {
                operation: "embed".to_string(),
                cause: "model returned no embedding".to_string(),
            })
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run(texts.iter().map(|t| (*t).to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    #[ignore = "downloads the ONNX model"]
    fn test_paraphrases_score_higher_than_unrelated_text() {
        let embedder = FastEmbedEmbedder::try_new().unwrap();
        let query = embedder.embed("How many vacation days do I get?").unwrap();
        let leave = embedder
            .embed("Employees accrue 18 days of earned leave per year.")
            .unwrap();
        let salary = embedder
            .embed("Engineering Manager pay ranges from 28 to 40 lakh.")
            .unwrap();

        assert_eq!(query.len(), FastEmbedEmbedder::DIMENSIONS);
        assert!(cosine_similarity(&query, &leave) > cosine_similarity(&query, &salary));
    }

    #[test]
    #[ignore = "downloads the ONNX model"]
    fn test_blank_text_is_a_zero_vector() {
        let embedder = FastEmbedEmbedder::try_new().unwrap();
        assert!(embedder.embed("   ").unwrap().iter().all(|v| *v == 0.0));
    }
}
