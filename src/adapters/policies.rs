//! Semantic policy index adapter.
//!
//! Policy documents are split into paragraph chunks, embedded once at load
//! time, and searched by cosine similarity. Chunks scoring below the
//! configured threshold are never returned, so a question the policies do
//! not cover yields an empty result instead of a weak citation.
//!
//! Chunks carry their document's confidentiality marker. This adapter
//! returns every chunk that matches; withholding is the confidentiality
//! filter's job, applied before results reach model context.

use super::{Adapter, fault, parse_operation};
use crate::config::RetrievalConfig;
use crate::embedding::{Embedder, cosine_similarity};
use crate::models::{
    Confidentiality, DocumentChunk, FailureKind, ParamSpec, ParamType, PolicySummary,
    ToolDescriptor, ToolResult,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::path::Path;
use std::sync::Arc;

const ADAPTER_NAME: &str = "policies";

/// Upper bound on `top_k` regardless of what the caller asks for.
const MAX_TOP_K: usize = 20;

/// Paragraphs are merged until a chunk reaches this many characters.
const TARGET_CHUNK_CHARS: usize = 600;

#[derive(Debug, Deserialize)]
#[serde(tag = "operation", content = "arguments", rename_all = "snake_case")]
enum PolicyOp {
    SearchPolicies {
        query: String,
        #[serde(default)]
        top_k: Option<i64>,
    },
    ListPolicies {},
}

/// A policy document before indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    /// Document identifier (file stem when loaded from disk).
    pub document_id: String,
    /// Full text, without the metadata header.
    pub text: String,
    /// Marker applied to every chunk of this document.
    pub marker: Confidentiality,
}

impl PolicyDocument {
    /// Creates a document with an explicit marker.
    #[must_use]
    pub fn new(
        document_id: impl Into<String>,
        text: impl Into<String>,
        marker: Confidentiality,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            text: text.into(),
            marker,
        }
    }

    /// Parses raw file content, honouring a leading
    /// `Confidentiality: <marker>` line.
    ///
    /// Documents without the header are public.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the header names an unknown marker.
    pub fn parse(document_id: impl Into<String>, raw: &str) -> Result<Self> {
        let trimmed = raw.trim_start();
        let (marker, body) = match trimmed.split_once('\n') {
            Some((first, rest)) => match header_value(first) {
                Some(value) => (value.parse::<Confidentiality>()?, rest),
                None => (Confidentiality::Public, trimmed),
            },
            None => match header_value(trimmed) {
                Some(value) => (value.parse::<Confidentiality>()?, ""),
                None => (Confidentiality::Public, trimmed),
            },
        };
        Ok(Self::new(document_id, body.trim(), marker))
    }

    /// Splits the text into paragraph chunks.
    fn chunks(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = String::new();
        for paragraph in self.text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            if !current.is_empty() && current.len() + paragraph.len() > TARGET_CHUNK_CHARS {
                out.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }
}

fn header_value(line: &str) -> Option<&str> {
    let (key, value) = line.split_once(':')?;
    key.trim()
        .eq_ignore_ascii_case("confidentiality")
        .then(|| value.trim())
}

/// Search parameters for the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalSettings {
    /// Results returned when the caller does not say.
    pub top_k: usize,
    /// Minimum cosine similarity for a chunk to be returned.
    pub min_score: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.25,
        }
    }
}

impl From<&RetrievalConfig> for RetrievalSettings {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k.clamp(1, MAX_TOP_K),
            min_score: config.min_score,
        }
    }
}

struct IndexedChunk {
    document_id: String,
    text: String,
    marker: Confidentiality,
    embedding: Vec<f32>,
}

/// In-memory semantic index over policy documents.
pub struct PolicyIndexAdapter {
    embedder: Arc<dyn Embedder>,
    settings: RetrievalSettings,
    chunks: Vec<IndexedChunk>,
    summaries: Vec<PolicySummary>,
}

impl PolicyIndexAdapter {
    /// Adapter name used as descriptor owner.
    pub const NAME: &'static str = ADAPTER_NAME;

    /// Indexes the given documents.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk cannot be embedded.
    pub fn new(
        documents: Vec<PolicyDocument>,
        embedder: Arc<dyn Embedder>,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        let mut chunks = Vec::new();
        let mut summaries = Vec::with_capacity(documents.len());

        for doc in documents {
            let texts = doc.chunks();
            let title = doc.document_id.replace(['_', '-'], " ");
            let inputs: Vec<String> = texts.iter().map(|t| format!("{title}\n{t}")).collect();
            let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
            let embeddings = embedder.embed_batch(&refs)?;

            summaries.push(PolicySummary {
                document_id: doc.document_id.clone(),
                chunks: texts.len(),
                marker: doc.marker,
            });
            for (text, embedding) in texts.into_iter().zip(embeddings) {
                chunks.push(IndexedChunk {
                    document_id: doc.document_id.clone(),
                    text,
                    marker: doc.marker,
                    embedding,
                });
            }
        }

        summaries.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        tracing::info!(
            documents = summaries.len(),
            chunks = chunks.len(),
            "Built policy index"
        );

        Ok(Self {
            embedder,
            settings,
            chunks,
            summaries,
        })
    }

    /// Loads every `.txt` and `.md` file in `dir` and indexes it.
    ///
    /// A missing directory yields an empty index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the directory or a file cannot be
    /// read, or an error from [`PolicyDocument::parse`] for a bad header.
    pub fn load_dir(
        dir: &Path,
        embedder: Arc<dyn Embedder>,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        let read_failed = |e: std::io::Error| Error::OperationFailed {
            operation: "load_policies".to_string(),
            cause: format!("{}: {e}", dir.display()),
        };

        let mut documents = Vec::new();
        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry.map_err(read_failed)?.path();
                    let is_text = matches!(
                        path.extension().and_then(|e| e.to_str()),
                        Some("txt" | "md")
                    );
                    if !is_text {
                        continue;
                    }
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    let raw = std::fs::read_to_string(&path).map_err(read_failed)?;
                    documents.push(PolicyDocument::parse(stem, &raw)?);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(dir = %dir.display(), "Policy directory missing, index is empty");
            },
            Err(e) => return Err(read_failed(e)),
        }

        Self::new(documents, embedder, settings)
    }

    /// Number of indexed chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Scores every chunk against `query` and returns the best matches at or
    /// above the threshold, highest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be embedded.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<DocumentChunk>> {
        let query_embedding = self.embedder.embed(query)?;
        let mut scored: Vec<DocumentChunk> = self
            .chunks
            .iter()
            .map(|chunk| DocumentChunk {
                document_id: chunk.document_id.clone(),
                text: chunk.text.clone(),
                marker: chunk.marker,
                score: cosine_similarity(&query_embedding, &chunk.embedding),
            })
            .filter(|chunk| chunk.score >= self.settings.min_score)
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k.clamp(1, MAX_TOP_K));
        Ok(scored)
    }
}

#[async_trait]
impl Adapter for PolicyIndexAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                "search_policies",
                "Search policy documents. Use this for questions about leave policy, salary policy, or other HR policies.",
                ADAPTER_NAME,
            )
            .with_param(ParamSpec::required(
                "query",
                ParamType::String,
                "Natural language question about policies",
            ))
            .with_param(ParamSpec::optional(
                "top_k",
                ParamType::Integer,
                "Maximum number of passages to return",
            )),
            ToolDescriptor::new(
                "list_policies",
                "List all available policy documents",
                ADAPTER_NAME,
            ),
        ]
    }

    async fn invoke(&self, operation: &str, arguments: Map<String, Value>) -> ToolResult {
        let op: PolicyOp = match parse_operation(operation, arguments) {
            Ok(op) => op,
            Err(failure) => return failure,
        };

        match op {
            PolicyOp::SearchPolicies { query, top_k } => {
                let top_k = top_k
                    .and_then(|k| usize::try_from(k).ok())
                    .unwrap_or(self.settings.top_k);
                match self.search(&query, top_k) {
                    Ok(chunks) => ToolResult::success(json!({
                        "query": query,
                        "count": chunks.len(),
                        "chunks": chunks,
                    })),
                    Err(Error::InvalidInput(msg)) => {
                        ToolResult::failure(FailureKind::InvalidArguments, msg)
                    },
                    Err(e) => fault(operation, e),
                }
            },
            PolicyOp::ListPolicies {} => ToolResult::success(json!({
                "count": self.summaries.len(),
                "policies": self.summaries,
            })),
        }
    }
}
