//! Model capability boundary.
//!
//! The orchestrator treats the language model as a stateless function: full
//! context and tool catalog in, either tool calls or a final answer out.
//! [`ModelCapability`] is that seam; tests plug in scripted stubs, the CLI
//! plugs in an OpenAI-compatible function-calling client wrapped in
//! [`ResilientModel`].
//!
//! # Providers
//!
//! | Provider | Default endpoint | Key variable |
//! |----------|------------------|--------------|
//! | Groq (default) | `https://api.groq.com/openai/v1` | `GROQ_API_KEY` |
//! | `OpenAI` | `https://api.openai.com/v1` | `OPENAI_API_KEY` |
//! | Ollama | `http://localhost:11434/v1` | none |
//! | LM Studio | `http://localhost:1234/v1` | none |
//!
//! All four speak the same chat-completions wire format.

mod openai;
mod prompt;
mod resilience;

pub use openai::OpenAiCompatibleClient;
pub use prompt::{FALLBACK_SYNTHESIS_PROMPT, SYSTEM_PROMPT};
pub use resilience::{ModelResilienceConfig, ResilientModel};

use crate::config::LlmConfig;
use crate::models::{ConversationTurn, ToolCallRequest, ToolDescriptor};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Everything the model sees on one planning step.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningRequest {
    /// Instructions prepended to every request.
    pub system_prompt: String,
    /// Conversation so far, oldest first, including the current question and
    /// any tool turns from earlier steps of this query.
    pub turns: Vec<ConversationTurn>,
    /// Tools the model may call. Empty when the model must answer directly.
    pub tools: Vec<ToolDescriptor>,
}

impl PlanningRequest {
    /// Returns true if the model is allowed to request tools.
    #[must_use]
    pub fn allows_tools(&self) -> bool {
        !self.tools.is_empty()
    }
}

/// What the model decided.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanningResponse {
    /// Call these tools, then ask again.
    ToolCalls(Vec<ToolCallRequest>),
    /// Final answer text.
    Answer(String),
}

/// A function-calling language model.
#[async_trait]
pub trait ModelCapability: Send + Sync {
    /// Short provider name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Runs one planning step.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ModelCapability`] if the output cannot be
    /// interpreted, or [`crate::Error::OperationFailed`] for transport
    /// failures that may be worth retrying.
    async fn plan(&self, request: &PlanningRequest) -> Result<PlanningResponse>;
}

/// HTTP client configuration shared by the model client and remote adapters.
#[derive(Debug, Clone, Copy)]
pub struct HttpClientConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl HttpClientConfig {
    /// Takes timeouts from the `[llm]` configuration section.
    #[must_use]
    pub const fn from_config(config: &LlmConfig) -> Self {
        Self {
            timeout_ms: config.timeout_ms,
            connect_timeout_ms: config.connect_timeout_ms,
        }
    }
}

/// Builds an async HTTP client with configured timeouts.
#[must_use]
pub fn build_http_client(config: HttpClientConfig) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build HTTP client: {err}");
        reqwest::Client::new()
    })
}

/// Builds the configured model: an OpenAI-compatible client behind retry and
/// a circuit breaker.
#[must_use]
pub fn build_model(config: &LlmConfig) -> Arc<dyn ModelCapability> {
    let client = OpenAiCompatibleClient::from_config(config);
    Arc::new(ResilientModel::new(
        client,
        ModelResilienceConfig::from_config(config),
    ))
}
