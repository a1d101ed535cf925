//! OpenAI-compatible function-calling client.
//!
//! Speaks the chat-completions API with `tools`/`tool_calls`, which Groq,
//! `OpenAI`, Ollama and LM Studio all accept. A tool turn in the history is
//! serialized as one assistant message carrying every `tool_calls` entry,
//! followed by one `tool` message per result, in request order.

use super::{
    HttpClientConfig, ModelCapability, PlanningRequest, PlanningResponse, build_http_client,
};
use crate::config::{LlmConfig, LlmProvider};
use crate::models::{ConversationTurn, Role, ToolCallRequest, ToolDescriptor};
use crate::{Error, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::instrument;

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatibleClient {
    provider: LlmProvider,
    api_key: Option<SecretString>,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    /// Creates a client for `provider` with its default endpoint and model.
    #[must_use]
    pub fn new(provider: LlmProvider) -> Self {
        let api_key = provider
            .api_key_env()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
            .map(SecretString::from);
        Self {
            provider,
            api_key,
            endpoint: provider.default_base_url().to_string(),
            model: provider.default_model().to_string(),
            max_tokens: 4096,
            temperature: 0.2,
            client: build_http_client(HttpClientConfig::default()),
        }
    }

    /// Creates a client from the `[llm]` configuration section.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut client = Self::new(config.provider)
            .with_endpoint(config.base_url.clone())
            .with_model(config.model.clone())
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature);
        if let Some(key) = &config.api_key {
            client.api_key = Some(key.clone());
        }
        client.client = build_http_client(HttpClientConfig::from_config(config));
        client
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the completion token limit.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Hosted providers need a key; local servers do not.
    fn validate(&self) -> Result<()> {
        if self.provider.api_key_env().is_some() && self.api_key.is_none() {
            return Err(Error::ModelCapability(format!(
                "{} API key not set",
                self.provider.as_str()
            )));
        }
        Ok(())
    }

    fn build_body(&self, request: &PlanningRequest) -> ChatCompletionRequest {
        let tools: Vec<ToolSpec> = request.tools.iter().map(ToolSpec::from).collect();
        let tool_choice = request.allows_tools().then_some("auto");
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: build_messages(&request.system_prompt, &request.turns),
            tools,
            tool_choice,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    async fn send(&self, body: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        self.validate()?;

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint.trim_end_matches('/')))
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            let error_kind = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connect"
            } else {
                "request"
            };
            tracing::error!(
                provider = self.provider.as_str(),
                model = %self.model,
                error = %e,
                error_kind = error_kind,
                "Model request failed"
            );
            Error::OperationFailed {
                operation: "llm_request".to_string(),
                cause: format!("{error_kind}: {e}"),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                provider = self.provider.as_str(),
                status = %status,
                body = %body,
                "Model API returned error status"
            );
            // Rate limits and server errors are transient.
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(Error::OperationFailed {
                    operation: "llm_request".to_string(),
                    cause: format!("API returned status: {status}"),
                });
            }
            return Err(Error::ModelCapability(format!(
                "API returned status: {status} - {body}"
            )));
        }

        response.json().await.map_err(|e| {
            Error::ModelCapability(format!("unparseable completion response: {e}"))
        })
    }
}

#[async_trait]
impl ModelCapability for OpenAiCompatibleClient {
    fn name(&self) -> &'static str {
        self.provider.as_str()
    }

    #[instrument(
        name = "ragmcp.llm.request",
        skip_all,
        fields(provider = self.provider.as_str(), turns = request.turns.len())
    )]
    async fn plan(&self, request: &PlanningRequest) -> Result<PlanningResponse> {
        let start = Instant::now();
        let body = self.build_body(request);
        let response = self.send(&body).await?;
        tracing::debug!(
            provider = self.provider.as_str(),
            model = %self.model,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            tools_offered = body.tools.len(),
            "Model responded"
        );
        interpret(response)
    }
}

/// Turns a completion response into a planning decision.
fn interpret(response: ChatCompletionResponse) -> Result<PlanningResponse> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| Error::ModelCapability("no choices in response".to_string()))?;

    let calls = message.tool_calls.unwrap_or_default();
    if calls.is_empty() {
        return Ok(PlanningResponse::Answer(
            message.content.unwrap_or_default().trim().to_string(),
        ));
    }

    calls
        .into_iter()
        .map(|call| {
            let arguments = parse_arguments(&call.function.name, &call.function.arguments)?;
            Ok(ToolCallRequest::new(call.function.name, arguments).with_id(call.id))
        })
        .collect::<Result<Vec<_>>>()
        .map(PlanningResponse::ToolCalls)
}

/// Tool arguments arrive as a JSON-encoded string.
fn parse_arguments(tool: &str, raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| {
        Error::ModelCapability(format!("unparseable arguments for '{tool}': {e}"))
    })
}

fn build_messages(system_prompt: &str, turns: &[ConversationTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(ChatMessage::text("system", system_prompt));

    for turn in turns {
        match turn.role {
            Role::User => messages.push(ChatMessage::text("user", &turn.content)),
            Role::Assistant => messages.push(ChatMessage::text("assistant", &turn.content)),
            Role::Tool => {
                messages.push(ChatMessage {
                    role: "assistant",
                    content: None,
                    tool_calls: Some(
                        turn.exchanges
                            .iter()
                            .map(|ex| WireToolCall {
                                id: ex.request.id.clone(),
                                call_type: "function".to_string(),
                                function: WireFunctionCall {
                                    name: ex.request.name.clone(),
                                    arguments: ex.request.arguments.to_string(),
                                },
                            })
                            .collect(),
                    ),
                    tool_call_id: None,
                });
                for ex in &turn.exchanges {
                    messages.push(ChatMessage {
                        role: "tool",
                        content: Some(ex.result.to_context_string()),
                        tool_calls: None,
                        tool_call_id: Some(ex.request.id.clone()),
                    });
                }
            },
        }
    }
    messages
}

/// Request to the Chat Completions API.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ToolSpec {
    #[serde(rename = "type")]
    spec_type: &'static str,
    function: FunctionSpec,
}

#[derive(Debug, Serialize)]
struct FunctionSpec {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolDescriptor> for ToolSpec {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            spec_type: "function",
            function: FunctionSpec {
                name: descriptor.name.clone(),
                description: descriptor.description.clone(),
                parameters: descriptor.input_schema(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default)]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Response from the Chat Completions API.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}
