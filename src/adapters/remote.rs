//! HTTP client for adapters hosted in another process.
//!
//! The wire protocol is two JSON endpoints:
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | `GET` | `/tools` | none | `[ToolDescriptor]` |
//! | `POST` | `/invoke` | `{"operation", "arguments"}` | `ToolResult` |
//!
//! Transport errors and 5xx responses are retried with linear backoff up to
//! `max_retries`; everything else is returned as-is. The dispatcher cannot
//! tell a remote adapter from an in-process one, so its per-call deadline
//! also bounds the retries: attempts that would end past
//! [`RemoteAdapterConfig::worst_case`] never get to finish.

use super::Adapter;
use crate::llm::{HttpClientConfig, build_http_client};
use crate::models::{FailureKind, ToolDescriptor, ToolResult};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Connection settings for a remote adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteAdapterConfig {
    /// Base URL, e.g. `http://127.0.0.1:7401`.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff step between retries in milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for RemoteAdapterConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7401".to_string(),
            timeout_ms: 3_000,
            max_retries: 2,
            retry_backoff_ms: 100,
        }
    }
}

impl RemoteAdapterConfig {
    /// Creates a config for `base_url` with default timeouts.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Longest a single `invoke` can take with every attempt timing out.
    #[must_use]
    pub fn worst_case(&self) -> Duration {
        let attempts = u64::from(self.max_retries) + 1;
        let backoff: u64 = (1..=u64::from(self.max_retries))
            .map(|attempt| self.retry_backoff_ms.saturating_mul(attempt))
            .sum();
        Duration::from_millis(
            self.timeout_ms
                .saturating_mul(attempts)
                .saturating_add(backoff),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct InvokeBody<'a> {
    operation: &'a str,
    arguments: Map<String, Value>,
}

/// Adapter proxy speaking JSON over HTTP.
pub struct RemoteAdapter {
    name: String,
    config: RemoteAdapterConfig,
    client: reqwest::Client,
    descriptors: Vec<ToolDescriptor>,
}

impl RemoteAdapter {
    /// Connects to a remote adapter and fetches its descriptors.
    ///
    /// The adapter takes the owner name the remote descriptors report.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the descriptor list cannot be
    /// fetched, or [`Error::InvalidInput`] if the remote reports no tools or
    /// tools owned by more than one adapter.
    pub async fn connect(config: RemoteAdapterConfig) -> Result<Self> {
        let client = build_http_client(HttpClientConfig {
            timeout_ms: config.timeout_ms,
            ..HttpClientConfig::default()
        });

        let url = config.endpoint("tools");
        let descriptors: Vec<ToolDescriptor> = client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| connect_error(&url, &e))?
            .json()
            .await
            .map_err(|e| connect_error(&url, &e))?;

        let Some(first) = descriptors.first() else {
            return Err(Error::InvalidInput(format!("{url} exposes no tools")));
        };
        let name = first.adapter.clone();
        if descriptors.iter().any(|d| d.adapter != name) {
            return Err(Error::InvalidInput(format!(
                "{url} exposes tools from more than one adapter"
            )));
        }

        tracing::info!(
            adapter = %name,
            url = %config.base_url,
            tools = descriptors.len(),
            "Connected to remote adapter"
        );

        Ok(Self {
            name,
            config,
            client,
            descriptors,
        })
    }

    async fn invoke_once(
        &self,
        operation: &str,
        arguments: &Map<String, Value>,
    ) -> std::result::Result<ToolResult, Attempt> {
        let response = self
            .client
            .post(self.config.endpoint("invoke"))
            .json(&InvokeBody {
                operation,
                arguments: arguments.clone(),
            })
            .send()
            .await
            .map_err(Attempt::from_transport)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Attempt::Retry(format!("remote returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Attempt::Fatal(ToolResult::failure(
                FailureKind::AdapterFault,
                format!("remote returned {status}: {body}"),
            )));
        }

        response.json::<ToolResult>().await.map_err(|e| {
            Attempt::Fatal(ToolResult::failure(
                FailureKind::AdapterFault,
                format!("malformed remote result: {e}"),
            ))
        })
    }
}

/// Outcome of one HTTP attempt that did not produce a result.
enum Attempt {
    /// Worth another try.
    Retry(String),
    /// Timed out; retried like any transient error but reported as a timeout.
    TimedOut(String),
    /// Final answer for this call.
    Fatal(ToolResult),
}

impl Attempt {
    fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::TimedOut(e.to_string())
        } else {
            Self::Retry(e.to_string())
        }
    }
}

fn connect_error(url: &str, e: &reqwest::Error) -> Error {
    Error::OperationFailed {
        operation: "remote_adapter_connect".to_string(),
        cause: format!("{url}: {e}"),
    }
}

#[async_trait]
impl Adapter for RemoteAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.descriptors.clone()
    }

    async fn invoke(&self, operation: &str, arguments: Map<String, Value>) -> ToolResult {
        let mut last = ToolResult::failure(FailureKind::AdapterFault, "no attempt made");

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.invoke_once(operation, &arguments).await {
                Ok(result) => return result,
                Err(Attempt::Fatal(result)) => return result,
                Err(Attempt::Retry(message)) => {
                    tracing::warn!(
                        adapter = %self.name,
                        operation = operation,
                        attempt = attempt + 1,
                        error = %message,
                        "Remote adapter call failed"
                    );
                    last = ToolResult::failure(FailureKind::AdapterFault, message);
                },
                Err(Attempt::TimedOut(message)) => {
                    tracing::warn!(
                        adapter = %self.name,
                        operation = operation,
                        attempt = attempt + 1,
                        "Remote adapter call timed out"
                    );
                    last = ToolResult::failure(FailureKind::Timeout, message);
                },
            }
        }

        metrics::counter!("remote_adapter_exhausted_total", "adapter" => self.name.clone())
            .increment(1);
        last
    }
}
