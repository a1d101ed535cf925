//! Tool call dispatch.
//!
//! The dispatcher is transport-agnostic: it resolves a call against the
//! catalog, validates the arguments, and hands them to the owning adapter
//! under a timeout. It never retries; whether to try again is the
//! orchestrator's decision.
//!
//! ```text
//! ToolCallRequest
//!   ├── resolve   ─ not in catalog     → Failure(UnknownTool)
//!   ├── validate  ─ schema mismatch    → Failure(InvalidArguments)
//!   ├── invoke    ─ deadline elapsed   → Failure(Timeout)
//!   │             ─ adapter panicked   → Failure(AdapterFault)
//!   └── ToolResult from the adapter, unchanged
//! ```

use crate::adapters::Adapter;
use crate::catalog::{ToolCatalog, validate_arguments};
use crate::models::{FailureKind, ToolCallRequest, ToolResult};
use crate::{Error, Result};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Default per-call deadline.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Routes tool calls to adapters.
#[derive(Clone)]
pub struct Dispatcher {
    catalog: Arc<ToolCatalog>,
    adapters: HashMap<String, Arc<dyn Adapter>>,
    tool_timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher over a catalog and the adapters that own its tools.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a descriptor names an adapter that
    /// was not supplied, or two adapters share a name.
    pub fn new(catalog: ToolCatalog, adapters: Vec<Arc<dyn Adapter>>) -> Result<Self> {
        let mut by_name: HashMap<String, Arc<dyn Adapter>> = HashMap::new();
        for adapter in adapters {
            let name = adapter.name().to_string();
            if by_name.insert(name.clone(), adapter).is_some() {
                return Err(Error::InvalidInput(format!("duplicate adapter name: {name}")));
            }
        }

        if let Some(orphan) = catalog
            .all()
            .iter()
            .find(|d| !by_name.contains_key(&d.adapter))
        {
            return Err(Error::InvalidInput(format!(
                "tool '{}' is owned by unknown adapter '{}'",
                orphan.name, orphan.adapter
            )));
        }

        Ok(Self {
            catalog: Arc::new(catalog),
            adapters: by_name,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        })
    }

    /// Builds the catalog from the adapters' own descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateToolName`] if two operations share a name.
    pub fn from_adapters(adapters: Vec<Arc<dyn Adapter>>) -> Result<Self> {
        let catalog = ToolCatalog::from_adapters(&adapters)?;
        Self::new(catalog, adapters)
    }

    /// Sets the default per-call deadline.
    #[must_use]
    pub const fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// The catalog calls are resolved against.
    #[must_use]
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Default per-call deadline.
    #[must_use]
    pub const fn tool_timeout(&self) -> Duration {
        self.tool_timeout
    }

    /// Dispatches one call under the default deadline.
    pub async fn dispatch(&self, request: &ToolCallRequest) -> ToolResult {
        self.dispatch_within(request, self.tool_timeout).await
    }

    /// Dispatches one call under `timeout`.
    #[instrument(
        name = "ragmcp.dispatch",
        skip_all,
        fields(tool = %request.name, call_id = %request.id)
    )]
    pub async fn dispatch_within(&self, request: &ToolCallRequest, timeout: Duration) -> ToolResult {
        let start = Instant::now();
        let result = self.route(request, timeout).await;
        let status = result.failure_kind().map_or("success", |kind| kind.as_str());
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        metrics::counter!(
            "tool_calls_total",
            "tool" => request.name.clone(),
            "status" => status
        )
        .increment(1);
        metrics::histogram!("tool_call_duration_ms", "tool" => request.name.clone())
            .record(elapsed_ms);

        if result.is_success() {
            tracing::debug!(tool = %request.name, call_id = %request.id, elapsed_ms, "Tool call succeeded");
        } else {
            tracing::warn!(tool = %request.name, call_id = %request.id, status, elapsed_ms, "Tool call failed");
        }
        result
    }

    async fn route(&self, request: &ToolCallRequest, timeout: Duration) -> ToolResult {
        let Ok(descriptor) = self.catalog.resolve(&request.name) else {
            return ToolResult::failure(
                FailureKind::UnknownTool,
                format!("unknown tool: {}", request.name),
            );
        };

        let arguments = match validate_arguments(descriptor, &request.arguments) {
            Ok(arguments) => arguments,
            Err(errors) => {
                let fields: Vec<String> = errors.iter().map(ToString::to_string).collect();
                return ToolResult::failure(
                    FailureKind::InvalidArguments,
                    format!("invalid arguments for {}: {}", request.name, fields.join("; ")),
                );
            },
        };

        let Some(adapter) = self.adapters.get(&descriptor.adapter) else {
            return ToolResult::failure(
                FailureKind::AdapterFault,
                format!("adapter '{}' is not connected", descriptor.adapter),
            );
        };

        let call = AssertUnwindSafe(adapter.invoke(&descriptor.name, arguments)).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                tracing::error!(tool = %request.name, adapter = %descriptor.adapter, "Adapter panicked");
                ToolResult::failure(
                    FailureKind::AdapterFault,
                    format!("adapter '{}' failed unexpectedly", descriptor.adapter),
                )
            },
            Err(_) => ToolResult::failure(
                FailureKind::Timeout,
                format!("{} did not answer within {timeout:?}", request.name),
            ),
        }
    }
}
