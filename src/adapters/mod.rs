//! Backend server adapters.
//!
//! Every backend is reached through the [`Adapter`] trait: a named
//! operation plus validated arguments in, a [`ToolResult`] out. Adapters own
//! their data source exclusively and never let a fault escape as a panic or
//! an `Err`; internal failures become `Failure(AdapterFault)`.
//!
//! | Adapter | Backing store | Operations |
//! |---------|---------------|------------|
//! | [`RecordStoreAdapter`] | `SQLite` employee database | `get_employee`, `search_employees`, `get_employees_by_department`, `get_all_employees`, `get_leave_balance` |
//! | [`AnnouncementAdapter`] | Directory of text files | `list_announcements`, `read_announcement`, `search_announcements`, `recent_announcements` |
//! | [`PolicyIndexAdapter`] | In-memory embedding index | `search_policies`, `list_policies` |
//! | [`RemoteAdapter`] | Any of the above over HTTP | whatever the remote side exposes |

mod announcements;
#[cfg(feature = "http")]
pub mod http;
mod policies;
mod records;
mod remote;

pub use announcements::AnnouncementAdapter;
pub use policies::{PolicyDocument, PolicyIndexAdapter, RetrievalSettings};
pub use records::RecordStoreAdapter;
pub use remote::{RemoteAdapter, RemoteAdapterConfig};

use crate::config::RagMcpConfig;
use crate::embedding::policy_embedder;
use crate::models::{FailureKind, ToolDescriptor, ToolResult};
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// A backend server exposing a fixed set of callable operations.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter name; every descriptor it returns names it as owner.
    fn name(&self) -> &str;

    /// Operations this adapter exposes.
    fn descriptors(&self) -> Vec<ToolDescriptor>;

    /// Invokes one operation.
    ///
    /// `arguments` have already been validated against the operation's
    /// descriptor. Implementations must not panic and must not leave partial
    /// effects behind on failure.
    async fn invoke(&self, operation: &str, arguments: Map<String, Value>) -> ToolResult;
}

/// Parses an operation name and its arguments into an adapter's typed
/// operation enum.
///
/// The enum must be adjacently tagged with `tag = "operation"` and
/// `content = "arguments"`.
///
/// # Errors
///
/// Returns an `InvalidArguments` failure if the operation is unknown to the
/// adapter or the arguments do not fit the typed structure.
pub fn parse_operation<T: DeserializeOwned>(
    operation: &str,
    arguments: Map<String, Value>,
) -> std::result::Result<T, ToolResult> {
    serde_json::from_value(json!({
        "operation": operation,
        "arguments": Value::Object(arguments),
    }))
    .map_err(|e| {
        ToolResult::failure(
            FailureKind::InvalidArguments,
            format!("cannot decode arguments for '{operation}': {e}"),
        )
    })
}

/// Converts an internal error into an adapter fault.
pub(crate) fn fault(operation: &str, err: impl std::fmt::Display) -> ToolResult {
    tracing::warn!(operation = operation, error = %err, "Adapter operation failed");
    ToolResult::failure(FailureKind::AdapterFault, format!("{operation}: {err}"))
}

/// Builds every configured adapter.
///
/// Remote adapters listed under `[[remote]]` are connected first. A local
/// adapter is only built if no remote adapter already claimed its name, so
/// a backend can be moved out of process by configuration alone.
///
/// # Errors
///
/// Returns an error if a remote adapter cannot be reached, the record store
/// cannot be opened, or the policy directory cannot be read.
pub async fn build_adapters(config: &RagMcpConfig) -> Result<Vec<Arc<dyn Adapter>>> {
    let mut adapters: Vec<Arc<dyn Adapter>> = Vec::new();
    for remote in &config.remote {
        let adapter = RemoteAdapter::connect(remote.clone()).await?;
        tracing::info!(adapter = adapter.name(), url = %remote.base_url, "Connected remote adapter");
        if remote.worst_case() > config.orchestrator.tool_timeout {
            tracing::warn!(
                adapter = adapter.name(),
                worst_case_ms = u64::try_from(remote.worst_case().as_millis()).unwrap_or(u64::MAX),
                tool_timeout_ms =
                    u64::try_from(config.orchestrator.tool_timeout.as_millis()).unwrap_or(u64::MAX),
                "Remote retries can outlast the tool timeout; late attempts will be cut off"
            );
        }
        adapters.push(Arc::new(adapter));
    }

    let taken = |name: &str| adapters.iter().any(|a| a.name() == name);
    let mut local: Vec<Arc<dyn Adapter>> = Vec::new();
    if !taken(RecordStoreAdapter::NAME) {
        local.push(Arc::new(RecordStoreAdapter::open(&config.data.records_db)?));
    }
    if !taken(AnnouncementAdapter::NAME) {
        local.push(Arc::new(AnnouncementAdapter::new(
            &config.data.announcements_dir,
        )));
    }
    if !taken(PolicyIndexAdapter::NAME) {
        let index = PolicyIndexAdapter::load_dir(
            &config.data.policies_dir,
            policy_embedder(&config.retrieval),
            RetrievalSettings::from(&config.retrieval),
        )?;
        tracing::info!(chunks = index.chunk_count(), "Policy index loaded");
        local.push(Arc::new(index));
    }

    adapters.extend(local);
    Ok(adapters)
}
