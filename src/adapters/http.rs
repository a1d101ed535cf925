//! HTTP front end for a single adapter.
//!
//! Exposes any [`Adapter`] with the protocol [`super::RemoteAdapter`]
//! speaks, so a backend can run in its own process. Arguments are validated
//! against the adapter's own descriptors before the adapter sees them.

use super::Adapter;
use crate::catalog::validate_arguments;
use crate::models::{FailureKind, ToolDescriptor, ToolResult};
use crate::{Error, Result};
use axum::extract::State;
use axum::http::header;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

#[derive(Debug, Deserialize)]
struct InvokeRequest {
    operation: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Clone)]
struct AdapterState {
    adapter: Arc<dyn Adapter>,
    descriptors: Arc<Vec<ToolDescriptor>>,
}

/// Builds the router for one adapter.
pub fn router(adapter: Arc<dyn Adapter>) -> Router {
    let state = AdapterState {
        descriptors: Arc::new(adapter.descriptors()),
        adapter,
    };

    Router::new()
        .route("/tools", get(list_tools))
        .route("/invoke", post(invoke))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn list_tools(State(state): State<AdapterState>) -> Json<Vec<ToolDescriptor>> {
    Json(state.descriptors.as_ref().clone())
}

async fn invoke(
    State(state): State<AdapterState>,
    Json(request): Json<InvokeRequest>,
) -> Json<ToolResult> {
    let Some(descriptor) = state
        .descriptors
        .iter()
        .find(|d| d.name == request.operation)
    else {
        return Json(ToolResult::failure(
            FailureKind::UnknownTool,
            format!("unknown operation: {}", request.operation),
        ));
    };

    let arguments = match validate_arguments(descriptor, &request.arguments) {
        Ok(arguments) => arguments,
        Err(errors) => {
            let fields: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Json(ToolResult::failure(
                FailureKind::InvalidArguments,
                fields.join("; "),
            ));
        },
    };

    Json(state.adapter.invoke(&request.operation, arguments).await)
}

/// Serves an adapter on an already-bound listener until `shutdown` fires.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the server stops with an I/O error.
pub async fn serve_listener(
    adapter: Arc<dyn Adapter>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let name = adapter.name().to_string();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(adapter = %name, %addr, "Serving adapter over HTTP");
    }

    axum::serve(listener, router(adapter))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "serve_adapter".to_string(),
            cause: e.to_string(),
        })
}

/// Binds `addr` and serves the adapter until `shutdown` fires.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the address cannot be bound or the
/// server fails.
pub async fn serve_adapter(
    adapter: Arc<dyn Adapter>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "bind".to_string(),
            cause: format!("{addr}: {e}"),
        })?;
    serve_listener(adapter, listener, shutdown).await
}
