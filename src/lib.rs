//! # ragmcp
//!
//! Answers natural-language HR questions by routing them to backend tool
//! servers and synthesizing a single reply.
//!
//! Three backends sit behind one adapter interface:
//!
//! - **Record store**: employee records and leave balances (`SQLite`)
//! - **Flat files**: company announcements on disk
//! - **Semantic index**: policy documents, searched by embedding similarity
//!
//! The [`Orchestrator`] runs a bounded plan/dispatch loop against a
//! function-calling model, routes every tool call through the [`Dispatcher`],
//! and passes policy search results through the [`ConfidentialityFilter`]
//! before they can reach the model.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ragmcp::{AccessLevel, Orchestrator, SessionStore};
//!
//! let orchestrator = Orchestrator::new(dispatcher, model, OrchestratorConfig::default());
//! let sessions = SessionStore::new();
//! let id = sessions.open(AccessLevel::Public);
//! let answer = orchestrator.ask(&sessions, &id, "What department is EMP001 in?").await?;
//! println!("{}", answer.text);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::time::Duration;
use thiserror::Error as ThisError;

pub mod adapters;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod embedding;
pub mod llm;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod security;
pub mod session;

pub use adapters::Adapter;
pub use catalog::ToolCatalog;
pub use config::RagMcpConfig;
pub use dispatch::Dispatcher;
pub use llm::{ModelCapability, PlanningRequest, PlanningResponse};
pub use models::{
    AccessLevel, Confidentiality, ConversationTurn, DocumentChunk, FailureKind, ToolCallRequest,
    ToolDescriptor, ToolResult,
};
pub use orchestrator::{Answer, AnswerResult, Orchestrator, OrchestratorConfig, ToolUsageSummary};
pub use security::ConfidentialityFilter;
pub use session::{Session, SessionId, SessionStats, SessionStore};

/// Error type for ragmcp operations.
///
/// Tool-level failures are not errors: they travel as
/// [`ToolResult::Failure`] values so the orchestrator can re-plan around
/// them. This enum covers catalog construction, configuration, and the
/// query-level failures returned to the caller.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed configuration, empty utterance, bad CLI values |
/// | `OperationFailed` | I/O, `SQLite`, HTTP transport failures |
/// | `DuplicateToolName` | Registering a tool name that already exists |
/// | `UnknownTool` | Resolving a tool name that was never registered |
/// | `ModelCapability` | Model backend unreachable or unparseable output |
/// | `QueryTimeout` | The overall query deadline elapsed |
/// | `Cancelled` | The caller cancelled an in-flight query |
/// | `SessionNotFound` | Asking on a session id the store does not hold |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A tool with this name is already registered.
    #[error("duplicate tool name: {0}")]
    DuplicateToolName(String),

    /// No tool with this name is registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The model capability failed or returned output that could not be parsed.
    #[error("model capability fault: {0}")]
    ModelCapability(String),

    /// The query did not finish within its overall deadline.
    #[error("query timed out after {0:?}")]
    QueryTimeout(Duration),

    /// The query was cancelled by the caller.
    #[error("query cancelled")]
    Cancelled,

    /// The session id is not present in the store.
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

/// Coarse classification of [`Error`] for callers that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input or configuration.
    InvalidInput,
    /// Transport or storage failure.
    OperationFailed,
    /// Catalog already holds the tool name.
    DuplicateToolName,
    /// Catalog has no such tool.
    UnknownTool,
    /// Model backend unreachable or produced garbage.
    ModelCapabilityFault,
    /// Overall query deadline exceeded.
    QueryTimeout,
    /// Caller cancelled the query.
    Cancelled,
    /// Session id not found.
    SessionNotFound,
}

impl Error {
    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::OperationFailed { .. } => ErrorKind::OperationFailed,
            Self::DuplicateToolName(_) => ErrorKind::DuplicateToolName,
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::ModelCapability(_) => ErrorKind::ModelCapabilityFault,
            Self::QueryTimeout(_) => ErrorKind::QueryTimeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
        }
    }
}

/// Result type alias for ragmcp operations.
pub type Result<T> = std::result::Result<T, Error>;
