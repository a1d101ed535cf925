//! Data models for ragmcp.
//!
//! This module contains the core data structures shared by the catalog,
//! adapters, dispatcher and orchestrator.

mod conversation;
mod document;
mod records;
mod tool;

pub use conversation::{ConversationTurn, Role, ToolExchange};
pub use document::{AccessLevel, Confidentiality, DocumentChunk};
pub use records::{Announcement, Employee, LeaveBalance, PolicySummary};
pub use tool::{
    FailureKind, ParamSpec, ParamType, ToolCallRequest, ToolDescriptor, ToolResult,
};
