//! Conversation turns.

use super::{ToolCallRequest, ToolResult};
use serde::{Deserialize, Serialize};

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user.
    User,
    /// The assistant's final answer.
    Assistant,
    /// Tool calls issued during one dispatch step.
    Tool,
}

impl Role {
    /// Returns the role as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool call paired with its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExchange {
    /// What the model asked for.
    pub request: ToolCallRequest,
    /// What came back (after confidentiality filtering).
    pub result: ToolResult,
}

/// One entry in a session's history.
///
/// Tool turns carry every request/result pair from a single dispatch step,
/// in the order the model requested them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Who produced the turn.
    pub role: Role,
    /// Text content. For tool turns, a short summary of the calls.
    pub content: String,
    /// Request/result pairs; empty unless `role` is `Tool`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exchanges: Vec<ToolExchange>,
}

impl ConversationTurn {
    /// Creates a user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            exchanges: Vec::new(),
        }
    }

    /// Creates an assistant turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            exchanges: Vec::new(),
        }
    }

    /// Creates a tool turn from one dispatch step.
    #[must_use]
    pub fn tool(exchanges: Vec<ToolExchange>) -> Self {
        let content = exchanges
            .iter()
            .map(|ex| {
                let status = ex
                    .result
                    .failure_kind()
                    .map_or("ok", |kind| kind.as_str());
                format!("{} ({status})", ex.request.name)
            })
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            role: Role::Tool,
            content,
            exchanges,
        }
    }
}
