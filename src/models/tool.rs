//! Tool descriptors, call requests and results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// UTF-8 string.
    String,
    /// Whole number.
    Integer,
    /// Any JSON number.
    Number,
    /// `true` or `false`.
    Boolean,
}

impl ParamType {
    /// Returns the JSON Schema type name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    /// Returns true if `value` has this type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// Declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,
    /// Expected JSON type.
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Whether the model must supply this parameter.
    pub required: bool,
    /// Natural-language description shown to the model.
    pub description: String,
}

impl ParamSpec {
    /// Creates a required parameter.
    #[must_use]
    pub fn required(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            description: description.into(),
        }
    }

    /// Creates an optional parameter.
    #[must_use]
    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            description: description.into(),
        }
    }
}

/// Description of one callable operation exposed by an adapter.
///
/// Immutable once registered in the catalog. Names are unique across the
/// whole catalog, not just within one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique across the catalog.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// Declared parameters, in presentation order.
    pub parameters: Vec<ParamSpec>,
    /// Name of the adapter that owns this operation.
    pub adapter: String,
}

impl ToolDescriptor {
    /// Creates a descriptor with no parameters.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        adapter: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            adapter: adapter.into(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    /// Looks up a declared parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Renders the parameters as a JSON Schema object.
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                json!({
                    "type": param.param_type.as_str(),
                    "description": param.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call id assigned by the model, echoed back with the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Raw arguments; validated against the descriptor before dispatch.
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    /// Creates a request with a generated call id.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    /// Sets the call id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Why a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The tool name is not in the catalog.
    UnknownTool,
    /// Arguments did not match the declared schema.
    InvalidArguments,
    /// The adapter reported an internal fault.
    AdapterFault,
    /// The adapter did not answer in time.
    Timeout,
}

impl FailureKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownTool => "unknown_tool",
            Self::InvalidArguments => "invalid_arguments",
            Self::AdapterFault => "adapter_fault",
            Self::Timeout => "timeout",
        }
    }

    /// Returns true for failures caused by the catalog or the model's request
    /// rather than by the backend.
    #[must_use]
    pub const fn is_request_error(&self) -> bool {
        matches!(self, Self::UnknownTool | Self::InvalidArguments)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a tool call. Either fully succeeded or fully failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    /// Adapter-specific structured payload.
    Success {
        /// The payload.
        payload: Value,
    },
    /// The call failed.
    Failure {
        /// Failure classification.
        kind: FailureKind,
        /// Human-readable detail.
        message: String,
    },
}

impl ToolResult {
    /// Creates a success result from any serializable payload.
    ///
    /// A payload that cannot be serialized becomes an adapter fault.
    pub fn success(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(payload) => Self::Success { payload },
            Err(e) => Self::failure(
                FailureKind::AdapterFault,
                format!("failed to serialize payload: {e}"),
            ),
        }
    }

    /// Creates a failure result.
    #[must_use]
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    /// Returns true for a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the failure kind, if any.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Renders the result as the text placed in model context.
    #[must_use]
    pub fn to_context_string(&self) -> String {
        match self {
            Self::Success { payload } => payload.to_string(),
            Self::Failure { kind, message } => {
                json!({ "error": message, "kind": kind.as_str() }).to_string()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee_tool() -> ToolDescriptor {
        ToolDescriptor::new("get_employee", "Get an employee by ID", "records")
            .with_param(ParamSpec::required(
                "employee_id",
                ParamType::String,
                "The employee ID",
            ))
            .with_param(ParamSpec::optional(
                "include_leave",
                ParamType::Boolean,
                "Include leave balance",
            ))
    }

    #[test]
    fn test_input_schema_lists_required_only() {
        let schema = employee_tool().input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["employee_id"]["type"], "string");
        assert_eq!(schema["required"], json!(["employee_id"]));
    }

    #[test]
    fn test_param_type_accepts() {
        assert!(ParamType::Integer.accepts(&json!(5)));
        assert!(!ParamType::Integer.accepts(&json!(5.5)));
        assert!(ParamType::Number.accepts(&json!(5.5)));
        assert!(ParamType::String.accepts(&json!("x")));
        assert!(!ParamType::Boolean.accepts(&json!("true")));
    }

    #[test]
    fn test_tool_result_serialization_is_tagged() {
        let ok = ToolResult::success(json!({"name": "Priya"}));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["status"], "success");

        let err = ToolResult::failure(FailureKind::Timeout, "slow");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["status"], "failure");
        assert_eq!(value["kind"], "timeout");
    }

    #[test]
    fn test_failure_context_string() {
        let err = ToolResult::failure(FailureKind::AdapterFault, "db locked");
        let text = err.to_context_string();
        assert!(text.contains("db locked"));
        assert!(text.contains("adapter_fault"));
    }

    #[test]
    fn test_request_error_classification() {
        assert!(FailureKind::UnknownTool.is_request_error());
        assert!(FailureKind::InvalidArguments.is_request_error());
        assert!(!FailureKind::Timeout.is_request_error());
    }
}
