//! Argument validation against a tool descriptor.
//!
//! Model output is schema-less JSON. Arguments are checked here before any
//! adapter sees them, so adapters can deserialize into typed structs without
//! guarding against missing or mistyped fields.

use crate::models::{ParamType, ToolDescriptor};
use serde_json::{Map, Value};
use std::fmt;

/// What was wrong with one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentProblem {
    /// The arguments were not a JSON object.
    NotAnObject,
    /// A required parameter is absent.
    Missing,
    /// The value has the wrong JSON type.
    WrongType {
        /// Declared type.
        expected: ParamType,
        /// JSON type actually received.
        found: &'static str,
    },
}

/// A single offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentError {
    /// Field name (`$` for the arguments object itself).
    pub field: String,
    /// The problem.
    pub problem: ArgumentProblem,
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            ArgumentProblem::NotAnObject => {
                write!(f, "{}: arguments must be a JSON object", self.field)
            },
            ArgumentProblem::Missing => write!(f, "{}: required field missing", self.field),
            ArgumentProblem::WrongType { expected, found } => write!(
                f,
                "{}: expected {}, found {found}",
                self.field,
                expected.as_str()
            ),
        }
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validates raw arguments against a descriptor.
///
/// Returns the cleaned argument object on success: undeclared fields are
/// dropped and `null` optional fields are treated as absent. On failure,
/// every offending field is reported, not just the first.
pub fn validate_arguments(
    descriptor: &ToolDescriptor,
    arguments: &Value,
) -> Result<Map<String, Value>, Vec<ArgumentError>> {
    let empty = Map::new();
    let object = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            return Err(vec![ArgumentError {
                field: "$".to_string(),
                problem: ArgumentProblem::NotAnObject,
            }]);
        },
    };

    let mut errors = Vec::new();
    let mut cleaned = Map::new();

    for param in &descriptor.parameters {
        match object.get(&param.name) {
            None | Some(Value::Null) => {
                if param.required {
                    errors.push(ArgumentError {
                        field: param.name.clone(),
                        problem: ArgumentProblem::Missing,
                    });
                }
            },
            Some(value) if param.param_type.accepts(value) => {
                cleaned.insert(param.name.clone(), value.clone());
            },
            Some(value) => errors.push(ArgumentError {
                field: param.name.clone(),
                problem: ArgumentProblem::WrongType {
                    expected: param.param_type,
                    found: json_type_name(value),
                },
            }),
        }
    }

    for key in object.keys() {
        if descriptor.param(key).is_none() {
            tracing::debug!(tool = %descriptor.name, field = %key, "Dropping undeclared argument");
        }
    }

    if errors.is_empty() {
        Ok(cleaned)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParamSpec;
    use serde_json::json;
    use test_case::test_case;

    fn search_tool() -> ToolDescriptor {
        ToolDescriptor::new("search_policies", "Search policies", "policies")
            .with_param(ParamSpec::required("query", ParamType::String, "query"))
            .with_param(ParamSpec::optional("top_k", ParamType::Integer, "limit"))
    }

    #[test_case(json!({"query": "sick leave"}) ; "required only")]
    #[test_case(json!({"query": "sick leave", "top_k": 3}) ; "with optional")]
    #[test_case(json!({"query": "sick leave", "top_k": null}) ; "null optional")]
    fn test_valid_arguments(args: Value) {
        let cleaned = validate_arguments(&search_tool(), &args).unwrap();
        assert_eq!(cleaned["query"], "sick leave");
    }

    #[test_case(json!({}), "query" ; "missing required")]
    #[test_case(json!({"query": 42}), "query" ; "wrong type")]
    #[test_case(json!({"query": "x", "top_k": "three"}), "top_k" ; "optional wrong type")]
    #[test_case(json!("just a string"), "$" ; "not an object")]
    fn test_invalid_arguments(args: Value, field: &str) {
        let errors = validate_arguments(&search_tool(), &args).unwrap_err();
        assert!(errors.iter().any(|e| e.field == field), "{errors:?}");
    }

    #[test]
    fn test_reports_every_offending_field() {
        let tool = search_tool();
        let errors = validate_arguments(&tool, &json!({"top_k": 1.5})).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_undeclared_fields_are_dropped() {
        let cleaned =
            validate_arguments(&search_tool(), &json!({"query": "x", "verbose": true})).unwrap();
        assert!(!cleaned.contains_key("verbose"));
    }

    #[test]
    fn test_null_arguments_for_parameterless_tool() {
        let tool = ToolDescriptor::new("list_policies", "List", "policies");
        assert!(validate_arguments(&tool, &Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = ArgumentError {
            field: "query".to_string(),
            problem: ArgumentProblem::WrongType {
                expected: ParamType::String,
                found: "number",
            },
        };
        assert_eq!(err.to_string(), "query: expected string, found number");
    }
}
