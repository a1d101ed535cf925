//! Confidentiality enforcement.
//!
//! [`ConfidentialityFilter`] is the single control point between adapter
//! results and model context: every tool result passes through it before it
//! is recorded, and any chunk whose marker exceeds the session's
//! [`AccessLevel`] is dropped. [`AccessPolicy`] decides which level a new
//! session receives.
//!
//! # Access scheme
//!
//! | Session level | Sees markers |
//! |---------------|--------------|
//! | `public` | `public` |
//! | `restricted` | `public`, `restricted` |
//! | `confidential` | all |

use crate::models::{AccessLevel, Confidentiality, DocumentChunk, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Payload fields whose entries carry a confidentiality marker: ranked
/// chunks from `search_policies` and document summaries from `list_policies`.
const MARKED_FIELDS: &[&str] = &["chunks", "policies"];

/// The only part of a marked entry the filter reads.
#[derive(Deserialize)]
struct Marked {
    marker: Confidentiality,
}

/// Removes document content a session is not cleared to see.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidentialityFilter;

/// A filtered tool result and how many chunks were withheld from it.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredResult {
    /// The result safe to place in model context.
    pub result: ToolResult,
    /// Number of marked entries removed.
    pub withheld: usize,
}

impl ConfidentialityFilter {
    /// Keeps the chunks visible at `level`, in their original order.
    ///
    /// Total: never fails, and an empty input yields an empty output.
    /// Filtering an already filtered sequence at the same level is a no-op.
    #[must_use]
    pub fn filter(chunks: Vec<DocumentChunk>, level: AccessLevel) -> Vec<DocumentChunk> {
        chunks
            .into_iter()
            .filter(|chunk| level.permits(chunk.marker))
            .collect()
    }

    /// Filters the marked arrays (`chunks`, `policies`) of a success payload.
    ///
    /// Results without such a field pass through unchanged, as do failures.
    /// Entries without a readable marker are withheld, since their level
    /// cannot be checked. When anything is withheld the payload's `count` is
    /// corrected and a `withheld` field records how many entries were removed.
    #[must_use]
    pub fn filter_result(result: ToolResult, level: AccessLevel) -> FilteredResult {
        let ToolResult::Success { mut payload } = result else {
            return FilteredResult {
                result,
                withheld: 0,
            };
        };

        let withheld = payload.as_object_mut().map_or(0, |object| {
            let mut withheld = 0;
            let mut visible_count = None;
            for field in MARKED_FIELDS {
                if let Some(raw) = object.get_mut(*field) {
                    let (visible, removed) = Self::filter_raw(raw.take(), level);
                    visible_count = Some(visible.len());
                    *raw = Value::Array(visible);
                    withheld += removed;
                }
            }
            if withheld > 0 {
                if let Some(count) = visible_count.filter(|_| object.contains_key("count")) {
                    object.insert("count".to_string(), Value::from(count));
                }
                object.insert("withheld".to_string(), Value::from(withheld));
            }
            withheld
        });

        if withheld > 0 {
            metrics::counter!("confidential_chunks_withheld_total")
                .increment(u64::try_from(withheld).unwrap_or(u64::MAX));
            tracing::debug!(
                level = level.as_str(),
                withheld = withheld,
                "Withheld document content above session access level"
            );
        }

        FilteredResult {
            result: ToolResult::Success { payload },
            withheld,
        }
    }

    fn filter_raw(raw: Value, level: AccessLevel) -> (Vec<Value>, usize) {
        let Value::Array(items) = raw else {
            return (Vec::new(), usize::from(!raw.is_null()));
        };

        let total = items.len();
        let visible: Vec<Value> = items
            .into_iter()
            .filter(|item| {
                serde_json::from_value::<Marked>(item.clone())
                    .is_ok_and(|entry| level.permits(entry.marker))
            })
            .collect();
        let withheld = total - visible.len();
        (visible, withheld)
    }
}

/// Maps sessions to access levels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    default_level: AccessLevel,
    #[serde(default)]
    sessions: HashMap<String, AccessLevel>,
}

impl AccessPolicy {
    /// Creates a policy granting `default_level` to every session.
    #[must_use]
    pub fn new(default_level: AccessLevel) -> Self {
        Self {
            default_level,
            sessions: HashMap::new(),
        }
    }

    /// Grants `level` to one session id.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>, level: AccessLevel) -> Self {
        self.sessions.insert(session_id.into(), level);
        self
    }

    /// Replaces the default level.
    #[must_use]
    pub const fn with_default_level(mut self, level: AccessLevel) -> Self {
        self.default_level = level;
        self
    }

    /// Level for sessions without a mapping.
    #[must_use]
    pub const fn default_level(&self) -> AccessLevel {
        self.default_level
    }

    /// Level for `session_id`.
    #[must_use]
    pub fn level_for(&self, session_id: &str) -> AccessLevel {
        self.sessions
            .get(session_id)
            .copied()
            .unwrap_or(self.default_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidentiality, FailureKind};
    use serde_json::json;

    fn chunk(id: &str, marker: Confidentiality, score: f32) -> DocumentChunk {
        DocumentChunk {
            document_id: id.to_string(),
            text: format!("{id} text"),
            marker,
            score,
        }
    }

    fn mixed() -> Vec<DocumentChunk> {
        vec![
            chunk("leave", Confidentiality::Public, 0.9),
            chunk("salary_bands", Confidentiality::Confidential, 0.8),
            chunk("security", Confidentiality::Restricted, 0.7),
            chunk("holidays", Confidentiality::Public, 0.4),
        ]
    }

    #[test]
    fn test_filter_keeps_order() {
        let visible = ConfidentialityFilter::filter(mixed(), AccessLevel::Public);
        let ids: Vec<&str> = visible.iter().map(|c| c.document_id.as_str()).collect();
        assert_eq!(ids, vec!["leave", "holidays"]);

        let visible = ConfidentialityFilter::filter(mixed(), AccessLevel::Restricted);
        assert_eq!(visible.len(), 3);

        let visible = ConfidentialityFilter::filter(mixed(), AccessLevel::Confidential);
        assert_eq!(visible, mixed());
    }

    #[test]
    fn test_filter_empty() {
        assert!(ConfidentialityFilter::filter(Vec::new(), AccessLevel::Public).is_empty());
    }

    #[test]
    fn test_filter_result_rewrites_payload() {
        let result = ToolResult::success(json!({
            "query": "salary",
            "count": 4,
            "chunks": mixed(),
        }));
        let filtered = ConfidentialityFilter::filter_result(result, AccessLevel::Public);
        assert_eq!(filtered.withheld, 2);

        let ToolResult::Success { payload } = filtered.result else {
            panic!("expected success");
        };
        assert_eq!(payload["count"], 2);
        assert_eq!(payload["withheld"], 2);
        assert!(!payload.to_string().contains("salary_bands text"));
    }

    #[test]
    fn test_filter_result_fails_closed_on_malformed_chunks() {
        let result = ToolResult::success(json!({
            "chunks": [
                {"document_id": "a", "text": "no marker here", "score": 0.9},
                {"document_id": "b", "text": "fine", "marker": "public", "score": 0.5},
            ],
        }));
        let filtered = ConfidentialityFilter::filter_result(result, AccessLevel::Confidential);
        assert_eq!(filtered.withheld, 1);
        assert!(!filtered.result.to_context_string().contains("no marker here"));

        let result = ToolResult::success(json!({ "chunks": "raw text" }));
        let filtered = ConfidentialityFilter::filter_result(result, AccessLevel::Confidential);
        assert_eq!(filtered.withheld, 1);
        assert!(!filtered.result.to_context_string().contains("raw text"));
    }

    #[test]
    fn test_filter_result_hides_policy_listing_entries() {
        let result = ToolResult::success(json!({
            "count": 3,
            "policies": [
                {"document_id": "leave_policy", "chunks": 4, "marker": "public"},
                {"document_id": "incident_response", "chunks": 2, "marker": "restricted"},
                {"document_id": "salary_bands", "chunks": 1, "marker": "confidential"},
            ],
        }));

        let filtered = ConfidentialityFilter::filter_result(result.clone(), AccessLevel::Public);
        assert_eq!(filtered.withheld, 2);
        let text = filtered.result.to_context_string();
        assert!(text.contains("leave_policy"));
        assert!(!text.contains("salary_bands"));
        assert!(!text.contains("incident_response"));

        let filtered = ConfidentialityFilter::filter_result(result, AccessLevel::Restricted);
        assert_eq!(filtered.withheld, 1);
        let ToolResult::Success { payload } = filtered.result else {
            panic!("expected success");
        };
        assert_eq!(payload["count"], 2);
    }

    #[test]
    fn test_filter_result_passes_other_payloads() {
        let result = ToolResult::success(json!({ "found": true, "employee": {"id": "EMP001"} }));
        let filtered = ConfidentialityFilter::filter_result(result.clone(), AccessLevel::Public);
        assert_eq!(filtered.result, result);
        assert_eq!(filtered.withheld, 0);

        let failure = ToolResult::failure(FailureKind::Timeout, "slow");
        let filtered = ConfidentialityFilter::filter_result(failure.clone(), AccessLevel::Public);
        assert_eq!(filtered.result, failure);
    }

    #[test]
    fn test_access_policy() {
        let policy = AccessPolicy::new(AccessLevel::Public)
            .with_session("hr-admin", AccessLevel::Confidential);
        assert_eq!(policy.level_for("hr-admin"), AccessLevel::Confidential);
        assert_eq!(policy.level_for("guest"), AccessLevel::Public);

        let policy = policy.with_default_level(AccessLevel::Restricted);
        assert_eq!(policy.level_for("guest"), AccessLevel::Restricted);
        assert_eq!(policy.default_level(), AccessLevel::Restricted);
    }
}
