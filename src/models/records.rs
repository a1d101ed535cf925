//! Payload records returned by the backend adapters.

use super::Confidentiality;
use serde::{Deserialize, Serialize};

/// An employee row from the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    /// Employee identifier, e.g. `EMP001`.
    pub employee_id: String,
    /// Full name.
    pub name: String,
    /// Department name.
    pub department: String,
    /// Job title.
    pub position: String,
    /// Join date (`YYYY-MM-DD`).
    pub join_date: String,
    /// Manager's employee id, if any.
    pub manager: Option<String>,
    /// Work email.
    pub email: String,
}

/// Remaining leave days for one employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveBalance {
    /// Employee identifier.
    pub employee_id: String,
    /// Casual leave days left.
    pub casual_leave: i64,
    /// Earned leave days left.
    pub earned_leave: i64,
    /// Sick leave days left.
    pub sick_leave: i64,
    /// Date the balance was last recomputed.
    pub last_updated: String,
}

/// An announcement file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// File name within the announcements directory.
    pub filename: String,
    /// Category from the file header, or `general`.
    pub category: String,
    /// Date from the file header, or the file modification date.
    pub date: String,
    /// First non-header line.
    pub title: String,
    /// Body text; omitted from listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Summary of one indexed policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySummary {
    /// Document identifier.
    pub document_id: String,
    /// Number of chunks indexed.
    pub chunks: usize,
    /// Confidentiality marker.
    pub marker: Confidentiality,
}
