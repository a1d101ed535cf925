//! Flat-file announcement adapter.
//!
//! Announcements are plain `.txt` files in one directory. A file may open with
//! `Category:` and `Date:` header lines; the first non-header, non-blank line
//! is the title. Files without a category header are filed under `general`,
//! files without a date header use their modification date.

use super::{Adapter, fault, parse_operation};
use crate::models::{
    Announcement, FailureKind, ParamSpec, ParamType, ToolDescriptor, ToolResult,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

const ADAPTER_NAME: &str = "announcements";

/// Default and maximum for `recent_announcements`.
const DEFAULT_RECENT: i64 = 5;
const MAX_RECENT: i64 = 50;

/// Cap on files considered per operation.
const MAX_FILES: usize = 500;

/// `Category: <name>` or `Date: <date>` header line.
static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(category|date)\s*:\s*(.+?)\s*$").unwrap_or_else(|_| unreachable!())
});

#[derive(Debug, Deserialize)]
#[serde(tag = "operation", content = "arguments", rename_all = "snake_case")]
enum AnnouncementOp {
    ListAnnouncements {
        #[serde(default)]
        category: Option<String>,
    },
    ReadAnnouncement {
        filename: String,
    },
    SearchAnnouncements {
        keyword: String,
    },
    RecentAnnouncements {
        #[serde(default)]
        count: Option<i64>,
    },
}

/// Adapter over a directory of announcement text files.
#[derive(Debug, Clone)]
pub struct AnnouncementAdapter {
    dir: PathBuf,
}

impl AnnouncementAdapter {
    /// Adapter name used as descriptor owner.
    pub const NAME: &'static str = ADAPTER_NAME;

    /// Creates an adapter reading from `dir`.
    ///
    /// A missing directory is not an error; it simply holds no announcements.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Directory this adapter reads from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn load_all(&self) -> std::io::Result<Vec<Announcement>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "Announcement directory missing");
                return Ok(Vec::new());
            },
            Err(e) => return Err(e),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                paths.push(path);
            }
        }
        // Cap after sorting so the kept set does not depend on directory order.
        paths.sort();
        paths.truncate(MAX_FILES);

        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::load_file(&path).await {
                Ok(announcement) => out.push(announcement),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable announcement");
                },
            }
        }
        out.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(out)
    }

    async fn load_file(path: &Path) -> std::io::Result<Announcement> {
        let bytes = tokio::fs::read(path).await?;
        let text = String::from_utf8_lossy(&bytes);
        let modified = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).format("%Y-%m-%d").to_string());
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(parse_announcement(filename, &text, modified))
    }

    fn resolve_filename(&self, filename: &str) -> Result<PathBuf, ToolResult> {
        let name = filename.trim();
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || Path::new(name).is_absolute()
        {
            return Err(ToolResult::failure(
                FailureKind::InvalidArguments,
                format!("filename must be a plain file name: {filename}"),
            ));
        }
        Ok(self.dir.join(name))
    }

    async fn run(&self, op: AnnouncementOp) -> std::io::Result<ToolResult> {
        match op {
            AnnouncementOp::ListAnnouncements { category } => {
                let category = category.map(|c| c.trim().to_lowercase());
                let items: Vec<Announcement> = self
                    .load_all()
                    .await?
                    .into_iter()
                    .filter(|a| {
                        category
                            .as_deref()
                            .is_none_or(|c| a.category.eq_ignore_ascii_case(c))
                    })
                    .map(without_content)
                    .collect();
                Ok(announcement_list(items))
            },
            AnnouncementOp::ReadAnnouncement { filename } => {
                let path = match self.resolve_filename(&filename) {
                    Ok(path) => path,
                    Err(failure) => return Ok(failure),
                };
                match Self::load_file(&path).await {
                    Ok(announcement) => Ok(ToolResult::success(json!({
                        "found": true,
                        "announcement": announcement,
                    }))),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Ok(ToolResult::success(json!({
                            "found": false,
                            "filename": filename,
                        })))
                    },
                    Err(e) => Err(e),
                }
            },
            AnnouncementOp::SearchAnnouncements { keyword } => {
                let needle = keyword.trim().to_lowercase();
                if needle.is_empty() {
                    return Ok(ToolResult::failure(
                        FailureKind::InvalidArguments,
                        "keyword must not be empty",
                    ));
                }
                let items: Vec<Announcement> = self
                    .load_all()
                    .await?
                    .into_iter()
                    .filter(|a| {
                        a.title.to_lowercase().contains(&needle)
                            || a.content
                                .as_deref()
                                .is_some_and(|c| c.to_lowercase().contains(&needle))
                    })
                    .collect();
                Ok(announcement_list(items))
            },
            AnnouncementOp::RecentAnnouncements { count } => {
                let count = count.unwrap_or(DEFAULT_RECENT).clamp(1, MAX_RECENT);
                let mut items = self.load_all().await?;
                // Newest first; ISO dates sort lexically.
                items.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.filename.cmp(&b.filename)));
                items.truncate(usize::try_from(count).unwrap_or(1));
                Ok(announcement_list(items))
            },
        }
    }
}

#[async_trait]
impl Adapter for AnnouncementAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                "list_announcements",
                "List all available announcement files, optionally only one category",
                ADAPTER_NAME,
            )
            .with_param(ParamSpec::optional(
                "category",
                ParamType::String,
                "Category to filter by (e.g., 'holiday', 'event', 'policy')",
            )),
            ToolDescriptor::new(
                "read_announcement",
                "Read the full content of a specific announcement file",
                ADAPTER_NAME,
            )
            .with_param(ParamSpec::required(
                "filename",
                ParamType::String,
                "Name of the announcement file (e.g., 'holiday_2024.txt')",
            )),
            ToolDescriptor::new(
                "search_announcements",
                "Search announcements by keyword",
                ADAPTER_NAME,
            )
            .with_param(ParamSpec::required(
                "keyword",
                ParamType::String,
                "Keyword to search for in announcements",
            )),
            ToolDescriptor::new(
                "recent_announcements",
                "Get the most recent announcements, newest first",
                ADAPTER_NAME,
            )
            .with_param(ParamSpec::optional(
                "count",
                ParamType::Integer,
                "How many announcements to return (default 5)",
            )),
        ]
    }

    async fn invoke(&self, operation: &str, arguments: Map<String, Value>) -> ToolResult {
        let op: AnnouncementOp = match parse_operation(operation, arguments) {
            Ok(op) => op,
            Err(failure) => return failure,
        };
        self.run(op)
            .await
            .unwrap_or_else(|e| fault(operation, e))
    }
}

/// Parses header lines, title and body out of an announcement file.
fn parse_announcement(filename: String, text: &str, modified: Option<String>) -> Announcement {
    let mut category = None;
    let mut date = None;
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.peek() {
        if line.trim().is_empty() {
            lines.next();
            continue;
        }
        let Some(caps) = HEADER.captures(line) else {
            break;
        };
        let value = caps.get(2).map(|m| m.as_str().to_string());
        match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
            Some("category") => category = value.map(|v| v.to_lowercase()),
            Some("date") => date = value,
            _ => {},
        }
        lines.next();
    }

    let body: Vec<&str> = lines.collect();
    let title = body
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .map_or_else(|| filename.clone(), ToString::to_string);

    Announcement {
        filename,
        category: category.unwrap_or_else(|| "general".to_string()),
        date: date.or(modified).unwrap_or_default(),
        title,
        content: Some(body.join("\n").trim().to_string()),
    }
}

fn without_content(mut announcement: Announcement) -> Announcement {
    announcement.content = None;
    announcement
}

fn announcement_list(items: Vec<Announcement>) -> ToolResult {
    ToolResult::success(json!({
        "count": items.len(),
        "announcements": items,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, AnnouncementAdapter) {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("holiday_2024.txt"),
            "Category: Holiday\nDate: 2024-12-20\n\nYear-end holidays\nThe office is closed from Dec 25 to Jan 1.\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("townhall.txt"),
            "Category: event\nDate: 2025-01-15\nQuarterly town hall\nJoin us in the main auditorium.\n",
        )
        .unwrap();
        fs::write(dir.path().join("wifi.txt"), "New guest wifi password rotation\n").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        let adapter = AnnouncementAdapter::new(dir.path());
        (dir, adapter)
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn payload(result: ToolResult) -> Value {
        match result {
            ToolResult::Success { payload } => payload,
            ToolResult::Failure { kind, message } => panic!("{kind}: {message}"),
        }
    }

    #[test]
    fn test_parse_headers() {
        let a = parse_announcement(
            "x.txt".to_string(),
            "Category: Policy\nDate: 2025-02-01\nNew travel rules\nBody",
            None,
        );
        assert_eq!(a.category, "policy");
        assert_eq!(a.date, "2025-02-01");
        assert_eq!(a.title, "New travel rules");
    }

    #[test]
    fn test_parse_without_headers() {
        let a = parse_announcement(
            "x.txt".to_string(),
            "Just a title\nbody",
            Some("2025-03-03".to_string()),
        );
        assert_eq!(a.category, "general");
        assert_eq!(a.date, "2025-03-03");
        assert_eq!(a.title, "Just a title");
    }

    #[tokio::test]
    async fn test_list_by_category() {
        let (_dir, adapter) = fixture();
        let all = payload(adapter.invoke("list_announcements", Map::new()).await);
        assert_eq!(all["count"], 3);
        assert!(all["announcements"][0].get("content").is_none());

        let holidays = payload(
            adapter
                .invoke("list_announcements", args(json!({"category": "HOLIDAY"})))
                .await,
        );
        assert_eq!(holidays["count"], 1);
        assert_eq!(holidays["announcements"][0]["filename"], "holiday_2024.txt");
    }

    #[tokio::test]
    async fn test_read_announcement() {
        let (_dir, adapter) = fixture();
        let read = payload(
            adapter
                .invoke("read_announcement", args(json!({"filename": "townhall.txt"})))
                .await,
        );
        assert_eq!(read["found"], true);
        assert!(
            read["announcement"]["content"]
                .as_str()
                .unwrap()
                .contains("auditorium")
        );

        let missing = payload(
            adapter
                .invoke("read_announcement", args(json!({"filename": "nope.txt"})))
                .await,
        );
        assert_eq!(missing["found"], false);
    }

    #[tokio::test]
    async fn test_read_rejects_traversal() {
        let (_dir, adapter) = fixture();
        for name in ["../secret.txt", "a/b.txt", "..", "C:\\x.txt"] {
            let result = adapter
                .invoke("read_announcement", args(json!({"filename": name})))
                .await;
            assert_eq!(
                result.failure_kind(),
                Some(FailureKind::InvalidArguments),
                "{name}"
            );
        }
    }

    #[tokio::test]
    async fn test_search_and_recent() {
        let (_dir, adapter) = fixture();
        let found = payload(
            adapter
                .invoke("search_announcements", args(json!({"keyword": "Closed"})))
                .await,
        );
        assert_eq!(found["count"], 1);

        let recent = payload(
            adapter
                .invoke("recent_announcements", args(json!({"count": 2})))
                .await,
        );
        assert_eq!(recent["count"], 2);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let adapter = AnnouncementAdapter::new("/nonexistent/ragmcp/announcements");
        let result = payload(adapter.invoke("list_announcements", Map::new()).await);
        assert_eq!(result["count"], 0);
    }

    #[tokio::test]
    async fn test_non_utf8_file_does_not_hide_others() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("good.txt"), "Category: event
Offsite
Bring snacks.
").unwrap();
        fs::write(dir.path().join("latin1.txt"), b"Caf\xE9 menu\n").unwrap();
        let adapter = AnnouncementAdapter::new(dir.path());

        let all = payload(adapter.invoke("list_announcements", Map::new()).await);
        assert_eq!(all["count"], 2);
        assert_eq!(all["announcements"][0]["filename"], "good.txt");
        assert!(
            all["announcements"][1]["title"]
                .as_str()
                .unwrap()
                .starts_with("Caf")
        );

        let found = payload(
            adapter
                .invoke("search_announcements", args(json!({"keyword": "snacks"})))
                .await,
        );
        assert_eq!(found["count"], 1);
    }

    #[tokio::test]
    async fn test_file_cap_keeps_first_names_in_order() {
        let dir = TempDir::new().unwrap();
        for i in (0..MAX_FILES + 3).rev() {
            fs::write(dir.path().join(format!("note_{i:04}.txt")), format!("Note {i}\n")).unwrap();
        }
        let adapter = AnnouncementAdapter::new(dir.path());

        let all = payload(adapter.invoke("list_announcements", Map::new()).await);
        let items = all["announcements"].as_array().unwrap();
        assert_eq!(items.len(), MAX_FILES);
        assert_eq!(items[0]["filename"], "note_0000.txt");
        assert_eq!(
            items[MAX_FILES - 1]["filename"],
            format!("note_{:04}.txt", MAX_FILES - 1)
        );
    }
}
