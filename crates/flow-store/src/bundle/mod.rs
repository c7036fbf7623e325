//! Directory-serialized export/import of a filtered slice of the database.

pub mod apply;
pub mod reader;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MACHINE_INTERFACE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub machine_interface_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_cursor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub path_prefixes: Vec<String>,
    pub with_attachments: bool,
    pub with_events: bool,
    pub include_refs: bool,
    pub ref_count: usize,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_date: Option<String>,
}

/// Filter applied while selecting which containers/tasks enter a bundle.
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    pub actor: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub project: Option<String>,
    pub path_prefixes: Vec<String>,
    pub with_attachments: bool,
    pub with_events: bool,
}

/// Parsed YAML front-matter from a `tasks/<path>.md` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFrontMatter {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    pub slug: String,
    pub title: String,
    pub state: String,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    pub etag: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<Uuid>,
}

/// One parsed task document: front-matter plus the description body.
#[derive(Debug, Clone)]
pub struct TaskDocument {
    pub path: String,
    pub front_matter: TaskFrontMatter,
    pub body: String,
}

/// Split a markdown document into its `--- ... ---` front-matter and body.
pub fn split_front_matter(content: &str) -> Result<(&str, &str), String> {
    let rest = content
        .strip_prefix("---\n")
        .ok_or_else(|| "missing front-matter delimiter".to_string())?;
    let (front, after) = rest
        .split_once("\n---")
        .ok_or_else(|| "unterminated front-matter block".to_string())?;
    let body = after.strip_prefix('\n').unwrap_or(after);
    Ok((front, body))
}

pub fn render_document(front: &TaskFrontMatter, body: &str) -> Result<String, String> {
    let yaml = serde_yaml::to_string(front).map_err(|e| e.to_string())?;
    Ok(format!("---\n{yaml}---\n{body}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_front_matter_extracts_both_parts() {
        let doc = "---\nid: T-00001\nslug: fix-bug\ntitle: Fix the bug\nstate: open\npriority: 3\netag: 1\ncreated_at: 2024-01-01T00:00:00Z\nupdated_at: 2024-01-01T00:00:00Z\n---\nBody text here.\n";
        let (front, body) = split_front_matter(doc).unwrap();
        assert!(front.contains("slug: fix-bug"));
        assert_eq!(body.trim(), "Body text here.");
    }
}
