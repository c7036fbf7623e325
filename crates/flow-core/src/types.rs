//! Domain entities and enumerations for the work-queue engine: `Actor`,
//! `Container`, `Task`, `Comment`, `Relation`, `Attachment`, `Section`,
//! `Event`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A map of column name to new value, used by `update_fields`.
///
/// Only the columns present in the map are overwritten; everything else is
/// preserved.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// Who or what performed a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Human,
    Agent,
    System,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Self::Human),
            "agent" => Some(Self::Agent),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Kind of node in the project hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Project,
    Feature,
    Area,
    Misc,
}

impl ContainerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Feature => "feature",
            Self::Area => "area",
            Self::Misc => "misc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Self::Project),
            "feature" => Some(Self::Feature),
            "area" => Some(Self::Area),
            "misc" => Some(Self::Misc),
            _ => None,
        }
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Draft,
    Open,
    InProgress,
    Blocked,
    Completed,
    Cancelled,
    Archived,
    Deleted,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "draft" => Self::Draft,
            "open" => Self::Open,
            "in_progress" => Self::InProgress,
            "blocked" => Self::Blocked,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "archived" => Self::Archived,
            "deleted" => Self::Deleted,
            _ => return None,
        })
    }

    /// States that count as "resolved" for blocked-by and acknowledge checks.
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Archived | Self::Deleted
        )
    }
}

/// Kind of task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Task,
    Subtask,
    Spike,
    Bug,
    Chore,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Subtask => "subtask",
            Self::Spike => "spike",
            Self::Bug => "bug",
            Self::Chore => "chore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "task" => Self::Task,
            "subtask" => Self::Subtask,
            "spike" => Self::Spike,
            "bug" => Self::Bug,
            "chore" => Self::Chore,
            _ => return None,
        })
    }
}

/// Terminal resolution recorded when a task leaves the open states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResolution {
    Done,
    WontDo,
    Duplicate,
    NeedsInfo,
}

impl TaskResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::WontDo => "wont_do",
            Self::Duplicate => "duplicate",
            Self::NeedsInfo => "needs_info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "done" => Self::Done,
            "wont_do" => Self::WontDo,
            "duplicate" => Self::Duplicate,
            "needs_info" => Self::NeedsInfo,
            _ => return None,
        })
    }
}

/// Status of an externally-linked run (`cp_run_id`/`sdk_session_id` fields).
/// Fixes the four-state set a CI/agent-run integration needs (see DESIGN.md
/// for the reasoning).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

/// Relation edge kind. Only `blocks` carries defined semantics; the kind
/// column is otherwise open-ended, so this is a thin wrapper over a
/// validated string rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationKind(pub String);

impl RelationKind {
    pub const BLOCKS: &'static str = "blocks";

    pub fn blocks() -> Self {
        Self(Self::BLOCKS.to_string())
    }

    pub fn is_blocks(&self) -> bool {
        self.0 == Self::BLOCKS
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A human, agent, or system identity that performs mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub uuid: Uuid,
    pub friendly_id: Option<String>,
    pub slug: String,
    pub display_name: Option<String>,
    pub role: ActorRole,
}

/// A node in the project hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub uuid: Uuid,
    pub friendly_id: String,
    pub slug: String,
    pub title: Option<String>,
    pub parent_uuid: Option<Uuid>,
    pub kind: ContainerKind,
    pub section_uuid: Option<Uuid>,
    pub sort_index: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_by_actor: Option<Uuid>,
    pub updated_by_actor: Option<Uuid>,
}

/// A leaf work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub uuid: Uuid,
    pub friendly_id: String,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub project_uuid: Uuid,
    pub state: TaskState,
    pub priority: i32,
    pub kind: TaskKind,
    pub parent_task_uuid: Option<Uuid>,
    pub assignee_actor_uuid: Option<Uuid>,
    pub start_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub labels: Option<Vec<String>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolution: Option<TaskResolution>,
    pub cp_project_id: Option<String>,
    pub cp_run_id: Option<String>,
    pub cp_session_id: Option<String>,
    pub sdk_session_id: Option<String>,
    pub run_status: Option<RunStatus>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by_actor: Option<Uuid>,
    pub updated_by_actor: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A comment on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub uuid: Uuid,
    pub friendly_id: String,
    pub task_uuid: Uuid,
    pub actor_uuid: Uuid,
    pub body: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
}

/// A directed edge between two tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub uuid: Uuid,
    pub from_task: Uuid,
    pub to_task: Uuid,
    pub kind: RelationKind,
}

/// A file attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub uuid: Uuid,
    pub friendly_id: String,
    pub task_uuid: Uuid,
    pub filename: String,
    pub relative_path: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: Option<String>,
}

/// A board column / swimlane within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub uuid: Uuid,
    pub project_uuid: Uuid,
    pub slug: String,
    pub title: String,
    pub order_index: i64,
    pub role: String,
    pub is_default: bool,
    pub wip_limit: Option<i32>,
}

/// One row in the append-only event journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub actor_uuid: Option<Uuid>,
    pub resource_type: String,
    pub resource_uuid: Option<Uuid>,
    pub event_type: String,
    pub version: Option<i64>,
    pub payload: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_round_trips_through_as_str() {
        for state in [
            TaskState::Draft,
            TaskState::Open,
            TaskState::InProgress,
            TaskState::Blocked,
            TaskState::Completed,
            TaskState::Cancelled,
            TaskState::Archived,
            TaskState::Deleted,
        ] {
            assert_eq!(TaskState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn resolved_states_match_blocked_by_semantics() {
        assert!(TaskState::Completed.is_resolved());
        assert!(TaskState::Cancelled.is_resolved());
        assert!(TaskState::Archived.is_resolved());
        assert!(TaskState::Deleted.is_resolved());
        assert!(!TaskState::Open.is_resolved());
        assert!(!TaskState::Blocked.is_resolved());
    }

    #[test]
    fn relation_kind_blocks_constructor() {
        let k = RelationKind::blocks();
        assert!(k.is_blocks());
        assert_eq!(k.to_string(), "blocks");
    }
}
