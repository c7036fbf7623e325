//! Shared error taxonomy.
//!
//! Each module in `flow-store` defines its own `thiserror` enum for the
//! errors it can raise internally (`StoreError`, `ResolverError`, ...); all
//! of those map onto the entries here at the point they cross into the CLI
//! boundary, which is the single place an error becomes user-facing text and
//! an exit code.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// A single `{current, incoming}` field divergence reported by bundle apply
/// or cross-database merge.
#[derive(Debug, Clone, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub current: serde_json::Value,
    pub incoming: serde_json::Value,
}

/// The top-level error taxonomy every module-local error converts into at the
/// CLI boundary.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("not found: {selector} (kind={kind})")]
    NotFound { selector: String, kind: String },

    #[error("invalid slug: {input}")]
    SlugInvalid { input: String },

    #[error("invalid path: {input}")]
    PathInvalid { input: String },

    #[error("version conflict: expected {expected}, actual {actual}")]
    VersionConflict { expected: i64, actual: i64 },

    #[error("slug collision under parent {parent:?} for slug {slug:?}")]
    SlugCollision { parent: Option<Uuid>, slug: String },

    #[error("invalid state: {value}")]
    StateInvalid { value: String },

    #[error("invalid priority: {value}")]
    PriorityInvalid { value: String },

    #[error("invalid kind: {value}")]
    KindInvalid { value: String },

    #[error("invalid resolution: {value}")]
    ResolutionInvalid { value: String },

    #[error("invalid run status: {value}")]
    RunStatusInvalid { value: String },

    #[error("blocked by {} task(s)", blockers.len())]
    Blocked { blockers: Vec<Uuid> },

    #[error("bundle conflict at {path}: {reason}")]
    BundleConflict {
        path: String,
        uuid: Option<Uuid>,
        reason: String,
        expected_etag: Option<i64>,
        actual_etag: Option<i64>,
        field_changes: Vec<FieldChange>,
        description_diff: Option<String>,
    },

    #[error("snapshot revision mismatch: expected {expected}, actual {actual}")]
    SnapshotRevMismatch { expected: i64, actual: i64 },

    #[error("io error on {path}: {cause}")]
    IoError { path: String, cause: String },

    #[error("migration pending for database at {path}")]
    MigrationPending { path: String },

    #[error("usage error: {0}")]
    Usage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Exit code at the CLI boundary: `0` success, `1` unexpected failure,
    /// `2` usage error, `4` conflict.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::VersionConflict { .. }
            | Self::SnapshotRevMismatch { .. }
            | Self::BundleConflict { .. } => 4,
            Self::SlugInvalid { .. }
            | Self::PathInvalid { .. }
            | Self::StateInvalid { .. }
            | Self::PriorityInvalid { .. }
            | Self::KindInvalid { .. }
            | Self::ResolutionInvalid { .. }
            | Self::RunStatusInvalid { .. }
            | Self::Usage(_) => 2,
            _ => 1,
        }
    }
}
