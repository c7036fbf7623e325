//! Typed CRUD over the seven entity kinds.
//!
//! Each submodule owns one entity table and is the sole writer of it.
//! `update_fields` on the versioned entities (`Container`, `Task`, `Comment`)
//! shares the same contract: compare-and-increment `version`, stamp
//! `updated_by_actor`/`updated_at`, and log a `<resource>.updated` event in
//! the same transaction.

pub mod actor;
pub mod attachment;
pub mod comment;
pub mod container;
pub mod counters;
pub mod relation;
pub mod section;
pub mod task;

use flow_core::FieldChange;
use thiserror::Error;
use uuid::Uuid;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("not found: {kind} {uuid}")]
    NotFound { kind: &'static str, uuid: String },
    #[error("version conflict: expected {expected}, actual {actual}")]
    VersionConflict { expected: i64, actual: i64 },
    #[error("slug collision under parent {parent:?} for slug {slug:?}")]
    SlugCollision { parent: Option<Uuid>, slug: String },
    #[error("invalid state: {0}")]
    StateInvalid(String),
    #[error("invalid priority: {0}")]
    PriorityInvalid(String),
    #[error("invalid kind: {0}")]
    KindInvalid(String),
    #[error("invalid resolution: {0}")]
    ResolutionInvalid(String),
    #[error("invalid run status: {0}")]
    RunStatusInvalid(String),
    #[error("invalid field: {0}")]
    InvalidField(String),
    #[error("io error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of a successful `update_fields` call: the new version plus the
/// set of field-level changes applied, used by bundle apply's conflict
/// reporting and by the mutation engine's renderers.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub new_version: i64,
    pub changes: Vec<FieldChange>,
}
