//! `From` impls collapsing every module-local error enum into
//! [`flow_core::FlowError`] at the CLI boundary.

use flow_core::FlowError;

use crate::bundle::apply::ApplyError;
use crate::bundle::reader::ReaderError;
use crate::bundle::writer::WriterError;
use crate::doctor::DoctorError;
use crate::merge::MergeError;
use crate::mutation::MutationError;
use crate::patch::PatchError;
use crate::resolver::ResolveError;
use crate::store::StoreError;

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, uuid } => FlowError::NotFound { selector: uuid, kind: kind.to_string() },
            StoreError::VersionConflict { expected, actual } => FlowError::VersionConflict { expected, actual },
            StoreError::SlugCollision { parent, slug } => FlowError::SlugCollision { parent, slug },
            StoreError::StateInvalid(value) => FlowError::StateInvalid { value },
            StoreError::PriorityInvalid(value) => FlowError::PriorityInvalid { value },
            StoreError::KindInvalid(value) => FlowError::KindInvalid { value },
            StoreError::ResolutionInvalid(value) => FlowError::ResolutionInvalid { value },
            StoreError::RunStatusInvalid(value) => FlowError::RunStatusInvalid { value },
            StoreError::InvalidField(value) => FlowError::Internal(value),
            StoreError::Db(e) => FlowError::Internal(e.to_string()),
            StoreError::Sqlx(e) => FlowError::Internal(e.to_string()),
            StoreError::Io(msg) => FlowError::Internal(msg),
        }
    }
}

impl From<ResolveError> for FlowError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Store(e) => e.into(),
            ResolveError::NotFound { selector } => FlowError::NotFound { selector, kind: "selector".to_string() },
        }
    }
}

impl From<MutationError> for FlowError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::Store(e) => e.into(),
            MutationError::Resolve(e) => e.into(),
            MutationError::CannotAcknowledge { state } => {
                FlowError::Usage(format!("cannot acknowledge a task in state {state}"))
            }
            MutationError::DestinationExists(path) => {
                FlowError::Usage(format!("destination already exists: {path}"))
            }
            MutationError::ParentMissing(path) => FlowError::PathInvalid { input: path },
            MutationError::WouldCreateCycle(path) => FlowError::Usage(format!(
                "cannot move a container into its own subtree: {path}"
            )),
        }
    }
}

impl From<WriterError> for FlowError {
    fn from(err: WriterError) -> Self {
        match err {
            WriterError::Store(e) => e.into(),
            WriterError::Db(e) => FlowError::Internal(e.to_string()),
            WriterError::Io(e) => FlowError::IoError { path: String::new(), cause: e.to_string() },
            WriterError::Serialize(reason) => FlowError::Internal(reason),
        }
    }
}

impl From<ReaderError> for FlowError {
    fn from(err: ReaderError) -> Self {
        match err {
            ReaderError::Io(e) => FlowError::IoError { path: String::new(), cause: e.to_string() },
            ReaderError::Manifest(reason) => FlowError::Internal(reason),
            ReaderError::Document { path, reason } => FlowError::IoError { path, cause: reason },
            ReaderError::VersionMismatch { found, expected } => {
                FlowError::Usage(format!("bundle version {found} is incompatible with {expected}"))
            }
        }
    }
}

impl From<ApplyError> for FlowError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::Reader(e) => e.into(),
            ApplyError::Store(e) => e.into(),
        }
    }
}

impl From<MergeError> for FlowError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Store(e) => e.into(),
            MergeError::Resolve(e) => e.into(),
            MergeError::SourceNotFound(path) => FlowError::NotFound { selector: path, kind: "container".to_string() },
        }
    }
}

impl From<PatchError> for FlowError {
    fn from(err: PatchError) -> Self {
        match err {
            PatchError::Store(e) => e.into(),
            PatchError::Resolve(e) => e.into(),
            PatchError::MalformedPath(path) => FlowError::Usage(format!("malformed patch path: {path}")),
            PatchError::RevisionMismatch { expected, actual } => FlowError::SnapshotRevMismatch { expected, actual },
            PatchError::Strict(reason) => FlowError::Usage(reason),
        }
    }
}

impl From<DoctorError> for FlowError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::Store(e) => e.into(),
            DoctorError::Db(e) => FlowError::Internal(e.to_string()),
        }
    }
}
