pub mod config;
pub mod error;
pub mod normalize;
pub mod types;

pub use config::Config;
pub use error::{FieldChange, FlowError};
pub use normalize::{glob_to_sql_pattern, join_path, join_segments, normalize_slug, split_path};
pub use types::{
    Actor, ActorRole, Attachment, Comment, Container, ContainerKind, Event, FieldMap, Relation,
    RelationKind, RunStatus, Section, Task, TaskKind, TaskResolution, TaskState,
};
