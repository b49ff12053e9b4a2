//! Dataset profiles: table layout, public column aliases and backing views

mod registry;
mod types;

pub use registry::{
    Column, ColumnId, ORGANIZATION_COLUMN, ParamKind, Profile, ProfileError, ProfileRegistry,
    Relation, RelationKind,
};
pub use types::{ColumnDefault, ColumnType, ConcatDef, SourceDef};
