//! Shared data types for the persistence layer

mod etl;

pub use etl::{EtlStatusRow, SchemaRow};

/// One result row, keys in select-list order
pub type Row = serde_json::Map<String, serde_json::Value>;
