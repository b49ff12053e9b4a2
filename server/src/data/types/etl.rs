//! Control-table rows for the ETL pipeline and health checks

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::etl::EtlState;

/// Row of `logging.etl_schemas`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaRow {
    pub id: i32,
    pub schema_name: String,
    pub creation_date: DateTime<Utc>,
    pub active: bool,
}

/// The singleton `logging.etl_status` row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EtlStatusRow {
    pub database: EtlState,
    pub glossary: EtlState,
    pub domain_values: EtlState,
}
