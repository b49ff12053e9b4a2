//! Repository traits for the persistence layer
//!
//! The ETL pipeline and the HTTP handlers talk to storage only through these
//! traits. `PostgresService` implements the database-backed ones and
//! `FsExportStore` the export directory; tests substitute in-memory fakes.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::data::error::DataError;
use crate::data::types::{EtlStatusRow, Row, SchemaRow};
use crate::domain::etl::load::BulkInsert;
use crate::domain::etl::{EtlField, EtlState};
use crate::domain::query::SqlQuery;

/// Pull-based row stream; dropping it releases the underlying connection
pub type RowStream = BoxStream<'static, Result<Row, DataError>>;

// ============================================================================
// ETL control tables
// ============================================================================

/// Access to the `logging` control tables
#[async_trait]
pub trait EtlRepository: Send + Sync {
    async fn etl_status(&self) -> Result<EtlStatusRow, DataError>;

    /// Compare-and-set one status field.
    ///
    /// Returns `false` when the field no longer holds `from`.
    async fn transition(
        &self,
        field: EtlField,
        from: EtlState,
        to: EtlState,
    ) -> Result<bool, DataError>;

    /// Insert an `etl_log` row and return its id
    async fn start_log(&self, start_time: DateTime<Utc>) -> Result<i32, DataError>;

    async fn finish_log(&self, id: i32, end_time: DateTime<Utc>) -> Result<(), DataError>;

    async fn fail_log(&self, id: i32, error: &str) -> Result<(), DataError>;

    /// Mark every log row with neither end time nor error as failed
    async fn fail_unfinished_logs(&self, error: &str) -> Result<u64, DataError>;

    /// Insert an inactive `etl_schemas` row and return its id
    async fn insert_schema(
        &self,
        schema_name: &str,
        creation_date: DateTime<Utc>,
    ) -> Result<i32, DataError>;

    /// All schema rows, newest first
    async fn list_schemas(&self) -> Result<Vec<SchemaRow>, DataError>;

    /// Make `id` the only active schema, in one transaction
    async fn activate_schema(&self, id: i32) -> Result<(), DataError>;

    async fn delete_schema_row(&self, id: i32) -> Result<(), DataError>;
}

// ============================================================================
// Warehouse DDL and loads
// ============================================================================

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run a DDL statement
    async fn execute(&self, statement: &str) -> Result<(), DataError>;

    /// Run a column-array bulk insert, returning the inserted row count
    async fn insert(&self, batch: &BulkInsert) -> Result<u64, DataError>;

    /// Grant USAGE on the schema and SELECT on its relations
    async fn grant_read(&self, schema: &str, role: &str) -> Result<(), DataError>;
}

// ============================================================================
// National-download directories
// ============================================================================

#[async_trait]
pub trait ExportStore: Send + Sync {
    /// Move `latest` aside under `name`; `false` when there is no `latest`
    async fn archive_latest(&self, name: &str) -> Result<bool, DataError>;

    /// Move `new` to `latest`; `false` when there is no `new`
    async fn promote_new(&self) -> Result<bool, DataError>;

    /// Delete archive directories whose name is not in `keep`, returning their names
    async fn prune(&self, keep: &HashSet<String>) -> Result<Vec<String>, DataError>;
}

// ============================================================================
// Query execution
// ============================================================================

#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn active_schema(&self) -> Result<Option<SchemaRow>, DataError>;

    /// First column of the first row as an integer
    async fn fetch_count(&self, query: &SqlQuery) -> Result<i64, DataError>;

    async fn fetch_rows(&self, query: &SqlQuery) -> Result<Vec<Row>, DataError>;

    /// Stream rows over a dedicated connection
    async fn stream_rows(&self, query: SqlQuery) -> Result<RowStream, DataError>;

    /// Whether `schema.table` holds at least one row
    async fn has_rows(&self, schema: &str, table: &str) -> Result<bool, DataError>;
}
