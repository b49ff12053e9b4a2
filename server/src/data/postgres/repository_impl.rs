//! Storage trait implementations for PostgreSQL
//!
//! Thin adapters from the repository functions to the traits the ETL and the
//! HTTP handlers depend on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::data::error::DataError;
use crate::data::traits::{EtlRepository, QueryStore, RowStream, Warehouse};
use crate::data::types::{EtlStatusRow, Row, SchemaRow};
use crate::domain::etl::load::BulkInsert;
use crate::domain::etl::{EtlField, EtlState};
use crate::domain::query::SqlQuery;

use super::PostgresService;
use super::repositories::{etl, query, warehouse};

#[async_trait]
impl EtlRepository for PostgresService {
    // ==================== Status ====================

    async fn etl_status(&self) -> Result<EtlStatusRow, DataError> {
        etl::get_status(self.pool()).await.map_err(Into::into)
    }

    async fn transition(
        &self,
        field: EtlField,
        from: EtlState,
        to: EtlState,
    ) -> Result<bool, DataError> {
        etl::transition(self.pool(), field, from, to)
            .await
            .map_err(Into::into)
    }

    // ==================== Run Log ====================

    async fn start_log(&self, start_time: DateTime<Utc>) -> Result<i32, DataError> {
        etl::start_log(self.pool(), start_time)
            .await
            .map_err(Into::into)
    }

    async fn finish_log(&self, id: i32, end_time: DateTime<Utc>) -> Result<(), DataError> {
        etl::finish_log(self.pool(), id, end_time)
            .await
            .map_err(Into::into)
    }

    async fn fail_log(&self, id: i32, error: &str) -> Result<(), DataError> {
        etl::fail_log(self.pool(), id, error)
            .await
            .map_err(Into::into)
    }

    async fn fail_unfinished_logs(&self, error: &str) -> Result<u64, DataError> {
        etl::fail_unfinished_logs(self.pool(), error)
            .await
            .map_err(Into::into)
    }

    // ==================== Schemas ====================

    async fn insert_schema(
        &self,
        schema_name: &str,
        creation_date: DateTime<Utc>,
    ) -> Result<i32, DataError> {
        etl::insert_schema(self.pool(), schema_name, creation_date)
            .await
            .map_err(Into::into)
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaRow>, DataError> {
        etl::list_schemas(self.pool()).await.map_err(Into::into)
    }

    async fn activate_schema(&self, id: i32) -> Result<(), DataError> {
        etl::activate_schema(self.pool(), id)
            .await
            .map_err(Into::into)
    }

    async fn delete_schema_row(&self, id: i32) -> Result<(), DataError> {
        etl::delete_schema_row(self.pool(), id)
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl Warehouse for PostgresService {
    async fn execute(&self, statement: &str) -> Result<(), DataError> {
        warehouse::execute(self.pool(), statement)
            .await
            .map_err(Into::into)
    }

    async fn insert(&self, batch: &BulkInsert) -> Result<u64, DataError> {
        warehouse::insert(self.pool(), batch)
            .await
            .map_err(Into::into)
    }

    async fn grant_read(&self, schema: &str, role: &str) -> Result<(), DataError> {
        warehouse::grant_read(self.pool(), schema, role)
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl QueryStore for PostgresService {
    async fn active_schema(&self) -> Result<Option<SchemaRow>, DataError> {
        etl::get_active_schema(self.pool())
            .await
            .map_err(Into::into)
    }

    async fn fetch_count(&self, sql: &SqlQuery) -> Result<i64, DataError> {
        query::fetch_count(self.pool(), sql)
            .await
            .map_err(Into::into)
    }

    async fn fetch_rows(&self, sql: &SqlQuery) -> Result<Vec<Row>, DataError> {
        query::fetch_rows(self.pool(), sql)
            .await
            .map_err(Into::into)
    }

    async fn stream_rows(&self, sql: SqlQuery) -> Result<RowStream, DataError> {
        query::stream_rows(self.pool(), sql)
            .await
            .map_err(Into::into)
    }

    async fn has_rows(&self, schema: &str, table: &str) -> Result<bool, DataError> {
        query::has_rows(self.pool(), schema, table)
            .await
            .map_err(Into::into)
    }
}
