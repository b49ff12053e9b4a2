//! ETL control-table repository for PostgreSQL operations

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;
use crate::data::types::{EtlStatusRow, SchemaRow};
use crate::domain::etl::{EtlField, EtlState};

type SchemaTuple = (i32, String, DateTime<Utc>, bool);

fn schema_row((id, schema_name, creation_date, active): SchemaTuple) -> SchemaRow {
    SchemaRow {
        id,
        schema_name,
        creation_date,
        active,
    }
}

fn parse_state(value: &str) -> Result<EtlState, PostgresError> {
    value.parse().map_err(PostgresError::Decode)
}

/// Read the status row; a missing row reads as all idle
pub async fn get_status(pool: &PgPool) -> Result<EtlStatusRow, PostgresError> {
    let row: Option<(String, String, String)> = sqlx::query_as(
        "SELECT database, glossary, domain_values FROM logging.etl_status WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    match row {
        Some((database, glossary, domain_values)) => Ok(EtlStatusRow {
            database: parse_state(&database)?,
            glossary: parse_state(&glossary)?,
            domain_values: parse_state(&domain_values)?,
        }),
        None => Ok(EtlStatusRow::default()),
    }
}

/// Conditional single-field update; `false` when the field no longer holds `from`
pub async fn transition(
    pool: &PgPool,
    field: EtlField,
    from: EtlState,
    to: EtlState,
) -> Result<bool, PostgresError> {
    if !from.can_transition_to(to) {
        return Err(PostgresError::Conflict(format!(
            "{} cannot move from {} to {}",
            field, from, to
        )));
    }

    let sql = format!(
        "UPDATE logging.etl_status SET {col} = $1 WHERE id = 1 AND {col} = $2",
        col = field.column()
    );
    let result = sqlx::query(&sql)
        .bind(to.as_str())
        .bind(from.as_str())
        .execute(pool)
        .await?;

    let applied = result.rows_affected() == 1;
    if applied {
        tracing::debug!(%field, %from, %to, "ETL status updated");
    }
    Ok(applied)
}

pub async fn start_log(pool: &PgPool, start_time: DateTime<Utc>) -> Result<i32, PostgresError> {
    let (id,): (i32,) =
        sqlx::query_as("INSERT INTO logging.etl_log (start_time) VALUES ($1) RETURNING id")
            .bind(start_time)
            .fetch_one(pool)
            .await?;
    Ok(id)
}

pub async fn finish_log(
    pool: &PgPool,
    id: i32,
    end_time: DateTime<Utc>,
) -> Result<(), PostgresError> {
    sqlx::query("UPDATE logging.etl_log SET end_time = $1 WHERE id = $2")
        .bind(end_time)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn fail_log(pool: &PgPool, id: i32, error: &str) -> Result<(), PostgresError> {
    sqlx::query("UPDATE logging.etl_log SET end_time = now(), load_error = $1 WHERE id = $2")
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Close every log row left open by a dead process
pub async fn fail_unfinished_logs(pool: &PgPool, error: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query(
        "UPDATE logging.etl_log SET end_time = now(), load_error = $1
         WHERE end_time IS NULL AND load_error IS NULL",
    )
    .bind(error)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn insert_schema(
    pool: &PgPool,
    schema_name: &str,
    creation_date: DateTime<Utc>,
) -> Result<i32, PostgresError> {
    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO logging.etl_schemas (schema_name, creation_date, active)
         VALUES ($1, $2, FALSE) RETURNING id",
    )
    .bind(schema_name)
    .bind(creation_date)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// All schema rows, newest first
pub async fn list_schemas(pool: &PgPool) -> Result<Vec<SchemaRow>, PostgresError> {
    let rows: Vec<SchemaTuple> = sqlx::query_as(
        "SELECT id, schema_name, creation_date, active FROM logging.etl_schemas
         ORDER BY creation_date DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(schema_row).collect())
}

pub async fn get_active_schema(pool: &PgPool) -> Result<Option<SchemaRow>, PostgresError> {
    let row: Option<SchemaTuple> = sqlx::query_as(
        "SELECT id, schema_name, creation_date, active FROM logging.etl_schemas
         WHERE active LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.map(schema_row))
}

/// Make `id` the only active schema
pub async fn activate_schema(pool: &PgPool, id: i32) -> Result<(), PostgresError> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE logging.etl_schemas SET active = FALSE WHERE active AND id <> $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("UPDATE logging.etl_schemas SET active = TRUE WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() != 1 {
        return Err(PostgresError::Conflict(format!("schema row {} not found", id)));
    }

    tx.commit().await?;
    Ok(())
}

pub async fn delete_schema_row(pool: &PgPool, id: i32) -> Result<(), PostgresError> {
    sqlx::query("DELETE FROM logging.etl_schemas WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
