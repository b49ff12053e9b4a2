//! Warehouse DDL and bulk loads for PostgreSQL

use sqlx::PgPool;

use crate::data::postgres::PostgresError;
use crate::domain::etl::load::BulkInsert;
use crate::utils::sql::quote_ident;

/// Run one parameterless statement
pub async fn execute(pool: &PgPool, statement: &str) -> Result<(), PostgresError> {
    sqlx::raw_sql(statement)
        .execute(pool)
        .await
        .map_err(|e| PostgresError::statement(statement, e))?;
    Ok(())
}

/// Bind one text array per column and run the UNNEST insert
pub async fn insert(pool: &PgPool, batch: &BulkInsert) -> Result<u64, PostgresError> {
    let mut query = sqlx::query(&batch.sql);
    for column in &batch.columns {
        query = query.bind(column);
    }
    let result = query
        .execute(pool)
        .await
        .map_err(|e| PostgresError::statement(&batch.sql, e))?;
    Ok(result.rows_affected())
}

pub fn grant_read_sql(schema: &str, role: &str) -> String {
    let schema = quote_ident(schema);
    let role = quote_ident(role);
    format!(
        "GRANT USAGE ON SCHEMA {schema} TO {role}; GRANT SELECT ON ALL TABLES IN SCHEMA {schema} TO {role};"
    )
}

pub async fn grant_read(pool: &PgPool, schema: &str, role: &str) -> Result<(), PostgresError> {
    let statement = grant_read_sql(schema, role);
    sqlx::raw_sql(&statement)
        .execute(pool)
        .await
        .map_err(|e| PostgresError::statement(&statement, e))?;
    tracing::debug!(%schema, %role, "Granted read access");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_read_sql_quotes_names() {
        assert_eq!(
            grant_read_sql("schema_1", "eq"),
            "GRANT USAGE ON SCHEMA \"schema_1\" TO \"eq\"; GRANT SELECT ON ALL TABLES IN SCHEMA \"schema_1\" TO \"eq\";"
        );
    }
}
