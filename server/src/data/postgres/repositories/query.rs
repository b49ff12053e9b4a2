//! Query execution against the active schema

use futures::StreamExt;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryScalar;
use sqlx::{Connection, PgConnection, PgPool, Postgres};

use crate::data::error::DataError;
use crate::data::postgres::PostgresError;
use crate::data::traits::RowStream;
use crate::data::types::Row;
use crate::domain::query::SqlQuery;
use crate::utils::sql::qualified;

/// Wrap a statement so each row arrives as one ordered JSON object
pub fn as_json_rows(sql: &str) -> String {
    format!("SELECT row_to_json(q)::text FROM ({}) q", sql)
}

fn bind_params<'q, O: Send + Unpin>(
    mut query: QueryScalar<'q, Postgres, O, PgArguments>,
    params: &'q [String],
) -> QueryScalar<'q, Postgres, O, PgArguments> {
    for param in params {
        query = query.bind(param);
    }
    query
}

fn parse_row(text: &str) -> Result<Row, PostgresError> {
    serde_json::from_str(text).map_err(|e| PostgresError::Decode(e.to_string()))
}

pub async fn fetch_count(pool: &PgPool, query: &SqlQuery) -> Result<i64, PostgresError> {
    let count: Option<i64> = bind_params(sqlx::query_scalar(&query.sql), &query.params)
        .fetch_one(pool)
        .await
        .map_err(PostgresError::query)?;
    Ok(count.unwrap_or(0))
}

pub async fn fetch_rows(pool: &PgPool, query: &SqlQuery) -> Result<Vec<Row>, PostgresError> {
    let sql = as_json_rows(&query.sql);
    let rows: Vec<String> = bind_params(sqlx::query_scalar(&sql), &query.params)
        .fetch_all(pool)
        .await
        .map_err(PostgresError::query)?;
    rows.iter().map(|text| parse_row(text)).collect()
}

/// Stream rows over a connection opened for this request alone
///
/// The connection is owned by the stream and closes when it is dropped.
pub async fn stream_rows(pool: &PgPool, query: SqlQuery) -> Result<RowStream, PostgresError> {
    let options = pool.connect_options();
    let mut conn = PgConnection::connect_with(&options).await?;

    let stream = async_stream::try_stream! {
        let sql = as_json_rows(&query.sql);
        let mut rows = bind_params(sqlx::query_scalar::<_, String>(&sql), &query.params)
            .fetch(&mut conn);
        while let Some(text) = rows.next().await {
            let text = text.map_err(|e| DataError::from(PostgresError::query(e)))?;
            yield parse_row(&text).map_err(DataError::from)?;
        }
    };
    Ok(stream.boxed())
}

/// Whether the relation holds at least one row
pub async fn has_rows(pool: &PgPool, schema: &str, table: &str) -> Result<bool, PostgresError> {
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {} LIMIT 1)", qualified(schema, table));
    let exists: bool = sqlx::query_scalar(&sql)
        .fetch_one(pool)
        .await
        .map_err(PostgresError::query)?;
    Ok(exists)
}
