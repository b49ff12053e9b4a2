//! PostgreSQL error types

use thiserror::Error;

/// SQLSTATE raised when `statement_timeout` cancels a query
const QUERY_CANCELED: &str = "57014";

const STATEMENT_PREVIEW_CHARS: usize = 80;

#[derive(Error, Debug)]
pub enum PostgresError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A schema-rotation statement failed; `statement` is its leading text
    #[error("Statement failed ({statement}): {source}")]
    Statement {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Query exceeded the statement timeout")]
    QueryTimeout,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl PostgresError {
    /// Failure of a DDL or load statement during rotation
    pub fn statement(statement: &str, source: sqlx::Error) -> Self {
        Self::Statement {
            statement: preview(statement),
            source,
        }
    }

    /// Failure on the query path; a cancelled statement becomes `QueryTimeout`
    pub fn query(source: sqlx::Error) -> Self {
        let canceled = source
            .as_database_error()
            .and_then(|e| e.code())
            .is_some_and(|code| code == QUERY_CANCELED);
        if canceled {
            Self::QueryTimeout
        } else {
            Self::Database(source)
        }
    }
}

fn preview(statement: &str) -> String {
    let flat = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= STATEMENT_PREVIEW_CHARS {
        return flat;
    }
    let mut short: String = flat.chars().take(STATEMENT_PREVIEW_CHARS).collect();
    short.push_str("...");
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_shows_leading_text() {
        let err = PostgresError::statement(
            "CREATE MATERIALIZED VIEW \"schema_1\".\"actions_actions\"\n    AS SELECT objectid, actionid, actionname, actionagency FROM \"schema_1\".\"actions\"",
            sqlx::Error::PoolTimedOut,
        );
        let message = err.to_string();
        assert!(message.starts_with(
            "Statement failed (CREATE MATERIALIZED VIEW \"schema_1\".\"actions_actions\" AS SELECT"
        ));
        assert!(message.contains("...): "));
        assert!(!message.contains('\n'));
    }

    #[test]
    fn test_short_statement_kept_whole() {
        let err = PostgresError::statement("DROP SCHEMA \"schema_1\" CASCADE", sqlx::Error::PoolClosed);
        assert!(err.to_string().starts_with("Statement failed (DROP SCHEMA \"schema_1\" CASCADE): "));
    }

    #[test]
    fn test_query_error_without_sqlstate_stays_database() {
        assert!(matches!(
            PostgresError::query(sqlx::Error::PoolTimedOut),
            PostgresError::Database(sqlx::Error::PoolTimedOut)
        ));
    }
}
