//! Unified error type for data layer
//!
//! Wraps PostgreSQL and filesystem errors so the domain layer can stay
//! independent of the concrete backend.

use thiserror::Error;

use crate::data::postgres::PostgresError;

/// Unified error type for data layer operations
#[derive(Error, Debug)]
pub enum DataError {
    /// PostgreSQL database error
    #[error("PostgreSQL error: {0}")]
    Postgres(sqlx::Error),

    /// A rotation statement (DDL, bulk insert or grant) failed
    #[error("Statement failed ({statement}): {source}")]
    Statement {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    /// A query ran past the configured statement timeout
    #[error("Query exceeded the statement timeout")]
    QueryTimeout,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A row could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Conditional write matched no row (the observed state changed)
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<PostgresError> for DataError {
    fn from(e: PostgresError) -> Self {
        match e {
            PostgresError::Database(e) => Self::Postgres(e),
            PostgresError::Statement { statement, source } => Self::Statement { statement, source },
            PostgresError::QueryTimeout => Self::QueryTimeout,
            PostgresError::Config(msg) => Self::Config(msg),
            PostgresError::Decode(msg) => Self::Decode(msg),
            PostgresError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_postgres_error() {
        let err: DataError = PostgresError::Conflict("database is running".into()).into();
        assert!(matches!(err, DataError::Conflict(msg) if msg == "database is running"));

        let err: DataError = PostgresError::QueryTimeout.into();
        assert_eq!(err.to_string(), "Query exceeded the statement timeout");
    }

    #[test]
    fn test_statement_failure_keeps_statement_text() {
        let err: DataError =
            PostgresError::statement("ALTER TABLE \"schema_1\".\"sources\" SET LOGGED", sqlx::Error::PoolClosed)
                .into();
        assert!(matches!(&err, DataError::Statement { statement, .. } if statement.ends_with("SET LOGGED")));
        assert!(err.to_string().starts_with("Statement failed (ALTER TABLE"));
    }
}
