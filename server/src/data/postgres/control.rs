//! ETL control-schema bootstrap
//!
//! The control tables are created with `IF NOT EXISTS`, so applying them on
//! every start is safe. The recorded version only guards against a newer
//! deployment having changed them underneath this one.

use sqlx::PgPool;

use super::error::PostgresError;
use super::schema::{DEFAULT_DATA, SCHEMA, SCHEMA_VERSION};

/// Create the control tables and seed the status row
pub async fn ensure_control_schema(pool: &PgPool) -> Result<(), PostgresError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    sqlx::raw_sql(DEFAULT_DATA).execute(pool).await?;

    let recorded: Option<i32> =
        sqlx::query_scalar("SELECT version FROM logging.schema_version WHERE id = 1")
            .fetch_optional(pool)
            .await?;

    match version_action(recorded) {
        VersionAction::Record => {
            sqlx::query(
                "INSERT INTO logging.schema_version (id, version, applied_at, description)
                 VALUES (1, $1, $2, 'ETL control tables')
                 ON CONFLICT (id) DO UPDATE SET version = $1, applied_at = $2",
            )
            .bind(SCHEMA_VERSION)
            .bind(chrono::Utc::now().timestamp())
            .execute(pool)
            .await?;
            tracing::debug!(version = SCHEMA_VERSION, "Control schema recorded");
        }
        VersionAction::Newer(version) => tracing::warn!(
            recorded = version,
            current = SCHEMA_VERSION,
            "Control schema was written by a newer release"
        ),
        VersionAction::Current => {
            tracing::debug!(version = SCHEMA_VERSION, "Control schema is current")
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum VersionAction {
    Record,
    Current,
    Newer(i32),
}

fn version_action(recorded: Option<i32>) -> VersionAction {
    match recorded {
        Some(v) if v > SCHEMA_VERSION => VersionAction::Newer(v),
        Some(v) if v == SCHEMA_VERSION => VersionAction::Current,
        _ => VersionAction::Record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_action() {
        assert_eq!(version_action(None), VersionAction::Record);
        assert_eq!(version_action(Some(SCHEMA_VERSION - 1)), VersionAction::Record);
        assert_eq!(version_action(Some(SCHEMA_VERSION)), VersionAction::Current);
        assert_eq!(
            version_action(Some(SCHEMA_VERSION + 1)),
            VersionAction::Newer(SCHEMA_VERSION + 1)
        );
    }

    #[test]
    fn test_schema_creates_control_tables() {
        for table in [
            "logging.schema_version",
            "logging.etl_log",
            "logging.etl_schemas",
            "logging.etl_status",
        ] {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table)));
        }
        assert!(!SCHEMA.contains("schema_migrations"));
        assert!(DEFAULT_DATA.contains("ON CONFLICT (id) DO NOTHING"));
    }
}
