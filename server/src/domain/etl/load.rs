//! Transform upstream records into bulk inserts, plus the DDL for profile relations

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::data::types::Row;
use crate::domain::profiles::{Column, ColumnId, ColumnType, Profile, Relation};
use crate::domain::query::sql::normalize_date;
use crate::utils::sql::{qualified, quote_ident};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Row {row} of {profile}: missing required value for '{column}'")]
    MissingValue {
        profile: String,
        column: String,
        row: usize,
    },

    #[error("Row {row} of {profile}: invalid {kind} value '{value}' for '{column}'")]
    InvalidValue {
        profile: String,
        column: String,
        row: usize,
        kind: &'static str,
        value: String,
    },
}

/// Column-major batch bound as one text array per column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkInsert {
    pub sql: String,
    pub columns: Vec<Vec<Option<String>>>,
    pub row_count: usize,
}

/// Columns written by the loader, upstream id first
pub fn insert_columns(profile: &Profile) -> Vec<(ColumnId, &Column)> {
    let id = profile.id_column();
    let mut columns: Vec<_> = profile.base_columns().collect();
    columns.sort_by_key(|(column_id, _)| *column_id != id);
    columns
}

/// Map upstream records onto the profile table.
///
/// Every value is validated against its column type; one bad row fails the batch.
/// The upstream id is kept as the primary key, so keyset paging follows it.
pub fn transform(profile: &Profile, schema: &str, rows: &[Row]) -> Result<BulkInsert, LoadError> {
    let id = profile.id_column();
    let columns = insert_columns(profile);
    let mut values: Vec<Vec<Option<String>>> = columns
        .iter()
        .map(|_| Vec::with_capacity(rows.len()))
        .collect();

    for (row_index, row) in rows.iter().enumerate() {
        for (slot, (column_id, column)) in columns.iter().enumerate() {
            let value = column_value(column, row).map_err(|(kind, value)| {
                LoadError::InvalidValue {
                    profile: profile.id.clone(),
                    column: column.name.clone(),
                    row: row_index,
                    kind,
                    value,
                }
            })?;
            if value.is_none() && (!column.nullable || *column_id == id) {
                return Err(LoadError::MissingValue {
                    profile: profile.id.clone(),
                    column: column.name.clone(),
                    row: row_index,
                });
            }
            values[slot].push(value);
        }
    }

    let names: Vec<&str> = columns.iter().map(|(_, c)| c.name.as_str()).collect();
    let arrays: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, (_, c))| match c.column_type {
            ColumnType::Text => format!("${}::text[]", i + 1),
            other => format!("${}::text[]::{}[]", i + 1, other.sql_type()),
        })
        .collect();

    Ok(BulkInsert {
        sql: format!(
            "INSERT INTO {} ({}) SELECT * FROM UNNEST({})",
            qualified(schema, &profile.table_name),
            names.join(", "),
            arrays.join(", ")
        ),
        columns: values,
        row_count: rows.len(),
    })
}

/// Look up an upstream field, falling back to a case-insensitive match
fn field<'r>(row: &'r Row, name: &str) -> Option<&'r Value> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

type Invalid = (&'static str, String);

fn column_value(column: &Column, row: &Row) -> Result<Option<String>, Invalid> {
    if let Some(concat) = &column.concat {
        let parts: Vec<String> = concat
            .fields
            .iter()
            .filter_map(|f| field(row, f).and_then(scalar_text))
            .filter(|s| !s.is_empty())
            .collect();
        return Ok(if parts.is_empty() {
            None
        } else {
            Some(parts.join(&concat.separator))
        });
    }

    match field(row, &column.source_field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => convert(column.column_type, value),
    }
}

fn convert(column_type: ColumnType, value: &Value) -> Result<Option<String>, Invalid> {
    let raw = scalar_text(value);
    if column_type != ColumnType::Text && raw.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Ok(None);
    }

    match column_type {
        ColumnType::Text | ColumnType::Tsvector => Ok(raw),
        ColumnType::Numeric => {
            let text = raw.unwrap_or_default();
            let trimmed = text.trim();
            trimmed
                .parse::<f64>()
                .map(|_| Some(trimmed.to_string()))
                .map_err(|_| ("numeric", text.clone()))
        }
        ColumnType::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(|i| Some(i.to_string()))
                .ok_or(("integer", n.to_string())),
            _ => {
                let text = raw.unwrap_or_default();
                text.trim()
                    .parse::<i64>()
                    .map(|i| Some(i.to_string()))
                    .map_err(|_| ("integer", text.clone()))
            }
        },
        ColumnType::Date => match value {
            Value::Number(n) => epoch_millis(n)
                .map(|dt| Some(dt.format("%Y-%m-%d").to_string()))
                .ok_or(("date", n.to_string())),
            _ => {
                let text = raw.unwrap_or_default();
                normalize_date(&text)
                    .or_else(|| parse_naive_datetime(&text).map(|dt| dt.format("%Y-%m-%d").to_string()))
                    .map(Some)
                    .ok_or(("date", text))
            }
        },
        ColumnType::Timestamptz => match value {
            Value::Number(n) => epoch_millis(n)
                .map(|dt| Some(dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
                .ok_or(("timestamp", n.to_string())),
            _ => {
                let text = raw.unwrap_or_default();
                parse_timestamp(text.trim())
                    .map(|dt| Some(dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
                    .ok_or(("timestamp", text))
            }
        },
    }
}

fn epoch_millis(n: &serde_json::Number) -> Option<DateTime<Utc>> {
    let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
    DateTime::from_timestamp_millis(millis)
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(naive) = parse_naive_datetime(s) {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

// ============================================================================
// DDL
// ============================================================================

pub fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

pub fn drop_schema_sql(schema: &str) -> String {
    format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(schema))
}

pub fn drop_table_sql(profile: &Profile, schema: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {} CASCADE",
        qualified(schema, &profile.table_name)
    )
}

pub fn create_table_sql(profile: &Profile, schema: &str) -> String {
    let id = profile.id_column();
    let definitions: Vec<String> = profile
        .base_columns()
        .map(|(column_id, column)| {
            if column_id == id {
                format!("{} {} PRIMARY KEY", column.name, column.column_type.sql_type())
            } else if column.nullable {
                format!("{} {}", column.name, column.column_type.sql_type())
            } else {
                format!("{} {} NOT NULL", column.name, column.column_type.sql_type())
            }
        })
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        qualified(schema, &profile.table_name),
        definitions.join(", ")
    )
}

/// Toggle WAL logging; tables load unlogged and switch back before views are built
pub fn set_logged_sql(profile: &Profile, schema: &str, logged: bool) -> String {
    format!(
        "ALTER TABLE {} SET {}",
        qualified(schema, &profile.table_name),
        if logged { "LOGGED" } else { "UNLOGGED" }
    )
}

/// Projection of the base table; deduplicated when it leaves out the id column
pub fn materialized_view_sql(profile: &Profile, schema: &str, view: &Relation) -> String {
    let names: Vec<&str> = view
        .columns
        .iter()
        .map(|id| profile.column(*id).name.as_str())
        .collect();
    let distinct = if view.contains(profile.id_column()) {
        ""
    } else {
        "DISTINCT "
    };
    format!(
        "CREATE MATERIALIZED VIEW {} AS SELECT {}{} FROM {}",
        qualified(schema, &view.name),
        distinct,
        names.join(", "),
        qualified(schema, &profile.table_name)
    )
}

/// Plain view over its SQL definition, `{schema}` bound to the target schema
pub fn view_sql(schema: &str, view: &Relation) -> Option<String> {
    let definition = view.definition.as_ref()?;
    Some(format!(
        "CREATE VIEW {} AS {}",
        qualified(schema, &view.name),
        definition.replace("{schema}", &quote_ident(schema))
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profiles::ProfileRegistry;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_transform_maps_source_fields_and_concat() {
        let registry = ProfileRegistry::builtin().unwrap();
        let assessments = registry.get("assessments").unwrap();
        let rows = vec![row(json!({
            "OBJECTID": 4821,
            "REPORTINGCYCLE": 2022,
            "assessmentunitidentifier": "TX-0001",
            "organizationid": "TCEQMAIN",
            "organizationname": "Texas",
            "orgtype": "State",
            "state": "TX"
        }))];

        let insert = transform(assessments, "schema_1", &rows).unwrap();
        assert!(insert.sql.starts_with(
            "INSERT INTO \"schema_1\".\"assessments\" (objectid, reportingcycle, assessmentunitid, "
        ));
        assert!(insert.sql.contains("$1::text[]::integer[]"));
        assert!(insert.sql.contains("$2::text[]::numeric[]"));
        assert!(insert.sql.contains("$3::text[]"));
        assert_eq!(insert.row_count, 1);

        let columns = insert_columns(assessments);
        let slot = |name: &str| {
            columns
                .iter()
                .position(|(_, c)| c.name == name)
                .unwrap()
        };
        assert_eq!(insert.columns[slot("objectid")][0].as_deref(), Some("4821"));
        assert_eq!(insert.columns[slot("reportingcycle")][0].as_deref(), Some("2022"));
        assert_eq!(insert.columns[slot("assessmentunitid")][0].as_deref(), Some("TX-0001"));
        assert_eq!(insert.columns[slot("organizationtype")][0].as_deref(), Some("State"));
        assert_eq!(
            insert.columns[slot("organizationdisplayname")][0].as_deref(),
            Some("Texas - TCEQMAIN")
        );
        assert_eq!(insert.columns[slot("ircategory")][0], None);
    }

    #[test]
    fn test_transform_rejects_bad_number() {
        let registry = ProfileRegistry::builtin().unwrap();
        let sources = registry.get("sources").unwrap();
        let rows = vec![row(json!({
            "objectid": 1,
            "organizationid": "X",
            "reportingcycle": "2022",
            "assessmentunitid": "A",
            "watersize": "lots"
        }))];
        assert!(matches!(
            transform(sources, "s", &rows).unwrap_err(),
            LoadError::InvalidValue { kind: "numeric", .. }
        ));
    }

    #[test]
    fn test_transform_requires_non_nullable() {
        let registry = ProfileRegistry::builtin().unwrap();
        let sources = registry.get("sources").unwrap();
        let rows = vec![row(json!({ "objectid": 1, "organizationid": "X", "reportingcycle": 2022 }))];
        assert_eq!(
            transform(sources, "s", &rows).unwrap_err(),
            LoadError::MissingValue {
                profile: "sources".into(),
                column: "assessmentunitid".into(),
                row: 0
            }
        );
    }

    #[test]
    fn test_transform_keeps_upstream_id() {
        let registry = ProfileRegistry::builtin().unwrap();
        let actions = registry.get("actions").unwrap();
        let record = |objectid: serde_json::Value| {
            row(json!({
                "objectid": objectid,
                "actionid": "A-1",
                "actionname": "Plan",
                "organizationid": "TCEQMAIN",
                "state": "TX"
            }))
        };

        let insert = transform(actions, "s", &[record(json!(90210)), record(json!("77"))]).unwrap();
        let columns = insert_columns(actions);
        assert_eq!(columns[0].1.name, "objectid");
        assert!(insert.sql.starts_with("INSERT INTO \"s\".\"actions\" (objectid, "));
        assert_eq!(
            insert.columns[0],
            vec![Some("90210".to_string()), Some("77".to_string())]
        );

        assert_eq!(
            transform(actions, "s", &[record(serde_json::Value::Null)]).unwrap_err(),
            LoadError::MissingValue {
                profile: "actions".into(),
                column: "objectid".into(),
                row: 0
            }
        );
    }

    #[test]
    fn test_dates_from_epoch_millis_and_strings() {
        assert_eq!(
            convert(ColumnType::Date, &json!(1673827200000_i64)).unwrap().as_deref(),
            Some("2023-01-16")
        );
        assert_eq!(
            convert(ColumnType::Date, &json!("01/16/2023")).unwrap().as_deref(),
            Some("2023-01-16")
        );
        assert_eq!(
            convert(ColumnType::Timestamptz, &json!("2023-01-16 10:30:00")).unwrap().as_deref(),
            Some("2023-01-16T10:30:00Z")
        );
        assert_eq!(convert(ColumnType::Numeric, &json!("")).unwrap(), None);
        assert!(convert(ColumnType::Date, &json!("soon")).is_err());
    }

    #[test]
    fn test_ddl() {
        let registry = ProfileRegistry::builtin().unwrap();
        let actions = registry.get("actions").unwrap();

        let create = create_table_sql(actions, "schema_1");
        assert!(create.starts_with(
            "CREATE TABLE \"schema_1\".\"actions\" (objectid integer PRIMARY KEY, region text"
        ));
        assert!(create.contains("organizationid text NOT NULL"));

        assert_eq!(
            set_logged_sql(actions, "schema_1", false),
            "ALTER TABLE \"schema_1\".\"actions\" SET UNLOGGED"
        );

        let orgs = &actions.materialized_views()[0];
        assert_eq!(
            materialized_view_sql(actions, "schema_1", orgs),
            "CREATE MATERIALIZED VIEW \"schema_1\".\"actions_organizations\" AS SELECT DISTINCT \
             organizationid, organizationname, organizationtype, region, state FROM \"schema_1\".\"actions\""
        );
    }

    #[test]
    fn test_view_definition_binds_schema() {
        let registry = ProfileRegistry::builtin().unwrap();
        let docs = registry.get("actionDocuments").unwrap();
        let sql = view_sql("schema_9", &docs.views()[0]).unwrap();
        assert!(sql.starts_with("CREATE VIEW \"schema_9\".\"actions_documents_search\" AS SELECT d.*"));
        assert!(sql.ends_with("FROM \"schema_9\".actions_documents d"));
    }
}
