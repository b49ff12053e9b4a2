//! Profile definition types as they appear in the profile definitions file

use serde::Deserialize;

/// Physical column type of a profile column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Numeric,
    Integer,
    Date,
    Timestamptz,
    Tsvector,
}

impl ColumnType {
    /// Types that accept low/high range parameters
    pub fn is_range_capable(self) -> bool {
        matches!(
            self,
            Self::Numeric | Self::Integer | Self::Date | Self::Timestamptz
        )
    }

    /// Types whose range bounds are normalized to UTC midnight
    pub fn is_temporal(self) -> bool {
        matches!(self, Self::Date | Self::Timestamptz)
    }

    /// Types compared as text (everything else is cast for ILIKE)
    pub fn is_textual(self) -> bool {
        matches!(self, Self::Text)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Numeric | Self::Integer)
    }

    /// PostgreSQL type used in DDL and parameter casts
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Numeric => "numeric",
            Self::Integer => "integer",
            Self::Date => "date",
            Self::Timestamptz => "timestamptz",
            Self::Tsvector => "tsvector",
        }
    }
}

/// Default restriction applied when a column is not filtered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnDefault {
    /// Only the most recent value per organization
    Latest,
}

/// Builds a column value by joining several upstream fields
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConcatDef {
    pub fields: Vec<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    " ".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    pub name: String,
    pub alias: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub low_param: Option<String>,
    pub high_param: Option<String>,
    #[serde(default = "default_true")]
    pub accepts_multiple: bool,
    pub default: Option<ColumnDefault>,
    /// View that provides this column; absent for base-table columns
    pub source_table: Option<String>,
    /// Upstream field name; defaults to `name`
    pub source_field: Option<String>,
    pub concat: Option<ConcatDef>,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationDef {
    pub name: String,
    /// Physical column names
    pub columns: Vec<String>,
    /// SQL body with a `{schema}` placeholder; required for plain views
    pub definition: Option<String>,
}

/// How the upstream service pages a profile's records
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceDef {
    /// `p_limit`/`p_offset` paging over a JSON `records` array
    Offset { path: String },
    /// `objectid >=` watermark paging over `features[].attributes`
    Watermark,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDef {
    pub id: String,
    pub table_name: String,
    pub id_column: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub materialized_views: Vec<RelationDef>,
    #[serde(default)]
    pub views: Vec<RelationDef>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub include_cycle_count: bool,
    pub source: SourceDef,
    /// Alias of the full-text search column
    pub search_column: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfilesFile {
    pub profiles: Vec<ProfileDef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_def_defaults() {
        let json = r#"{ "name": "state", "alias": "state", "type": "text" }"#;
        let def: ColumnDef = serde_json::from_str(json).unwrap();
        assert!(def.accepts_multiple);
        assert!(def.nullable);
        assert!(def.default.is_none());
        assert!(def.source_table.is_none());
    }

    #[test]
    fn test_source_def_tagged() {
        let offset: SourceDef =
            serde_json::from_str(r#"{ "kind": "offset", "path": "profile_tmdl" }"#).unwrap();
        assert_eq!(
            offset,
            SourceDef::Offset {
                path: "profile_tmdl".to_string()
            }
        );
        let watermark: SourceDef = serde_json::from_str(r#"{ "kind": "watermark" }"#).unwrap();
        assert_eq!(watermark, SourceDef::Watermark);
    }

    #[test]
    fn test_column_type_capabilities() {
        assert!(ColumnType::Date.is_range_capable());
        assert!(ColumnType::Date.is_temporal());
        assert!(!ColumnType::Text.is_range_capable());
        assert!(!ColumnType::Tsvector.is_range_capable());
        assert_eq!(ColumnType::Timestamptz.sql_type(), "timestamptz");
    }

    #[test]
    fn test_concat_default_separator() {
        let def: ConcatDef = serde_json::from_str(r#"{ "fields": ["a", "b"] }"#).unwrap();
        assert_eq!(def.separator, " ");
    }
}
