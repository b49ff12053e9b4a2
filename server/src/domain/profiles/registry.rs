//! Compiled, validated profile registry
//!
//! Profile definitions are parsed once at startup into typed column tables. Every
//! public filter name resolves to a [`ColumnId`] through a single lookup map, so an
//! unknown name is one well-defined failure path rather than a scattered string miss.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use super::types::{
    ColumnDef, ColumnDefault, ColumnType, ConcatDef, ProfileDef, ProfilesFile, RelationDef,
    SourceDef,
};
use crate::utils::sql::is_valid_identifier;

const BUILTIN_PROFILES: &str = include_str!("../../../data/profiles.json");

/// Physical name of the column used for per-organization latest selection
pub const ORGANIZATION_COLUMN: &str = "organizationid";

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to read profile definitions: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse profile definitions: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid profile '{profile}': {reason}")]
    Invalid { profile: String, reason: String },
}

fn invalid(profile: &str, reason: impl Into<String>) -> ProfileError {
    ProfileError::Invalid {
        profile: profile.to_string(),
        reason: reason.into(),
    }
}

/// Index of a column within its profile's column table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(usize);

impl ColumnId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Which part of a column a public parameter name addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Exact,
    Low,
    High,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub alias: String,
    pub column_type: ColumnType,
    pub low_param: Option<String>,
    pub high_param: Option<String>,
    pub accepts_multiple: bool,
    pub default: Option<ColumnDefault>,
    pub source_table: Option<String>,
    pub source_field: String,
    pub concat: Option<ConcatDef>,
    pub nullable: bool,
}

impl Column {
    /// Whether the column is stored on the profile's base table
    pub fn is_base(&self) -> bool {
        self.source_table.is_none()
    }

    pub fn is_latest(&self) -> bool {
        self.default == Some(ColumnDefault::Latest)
    }

    /// `name` or `name AS "alias"` for select lists
    pub fn select_expr(&self) -> String {
        if self.name == self.alias {
            self.name.clone()
        } else {
            format!("{} AS \"{}\"", self.name, self.alias)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Table,
    MaterializedView,
    View,
}

/// A queryable relation backing a profile
#[derive(Debug, Clone)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
    pub columns: Vec<ColumnId>,
    pub definition: Option<String>,
}

impl Relation {
    pub fn covers(&self, wanted: &HashSet<ColumnId>) -> bool {
        wanted.iter().all(|id| self.columns.contains(id))
    }

    pub fn contains(&self, id: ColumnId) -> bool {
        self.columns.contains(&id)
    }
}

#[derive(Debug)]
pub struct Profile {
    pub id: String,
    pub table_name: String,
    pub hidden: bool,
    pub include_cycle_count: bool,
    pub source: SourceDef,
    columns: Vec<Column>,
    id_column: ColumnId,
    base: Relation,
    materialized_views: Vec<Relation>,
    views: Vec<Relation>,
    search_column: Option<ColumnId>,
    latest_column: Option<ColumnId>,
    organization_column: Option<ColumnId>,
    params: HashMap<String, (ColumnId, ParamKind)>,
    aliases: HashMap<String, ColumnId>,
}

impl Profile {
    pub fn column(&self, id: ColumnId) -> &Column {
        &self.columns[id.0]
    }

    pub fn columns(&self) -> impl Iterator<Item = (ColumnId, &Column)> {
        self.columns.iter().enumerate().map(|(i, c)| (ColumnId(i), c))
    }

    /// Base-table columns, in definition order
    pub fn base_columns(&self) -> impl Iterator<Item = (ColumnId, &Column)> {
        self.columns().filter(|(_, c)| c.is_base())
    }

    /// Resolve a public filter parameter (alias, low or high param)
    pub fn param(&self, name: &str) -> Option<(ColumnId, ParamKind)> {
        self.params.get(name).copied()
    }

    /// Resolve a column alias
    pub fn column_by_alias(&self, alias: &str) -> Option<ColumnId> {
        self.aliases.get(alias).copied()
    }

    pub fn id_column(&self) -> ColumnId {
        self.id_column
    }

    pub fn base(&self) -> &Relation {
        &self.base
    }

    pub fn materialized_views(&self) -> &[Relation] {
        &self.materialized_views
    }

    pub fn views(&self) -> &[Relation] {
        &self.views
    }

    pub fn search_column(&self) -> Option<ColumnId> {
        self.search_column
    }

    pub fn latest_column(&self) -> Option<ColumnId> {
        self.latest_column
    }

    pub fn organization_column(&self) -> Option<ColumnId> {
        self.organization_column
    }

    fn compile(def: ProfileDef) -> Result<Self, ProfileError> {
        let pid = def.id.clone();
        if def.id.is_empty() {
            return Err(invalid("<unnamed>", "profile id must not be empty"));
        }
        if !is_valid_identifier(&def.table_name) {
            return Err(invalid(&pid, format!("invalid table name '{}'", def.table_name)));
        }

        let view_names: HashSet<&str> = def.views.iter().map(|v| v.name.as_str()).collect();
        let mut columns = Vec::with_capacity(def.columns.len());
        let mut by_name: HashMap<String, ColumnId> = HashMap::new();
        let mut params: HashMap<String, (ColumnId, ParamKind)> = HashMap::new();
        let mut aliases: HashMap<String, ColumnId> = HashMap::new();

        for (i, col) in def.columns.into_iter().enumerate() {
            let id = ColumnId(i);
            let column = compile_column(&pid, col, &view_names)?;

            if by_name.insert(column.name.clone(), id).is_some() {
                return Err(invalid(&pid, format!("duplicate column '{}'", column.name)));
            }
            aliases.insert(column.alias.clone(), id);

            let names = std::iter::once((column.alias.clone(), ParamKind::Exact))
                .chain(column.low_param.clone().map(|p| (p, ParamKind::Low)))
                .chain(column.high_param.clone().map(|p| (p, ParamKind::High)));
            for (name, kind) in names {
                if params.insert(name.clone(), (id, kind)).is_some() {
                    return Err(invalid(&pid, format!("parameter name '{}' is not unique", name)));
                }
            }
            columns.push(column);
        }

        let id_column = *by_name
            .get(&def.id_column)
            .ok_or_else(|| invalid(&pid, format!("unknown id column '{}'", def.id_column)))?;
        if !columns[id_column.0].is_base() {
            return Err(invalid(&pid, "id column must live on the base table"));
        }

        let base = Relation {
            name: def.table_name.clone(),
            kind: RelationKind::Table,
            columns: columns
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_base())
                .map(|(i, _)| ColumnId(i))
                .collect(),
            definition: None,
        };

        let materialized_views = def
            .materialized_views
            .into_iter()
            .map(|v| compile_relation(&pid, v, RelationKind::MaterializedView, &by_name, &columns))
            .collect::<Result<Vec<_>, _>>()?;
        let views = def
            .views
            .into_iter()
            .map(|v| compile_relation(&pid, v, RelationKind::View, &by_name, &columns))
            .collect::<Result<Vec<_>, _>>()?;

        for (i, col) in columns.iter().enumerate() {
            if let Some(table) = &col.source_table {
                let provided = views
                    .iter()
                    .any(|v| &v.name == table && v.contains(ColumnId(i)));
                if !provided {
                    return Err(invalid(
                        &pid,
                        format!("view '{}' does not provide column '{}'", table, col.name),
                    ));
                }
            }
        }

        let mut latest = columns.iter().enumerate().filter(|(_, c)| c.is_latest());
        let latest_column = latest.next().map(|(i, _)| ColumnId(i));
        if latest.next().is_some() {
            return Err(invalid(&pid, "at most one column may default to latest"));
        }
        let organization_column = by_name.get(ORGANIZATION_COLUMN).copied();
        if latest_column.is_some() && organization_column.is_none() {
            return Err(invalid(
                &pid,
                "latest selection requires an organizationid column",
            ));
        }

        let search_column = match &def.search_column {
            Some(alias) => {
                let id = *aliases
                    .get(alias)
                    .ok_or_else(|| invalid(&pid, format!("unknown search column '{}'", alias)))?;
                if columns[id.0].column_type != ColumnType::Tsvector {
                    return Err(invalid(&pid, "search column must be of type tsvector"));
                }
                Some(id)
            }
            None => None,
        };

        Ok(Self {
            id: def.id,
            table_name: def.table_name,
            hidden: def.hidden,
            include_cycle_count: def.include_cycle_count,
            source: def.source,
            columns,
            id_column,
            base,
            materialized_views,
            views,
            search_column,
            latest_column,
            organization_column,
            params,
            aliases,
        })
    }
}

fn compile_column(
    pid: &str,
    def: ColumnDef,
    view_names: &HashSet<&str>,
) -> Result<Column, ProfileError> {
    if !is_valid_identifier(&def.name) {
        return Err(invalid(pid, format!("invalid column name '{}'", def.name)));
    }
    if def.alias.is_empty() || def.alias.contains('"') {
        return Err(invalid(pid, format!("invalid alias for column '{}'", def.name)));
    }
    if (def.low_param.is_some() || def.high_param.is_some()) && !def.column_type.is_range_capable()
    {
        return Err(invalid(
            pid,
            format!("column '{}' cannot take range parameters", def.name),
        ));
    }
    if def.default == Some(ColumnDefault::Latest)
        && !matches!(def.column_type, ColumnType::Numeric | ColumnType::Timestamptz)
    {
        return Err(invalid(
            pid,
            format!("column '{}' cannot default to latest", def.name),
        ));
    }
    if let Some(table) = &def.source_table
        && !view_names.contains(table.as_str())
    {
        return Err(invalid(pid, format!("unknown source table '{}'", table)));
    }
    if def.column_type == ColumnType::Tsvector && def.source_table.is_none() {
        return Err(invalid(
            pid,
            format!("tsvector column '{}' must come from a view", def.name),
        ));
    }

    Ok(Column {
        source_field: def.source_field.unwrap_or_else(|| def.name.clone()),
        name: def.name,
        alias: def.alias,
        column_type: def.column_type,
        low_param: def.low_param,
        high_param: def.high_param,
        accepts_multiple: def.accepts_multiple,
        default: def.default,
        source_table: def.source_table,
        concat: def.concat,
        nullable: def.nullable,
    })
}

fn compile_relation(
    pid: &str,
    def: RelationDef,
    kind: RelationKind,
    by_name: &HashMap<String, ColumnId>,
    columns: &[Column],
) -> Result<Relation, ProfileError> {
    if !is_valid_identifier(&def.name) {
        return Err(invalid(pid, format!("invalid view name '{}'", def.name)));
    }
    if kind == RelationKind::View && def.definition.is_none() {
        return Err(invalid(pid, format!("view '{}' needs a definition", def.name)));
    }
    let mut ids = Vec::with_capacity(def.columns.len());
    for name in &def.columns {
        let id = *by_name.get(name).ok_or_else(|| {
            invalid(pid, format!("view '{}' names unknown column '{}'", def.name, name))
        })?;
        let col = &columns[id.0];
        let available = match &col.source_table {
            None => true,
            Some(table) => kind == RelationKind::View && table == &def.name,
        };
        if !available {
            return Err(invalid(
                pid,
                format!("column '{}' is not available in '{}'", name, def.name),
            ));
        }
        ids.push(id);
    }
    Ok(Relation {
        name: def.name,
        kind,
        columns: ids,
        definition: def.definition,
    })
}

/// Read-only set of profiles shared across the server and the etl
#[derive(Debug)]
pub struct ProfileRegistry {
    profiles: Vec<Arc<Profile>>,
    by_id: HashMap<String, usize>,
}

impl ProfileRegistry {
    /// Profiles shipped with the binary
    pub fn builtin() -> Result<Self, ProfileError> {
        Self::from_json(BUILTIN_PROFILES)
    }

    /// Load from `path` when given, otherwise the built-in set
    pub fn load(path: Option<&Path>) -> Result<Self, ProfileError> {
        match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading profile definitions");
                let content = std::fs::read_to_string(path)?;
                Self::from_json(&content)
            }
            None => Self::builtin(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ProfileError> {
        let file: ProfilesFile = serde_json::from_str(json)?;
        let mut profiles = Vec::with_capacity(file.profiles.len());
        let mut by_id = HashMap::new();
        let mut tables = HashSet::new();

        for def in file.profiles {
            let profile = Profile::compile(def)?;
            if !tables.insert(profile.table_name.clone()) {
                return Err(invalid(&profile.id, "table name is used by another profile"));
            }
            if by_id.insert(profile.id.clone(), profiles.len()).is_some() {
                return Err(invalid(&profile.id, "duplicate profile id"));
            }
            profiles.push(Arc::new(profile));
        }

        tracing::debug!(count = profiles.len(), "Profile registry loaded");
        Ok(Self { profiles, by_id })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Profile>> {
        self.by_id.get(id).map(|&i| &self.profiles[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Profile>> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(columns: &str, extra: &str) -> String {
        format!(
            r#"{{ "profiles": [ {{
                "id": "demo", "tableName": "demo", "idColumn": "objectid",
                "source": {{ "kind": "offset", "path": "profile_demo" }},
                "columns": [
                    {{ "name": "objectid", "alias": "objectId", "type": "integer" }},
                    {{ "name": "organizationid", "alias": "organizationId", "type": "text" }}
                    {columns}
                ]
                {extra}
            }} ] }}"#
        )
    }

    #[test]
    fn test_builtin_profiles_load() {
        let registry = ProfileRegistry::builtin().unwrap();
        assert!(registry.get("actions").is_some());
        assert!(registry.get("sources").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn test_param_lookup() {
        let registry = ProfileRegistry::builtin().unwrap();
        let actions = registry.get("actions").unwrap();

        let (id, kind) = actions.param("completionDateLo").unwrap();
        assert_eq!(kind, ParamKind::Low);
        assert_eq!(actions.column(id).name, "completiondate");

        let (id, kind) = actions.param("actionAgency").unwrap();
        assert_eq!(kind, ParamKind::Exact);
        assert_eq!(actions.column(id).name, "actionagency");

        assert!(actions.param("actionagency").is_none());
        assert_eq!(actions.column(actions.id_column()).name, "objectid");
    }

    #[test]
    fn test_latest_and_search_columns() {
        let registry = ProfileRegistry::builtin().unwrap();
        let sources = registry.get("sources").unwrap();
        let latest = sources.latest_column().unwrap();
        assert_eq!(sources.column(latest).name, "reportingcycle");
        assert!(sources.search_column().is_none());

        let docs = registry.get("actionDocuments").unwrap();
        let search = docs.search_column().unwrap();
        assert_eq!(docs.column(search).alias, "documentQuery");
        assert!(!docs.base().contains(search));
        assert!(docs.views()[0].contains(search));
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let json = single(
            r#", { "name": "other", "alias": "objectId", "type": "text" }"#,
            "",
        );
        let err = ProfileRegistry::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("not unique"), "{err}");
    }

    #[test]
    fn test_range_param_on_text_rejected() {
        let json = single(
            r#", { "name": "state", "alias": "state", "type": "text", "lowParam": "stateLo" }"#,
            "",
        );
        let err = ProfileRegistry::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("range parameters"), "{err}");
    }

    #[test]
    fn test_low_param_colliding_with_alias_rejected() {
        let json = single(
            r#", { "name": "watersize", "alias": "waterSize", "type": "numeric", "lowParam": "organizationId" }"#,
            "",
        );
        assert!(ProfileRegistry::from_json(&json).is_err());
    }

    #[test]
    fn test_latest_on_text_rejected() {
        let json = single(
            r#", { "name": "cycle", "alias": "cycle", "type": "text", "default": "latest" }"#,
            "",
        );
        let err = ProfileRegistry::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("latest"), "{err}");
    }

    #[test]
    fn test_view_with_unknown_column_rejected() {
        let json = single(
            "",
            r#", "materializedViews": [ { "name": "demo_mv", "columns": ["missing"] } ]"#,
        );
        let err = ProfileRegistry::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("unknown column"), "{err}");
    }

    #[test]
    fn test_view_without_definition_rejected() {
        let json = single(
            "",
            r#", "views": [ { "name": "demo_view", "columns": ["objectid"] } ]"#,
        );
        let err = ProfileRegistry::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("definition"), "{err}");
    }

    #[test]
    fn test_unsafe_table_name_rejected() {
        let json = r#"{ "profiles": [ {
            "id": "bad", "tableName": "bad; drop", "idColumn": "objectid",
            "source": { "kind": "watermark" },
            "columns": [ { "name": "objectid", "alias": "objectId", "type": "integer" } ]
        } ] }"#;
        assert!(ProfileRegistry::from_json(json).is_err());
    }

    #[test]
    fn test_select_expr_aliases_when_different() {
        let registry = ProfileRegistry::builtin().unwrap();
        let actions = registry.get("actions").unwrap();
        let region = actions.column_by_alias("region").unwrap();
        let org = actions.column_by_alias("organizationId").unwrap();
        assert_eq!(actions.column(region).select_expr(), "region");
        assert_eq!(
            actions.column(org).select_expr(),
            "organizationid AS \"organizationId\""
        );
    }
}
