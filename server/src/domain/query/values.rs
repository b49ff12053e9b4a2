//! Distinct-value lookups for a single column

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::{Map, Value};

use super::error::CriteriaError;
use super::params::{ParamValue, QueryLimits, validate_filters};
use super::plan::{Predicates, check_value, choose_relation, filter_predicates, take_latest_sentinel};
use super::sql::{SqlParams, SqlQuery};
use crate::domain::profiles::{ColumnId, ColumnType, Profile, Relation};
use crate::utils::sql::{escape_like_pattern, qualified};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    fn parse(value: &str) -> Result<Self, CriteriaError> {
        match value.to_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(CriteriaError::InvalidParameter(format!(
                "The direction '{}' is not valid, use 'asc' or 'desc'",
                value
            ))),
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Body of a values request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValuesRequest {
    /// Case-insensitive substring matched against the column and any additional columns
    pub text: Option<String>,
    pub limit: Option<u64>,
    pub direction: Option<String>,
    /// Only values strictly after this one in `direction` order
    pub comparand: Option<String>,
    pub filters: BTreeMap<String, ParamValue>,
    pub additional_columns: Vec<String>,
}

impl ValuesRequest {
    /// Build from GET query pairs. Request fields are read by name and
    /// everything else is a filter; `additionalColumns` may be comma-separated.
    pub fn from_query_pairs(pairs: Vec<(String, String)>) -> Result<Self, CriteriaError> {
        let mut request = Self::default();
        for (name, value) in pairs {
            match name.as_str() {
                "text" => set_once(&mut request.text, &name, value)?,
                "direction" => set_once(&mut request.direction, &name, value)?,
                "comparand" => set_once(&mut request.comparand, &name, value)?,
                "limit" => {
                    let limit = value.trim().parse::<u64>().map_err(|_| {
                        CriteriaError::InvalidParameter(format!(
                            "The limit '{}' is not a valid number",
                            value
                        ))
                    })?;
                    set_once(&mut request.limit, &name, limit)?;
                }
                "additionalColumns" => request.additional_columns.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(String::from),
                ),
                _ => match request.filters.get_mut(&name) {
                    Some(existing) => existing.push(value),
                    None => {
                        request.filters.insert(name, ParamValue::One(value));
                    }
                },
            }
        }
        Ok(request)
    }
}

fn set_once<T>(slot: &mut Option<T>, name: &str, value: T) -> Result<(), CriteriaError> {
    if slot.is_some() {
        return Err(CriteriaError::DuplicateParameter(name.to_string()));
    }
    *slot = Some(value);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ValuesPlan<'p> {
    profile: &'p Profile,
    pub column: ColumnId,
    pub additional: Vec<ColumnId>,
    pub relation: &'p Relation,
    pub predicates: Predicates,
    pub text: Option<String>,
    pub comparand: Option<String>,
    pub direction: Direction,
    pub limit: Option<u64>,
}

impl<'p> ValuesPlan<'p> {
    pub fn build(
        profile: &'p Profile,
        column_alias: &str,
        request: &ValuesRequest,
        limits: &QueryLimits,
    ) -> Result<Self, CriteriaError> {
        let column = resolve(profile, column_alias)?;

        let mut additional = Vec::new();
        for alias in &request.additional_columns {
            let id = resolve(profile, alias)?;
            if id != column && !additional.contains(&id) {
                additional.push(id);
            }
        }

        if let Some(limit) = request.limit
            && limit > limits.max_values_limit
        {
            return Err(CriteriaError::LimitExceeded {
                param: "limit".to_string(),
                value: limit,
                max: limits.max_values_limit,
            });
        }

        let direction = request
            .direction
            .as_deref()
            .map(Direction::parse)
            .transpose()?
            .unwrap_or_default();

        let comparand = request.comparand.clone().filter(|c| !c.is_empty());
        if let Some(comparand) = &comparand {
            check_value(profile.column(column), comparand)?;
        }

        let mut filters = validate_filters(profile, &request.filters)?;
        if let Some(search) = profile.search_column() {
            filters.remove(&search);
        }
        take_latest_sentinel(profile, &mut filters);
        let predicates = filter_predicates(profile, &filters)?;

        let mut wanted: HashSet<ColumnId> = additional.iter().copied().collect();
        wanted.insert(column);
        wanted.extend(predicates.columns());
        let relation = choose_relation(profile, &wanted, true)
            .map_err(|_| CriteriaError::UnknownColumn(column_alias.to_string()))?;

        Ok(Self {
            profile,
            column,
            additional,
            relation,
            predicates,
            text: request.text.clone().filter(|t| !t.is_empty()),
            comparand,
            direction,
            limit: request.limit,
        })
    }

    pub fn to_sql(&self, schema: &str) -> SqlQuery {
        let mut params = SqlParams::default();
        let column = self.profile.column(self.column);

        let mut select = vec![column.select_expr()];
        select.extend(
            self.additional
                .iter()
                .map(|id| self.profile.column(*id).select_expr()),
        );

        let mut conditions = vec![format!("{} IS NOT NULL", column.name)];

        if let Some(text) = &self.text {
            let placeholder = params.push(format!("%{}%", escape_like_pattern(text)), "text");
            let matches: Vec<String> = std::iter::once(self.column)
                .chain(self.additional.iter().copied())
                .map(|id| {
                    let c = self.profile.column(id);
                    let cast = if c.column_type == ColumnType::Text {
                        ""
                    } else {
                        "::text"
                    };
                    format!("{}{} ILIKE {}", c.name, cast, placeholder)
                })
                .collect();
            conditions.push(format!("({})", matches.join(" OR ")));
        }

        if let Some(comparand) = &self.comparand {
            let op = match self.direction {
                Direction::Asc => ">",
                Direction::Desc => "<",
            };
            conditions.push(format!(
                "{} {} {}",
                column.name,
                op,
                params.push(comparand.clone(), column.column_type.sql_type())
            ));
        }

        conditions.extend(self.predicates.to_sql(self.profile, &mut params));

        let mut sql = format!(
            "SELECT DISTINCT ON ({}) {} FROM {} WHERE {} ORDER BY {} {}",
            column.name,
            select.join(", "),
            qualified(schema, &self.relation.name),
            conditions.join(" AND "),
            column.name,
            self.direction.keyword()
        );
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        SqlQuery {
            sql,
            params: params.into_values(),
        }
    }

    /// Plain value list without additional columns, objects with them
    pub fn shape(&self, rows: Vec<Map<String, Value>>) -> Value {
        if !self.additional.is_empty() {
            return Value::Array(rows.into_iter().map(Value::Object).collect());
        }
        let alias = &self.profile.column(self.column).alias;
        Value::Array(
            rows.into_iter()
                .map(|mut row| row.remove(alias).unwrap_or(Value::Null))
                .collect(),
        )
    }
}

fn resolve(profile: &Profile, alias: &str) -> Result<ColumnId, CriteriaError> {
    match profile.column_by_alias(alias) {
        Some(id) if Some(id) != profile.search_column() => Ok(id),
        _ => Err(CriteriaError::UnknownColumn(alias.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profiles::ProfileRegistry;

    const LIMITS: QueryLimits = QueryLimits {
        json_page_size: 20,
        max_page_size: 500,
        max_values_limit: 1000,
    };

    fn body(json: &str) -> ValuesRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_plain_values_query() {
        let registry = ProfileRegistry::builtin().unwrap();
        let sources = registry.get("sources").unwrap();
        let plan = ValuesPlan::build(sources, "state", &ValuesRequest::default(), &LIMITS).unwrap();
        let query = plan.to_sql("schema_3");
        assert_eq!(
            query.sql,
            "SELECT DISTINCT ON (state) state FROM \"schema_3\".\"sources_sources\" \
             WHERE state IS NOT NULL ORDER BY state ASC"
        );
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_text_match_casts_non_text_columns() {
        let registry = ProfileRegistry::builtin().unwrap();
        let sources = registry.get("sources").unwrap();
        let req = body(
            r#"{ "text": "50%", "limit": 10, "direction": "desc", "additionalColumns": ["reportingCycle"] }"#,
        );
        let plan = ValuesPlan::build(sources, "organizationId", &req, &LIMITS).unwrap();
        let query = plan.to_sql("s");
        assert_eq!(
            query.sql,
            "SELECT DISTINCT ON (organizationid) organizationid AS \"organizationId\", \
             reportingcycle AS \"reportingCycle\" FROM \"s\".\"sources_sources\" \
             WHERE organizationid IS NOT NULL \
             AND (organizationid ILIKE $1::text OR reportingcycle::text ILIKE $1::text) \
             ORDER BY organizationid DESC LIMIT 10"
        );
        assert_eq!(query.params, vec!["%50\\%%"]);
    }

    #[test]
    fn test_comparand_and_filters() {
        let registry = ProfileRegistry::builtin().unwrap();
        let actions = registry.get("actions").unwrap();
        let req = body(r#"{ "comparand": "MD", "filters": { "actionAgency": "EPA" } }"#);
        let query = ValuesPlan::build(actions, "state", &req, &LIMITS)
            .unwrap()
            .to_sql("s");
        assert_eq!(
            query.sql,
            "SELECT DISTINCT ON (state) state FROM \"s\".\"actions_actions\" \
             WHERE state IS NOT NULL AND state > $1::text AND actionagency = $2::text \
             ORDER BY state ASC"
        );
        assert_eq!(query.params, vec!["MD", "EPA"]);
    }

    #[test]
    fn test_unknown_column_is_not_found() {
        let registry = ProfileRegistry::builtin().unwrap();
        let sources = registry.get("sources").unwrap();
        assert_eq!(
            ValuesPlan::build(sources, "nope", &ValuesRequest::default(), &LIMITS).unwrap_err(),
            CriteriaError::UnknownColumn("nope".into())
        );
        let docs = registry.get("actionDocuments").unwrap();
        assert!(matches!(
            ValuesPlan::build(docs, "documentQuery", &ValuesRequest::default(), &LIMITS),
            Err(CriteriaError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_limit_and_direction_validated() {
        let registry = ProfileRegistry::builtin().unwrap();
        let sources = registry.get("sources").unwrap();
        assert!(matches!(
            ValuesPlan::build(sources, "state", &body(r#"{ "limit": 5000 }"#), &LIMITS),
            Err(CriteriaError::LimitExceeded { value: 5000, .. })
        ));
        assert!(matches!(
            ValuesPlan::build(sources, "state", &body(r#"{ "direction": "up" }"#), &LIMITS),
            Err(CriteriaError::InvalidParameter(_))
        ));
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_query_pairs() {
        let req = ValuesRequest::from_query_pairs(pairs(&[
            ("text", "tex"),
            ("limit", "20"),
            ("direction", "desc"),
            ("additionalColumns", "reportingCycle,region"),
            ("state", "TX"),
            ("state", "OK"),
        ]))
        .unwrap();
        assert_eq!(req.text.as_deref(), Some("tex"));
        assert_eq!(req.limit, Some(20));
        assert_eq!(req.direction.as_deref(), Some("desc"));
        assert_eq!(req.additional_columns, vec!["reportingCycle", "region"]);
        assert_eq!(
            req.filters.get("state"),
            Some(&ParamValue::Many(vec!["TX".into(), "OK".into()]))
        );
    }

    #[test]
    fn test_from_query_pairs_rejects_bad_limit_and_repeats() {
        assert!(matches!(
            ValuesRequest::from_query_pairs(pairs(&[("limit", "ten")])),
            Err(CriteriaError::InvalidParameter(_))
        ));
        assert_eq!(
            ValuesRequest::from_query_pairs(pairs(&[("text", "a"), ("text", "b")])).unwrap_err(),
            CriteriaError::DuplicateParameter("text".into())
        );
    }

    #[test]
    fn test_shape() {
        let registry = ProfileRegistry::builtin().unwrap();
        let sources = registry.get("sources").unwrap();
        let plan = ValuesPlan::build(sources, "state", &ValuesRequest::default(), &LIMITS).unwrap();
        let mut row = Map::new();
        row.insert("state".into(), Value::from("TX"));
        assert_eq!(plan.shape(vec![row]), serde_json::json!(["TX"]));
    }
}
