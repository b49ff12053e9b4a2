//! Query plans: relation choice, projection, predicates and paging
//!
//! A plan is built per request from a validated parameter set and compiled into
//! [`SqlQuery`] statements against the active schema.

use std::collections::{BTreeMap, HashSet};

use super::error::CriteriaError;
use super::params::{ColumnFilter, Delivery, FilterValue, Paging, ValidatedRequest};
use super::sql::{SqlParams, SqlQuery, date_to_utc_time, normalize_date};
use crate::domain::profiles::{Column, ColumnId, ColumnType, Profile, Relation};
use crate::utils::sql::qualified;

/// Output name of the full-text rank column
pub const RANK_ALIAS: &str = "rankPercent";

/// Filter value that turns off latest-per-organization selection
pub const LATEST_DISABLED: &str = "-1";

const TEXT_SEARCH_CONFIG: &str = "english";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Equals {
        column: ColumnId,
        value: String,
    },
    AnyOf {
        column: ColumnId,
        values: Vec<String>,
    },
    Range {
        column: ColumnId,
        low: Option<String>,
        high: Option<String>,
    },
}

impl Predicate {
    pub fn column(&self) -> ColumnId {
        match self {
            Self::Equals { column, .. } | Self::AnyOf { column, .. } | Self::Range { column, .. } => {
                *column
            }
        }
    }
}

/// Range predicate for a column from optional low/high bounds.
///
/// Timestamp bounds are normalized to UTC midnight (the high bound to the
/// following midnight); unparseable dates count as absent. No bounds, no
/// predicate.
pub fn range_predicate(
    id: ColumnId,
    column: &Column,
    low: Option<&str>,
    high: Option<&str>,
) -> Option<Predicate> {
    let normalize = |value: &str, is_high: bool| match column.column_type {
        ColumnType::Timestamptz => date_to_utc_time(value, is_high),
        ColumnType::Date => normalize_date(value),
        _ => Some(value.to_string()),
    };
    let low = low.and_then(|v| normalize(v, false));
    let high = high.and_then(|v| normalize(v, true));
    if low.is_none() && high.is_none() {
        return None;
    }
    Some(Predicate::Range {
        column: id,
        low,
        high,
    })
}

/// Ordered predicate list; re-adding an identical predicate is a no-op
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicates(Vec<Predicate>);

impl Predicates {
    pub fn push(&mut self, predicate: Predicate) {
        if !self.0.contains(&predicate) {
            self.0.push(predicate);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Predicate> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.0.iter().map(Predicate::column)
    }

    /// Compile to SQL conditions, binding values into `params`
    pub fn to_sql(&self, profile: &Profile, params: &mut SqlParams) -> Vec<String> {
        self.0
            .iter()
            .map(|p| predicate_sql(profile, p, params))
            .collect()
    }
}

fn predicate_sql(profile: &Profile, predicate: &Predicate, params: &mut SqlParams) -> String {
    let column = profile.column(predicate.column());
    let cast = column.column_type.sql_type();
    match predicate {
        Predicate::Equals { value, .. } => {
            format!("{} = {}", column.name, params.push(value.clone(), cast))
        }
        Predicate::AnyOf { values, .. } => {
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| params.push(v.clone(), cast))
                .collect();
            format!("{} IN ({})", column.name, placeholders.join(", "))
        }
        Predicate::Range { low, high, .. } => match (low, high) {
            (Some(low), Some(high)) => format!(
                "{} BETWEEN {} AND {}",
                column.name,
                params.push(low.clone(), cast),
                params.push(high.clone(), cast)
            ),
            (Some(low), None) => format!("{} >= {}", column.name, params.push(low.clone(), cast)),
            (None, Some(high)) => {
                format!("{} <= {}", column.name, params.push(high.clone(), cast))
            }
            (None, None) => "TRUE".to_string(),
        },
    }
}

/// Compile validated filters into predicates, checking numeric values
pub fn filter_predicates(
    profile: &Profile,
    filters: &BTreeMap<ColumnId, ColumnFilter>,
) -> Result<Predicates, CriteriaError> {
    let mut predicates = Predicates::default();
    for (&id, filter) in filters {
        let column = profile.column(id);
        match &filter.exact {
            Some(FilterValue::One(value)) => {
                check_value(column, value)?;
                predicates.push(Predicate::Equals {
                    column: id,
                    value: value.clone(),
                });
            }
            Some(FilterValue::Many(values)) => {
                for value in values {
                    check_value(column, value)?;
                }
                predicates.push(Predicate::AnyOf {
                    column: id,
                    values: values.clone(),
                });
            }
            None => {}
        }
        for bound in [&filter.low, &filter.high].into_iter().flatten() {
            check_value(column, bound)?;
        }
        if let Some(range) =
            range_predicate(id, column, filter.low.as_deref(), filter.high.as_deref())
        {
            predicates.push(range);
        }
    }
    Ok(predicates)
}

/// Drop a `-1` filter on the latest-defaulted column.
///
/// Returns whether the latest-per-organization restriction still applies:
/// only when the profile has such a column and it is not filtered.
pub fn take_latest_sentinel(
    profile: &Profile,
    filters: &mut BTreeMap<ColumnId, ColumnFilter>,
) -> bool {
    let Some(id) = profile.latest_column() else {
        return false;
    };
    let Some(filter) = filters.get_mut(&id) else {
        return true;
    };
    if matches!(&filter.exact, Some(FilterValue::One(v)) if v == LATEST_DISABLED) {
        filter.exact = None;
        if filter.is_empty() {
            filters.remove(&id);
        }
    }
    false
}

/// Pick the cheapest relation providing every wanted column.
///
/// Materialized views come first (the narrowest one that qualifies), then the
/// base table, then plain views in definition order.
pub fn choose_relation<'p>(
    profile: &'p Profile,
    wanted: &HashSet<ColumnId>,
    allow_materialized: bool,
) -> Result<&'p Relation, CriteriaError> {
    if allow_materialized
        && let Some(mv) = profile
            .materialized_views()
            .iter()
            .filter(|mv| mv.covers(wanted))
            .min_by_key(|mv| mv.columns.len())
    {
        return Ok(mv);
    }
    if profile.base().covers(wanted) {
        return Ok(profile.base());
    }
    if let Some(view) = profile.views().iter().find(|v| v.covers(wanted)) {
        return Ok(view);
    }
    Err(CriteriaError::InvalidParameter(
        "The requested columns and filters cannot be combined in a single query".to_string(),
    ))
}

/// Latest-per-organization restriction
#[derive(Debug, Clone)]
pub struct LatestRestriction<'p> {
    pub column: ColumnId,
    pub organization: ColumnId,
    pub relation: &'p Relation,
}

/// Full-text ranking over the profile's search column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRank {
    pub column: ColumnId,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct QueryPlan<'p> {
    profile: &'p Profile,
    pub relation: &'p Relation,
    pub select: Vec<ColumnId>,
    pub predicates: Predicates,
    pub latest: Option<LatestRestriction<'p>>,
    pub search: Option<SearchRank>,
    /// Inline JSON paging, after fallbacks; `None` for file downloads
    pub paging: Option<Paging>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub start_id: Option<i64>,
}

impl<'p> QueryPlan<'p> {
    /// Build a plan from a validated request
    pub fn build(profile: &'p Profile, request: &ValidatedRequest) -> Result<Self, CriteriaError> {
        let mut filters = request.filters.clone();

        let search = match profile.search_column() {
            Some(id) => match filters.remove(&id).and_then(|f| f.exact) {
                Some(FilterValue::One(text)) => Some(SearchRank { column: id, text }),
                Some(FilterValue::Many(_)) => {
                    return Err(CriteriaError::DuplicateParameter(
                        profile.column(id).alias.clone(),
                    ));
                }
                None => None,
            },
            None => None,
        };

        let latest_enabled = take_latest_sentinel(profile, &mut filters);
        let predicates = filter_predicates(profile, &filters)?;

        let mut select: Vec<ColumnId> = if request.columns.is_empty() {
            profile.base_columns().map(|(id, _)| id).collect()
        } else {
            request.columns.clone()
        };

        let mut wanted: HashSet<ColumnId> = select.iter().copied().collect();
        wanted.extend(predicates.columns());
        if let Some(search) = &search {
            wanted.insert(search.column);
        }
        let relation = choose_relation(profile, &wanted, search.is_none())?;

        let id_column = profile.id_column();
        let has_id = relation.contains(id_column);
        if has_id && !select.contains(&id_column) {
            select.insert(0, id_column);
        }

        let latest = match (latest_enabled, profile.latest_column(), profile.organization_column()) {
            (true, Some(column), Some(organization)) => {
                let mut latest_wanted: HashSet<ColumnId> = predicates.columns().collect();
                latest_wanted.insert(column);
                latest_wanted.insert(organization);
                Some(LatestRestriction {
                    column,
                    organization,
                    relation: choose_relation(profile, &latest_wanted, true)?,
                })
            }
            _ => None,
        };

        let mut plan = Self {
            profile,
            relation,
            select,
            predicates,
            latest,
            search,
            paging: None,
            limit: None,
            offset: None,
            start_id: None,
        };

        if let Delivery::Page(paging) = request.delivery {
            plan.apply_paging(paging, has_id)?;
        }
        Ok(plan)
    }

    fn apply_paging(&mut self, paging: Paging, has_id: bool) -> Result<(), CriteriaError> {
        let keyset_usable = has_id && self.search.is_none();
        let paging = match paging {
            Paging::Keyset {
                start_id: Some(_), ..
            } if !keyset_usable => {
                return Err(CriteriaError::InvalidParameter(
                    "The parameter 'startId' is not valid for this query, use 'pageNumber'"
                        .to_string(),
                ));
            }
            Paging::Keyset {
                start_id: None,
                page_size,
            } if !keyset_usable => Paging::Offset {
                page_number: 1,
                page_size,
            },
            other => other,
        };

        // One extra row tells the encoder whether another page exists.
        self.limit = Some(paging.page_size() + 1);
        match paging {
            Paging::Keyset { start_id, .. } => self.start_id = start_id,
            Paging::Offset {
                page_number,
                page_size,
            } => {
                let offset = (page_number - 1).saturating_mul(page_size);
                self.offset = (offset > 0).then_some(offset);
            }
        }
        self.paging = Some(paging);
        Ok(())
    }

    pub fn profile(&self) -> &'p Profile {
        self.profile
    }

    /// Whether the select list carries the profile's id column
    pub fn selects_id(&self) -> bool {
        self.select.contains(&self.profile.id_column())
    }

    /// Full statement with ordering and paging
    pub fn to_sql(&self, schema: &str) -> SqlQuery {
        let mut params = SqlParams::default();
        let mut sql = self.body(schema, &mut params, None);

        sql.push_str(" ORDER BY ");
        sql.push_str(&self.order_by());
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        SqlQuery {
            sql,
            params: params.into_values(),
        }
    }

    /// Total number of matching rows
    pub fn count_sql(&self, schema: &str) -> SqlQuery {
        let mut params = SqlParams::default();
        let body = self.body(schema, &mut params, None);
        SqlQuery {
            sql: format!("SELECT COUNT(*) FROM ({}) q", body),
            params: params.into_values(),
        }
    }

    /// Count capped at `cap + 1`, enough to tell "over the cap" from "empty"
    pub fn capped_count_sql(&self, schema: &str, cap: u64) -> SqlQuery {
        let mut params = SqlParams::default();
        let body = self.body(schema, &mut params, None);
        SqlQuery {
            sql: format!(
                "SELECT COUNT(*) FROM ({} LIMIT {}) q",
                body,
                cap.saturating_add(1)
            ),
            params: params.into_values(),
        }
    }

    /// Distinct values of the latest-defaulted column among matching rows
    pub fn cycle_count_sql(&self, schema: &str) -> Option<SqlQuery> {
        let column = self.profile.latest_column()?;
        if !self.relation.contains(column) {
            return None;
        }
        let mut params = SqlParams::default();
        let name = &self.profile.column(column).name;
        let body = self.body(schema, &mut params, Some(format!("{} AS cycle", name)));
        Some(SqlQuery {
            sql: format!("SELECT COUNT(DISTINCT cycle) FROM ({}) q", body),
            params: params.into_values(),
        })
    }

    /// `SELECT ... FROM ... WHERE ... [GROUP BY ...]` without ordering or paging
    fn body(&self, schema: &str, params: &mut SqlParams, select_override: Option<String>) -> String {
        let mut conditions = self.predicates.to_sql(self.profile, params);
        let shared_conditions = conditions.clone();

        let search_expr = self.search.as_ref().map(|search| {
            let placeholder = params.push(search.text.clone(), "text");
            let column = &self.profile.column(search.column).name;
            let query = format!(
                "websearch_to_tsquery('{}', {})",
                TEXT_SEARCH_CONFIG, placeholder
            );
            conditions.push(format!("{} @@ {}", column, query));
            format!("ts_rank_cd({}, {})", column, query)
        });

        if let Some(latest) = &self.latest {
            let org = &self.profile.column(latest.organization).name;
            let col = &self.profile.column(latest.column).name;
            let mut sub = format!(
                "SELECT {}, MAX({}) FROM {}",
                org,
                col,
                qualified(schema, &latest.relation.name)
            );
            if !shared_conditions.is_empty() {
                sub.push_str(" WHERE ");
                sub.push_str(&shared_conditions.join(" AND "));
            }
            sub.push_str(&format!(" GROUP BY {}", org));
            conditions.push(format!("({}, {}) IN ({})", org, col, sub));
        }

        if let Some(start_id) = self.start_id {
            let id = &self.profile.column(self.profile.id_column()).name;
            conditions.push(format!(
                "{} >= {}",
                id,
                params.push(start_id.to_string(), "bigint")
            ));
        }

        let select = match (select_override, &search_expr) {
            (Some(select), _) => select,
            (None, Some(rank)) => {
                let mut exprs = self.select_exprs();
                exprs.push(format!(
                    "ROUND((PERCENT_RANK() OVER (ORDER BY MAX({})) * 100)::numeric, 1) AS \"{}\"",
                    rank, RANK_ALIAS
                ));
                exprs.join(", ")
            }
            (None, None) => self.select_exprs().join(", "),
        };

        let mut sql = format!(
            "SELECT {} FROM {}",
            select,
            qualified(schema, &self.relation.name)
        );
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if search_expr.is_some() {
            let group: Vec<&str> = self
                .select
                .iter()
                .map(|id| self.profile.column(*id).name.as_str())
                .collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&group.join(", "));
        }
        sql
    }

    fn select_exprs(&self) -> Vec<String> {
        self.select
            .iter()
            .map(|id| self.profile.column(*id).select_expr())
            .collect()
    }

    fn order_by(&self) -> String {
        let id = self.profile.id_column();
        let id_name = &self.profile.column(id).name;
        match (&self.search, self.selects_id()) {
            (Some(_), true) => format!("\"{}\" DESC, {} ASC", RANK_ALIAS, id_name),
            (Some(_), false) => format!("\"{}\" DESC", RANK_ALIAS),
            (None, true) => format!("{} ASC", id_name),
            (None, false) => (1..=self.select.len())
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

pub(super) fn check_value(column: &Column, value: &str) -> Result<(), CriteriaError> {
    if column.column_type.is_numeric() && value.trim().parse::<f64>().is_err() {
        return Err(CriteriaError::InvalidParameter(format!(
            "The value '{}' is not a valid number for '{}'",
            value, column.alias
        )));
    }
    Ok(())
}
