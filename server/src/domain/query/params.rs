//! Raw request parameters and their validation against a profile

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use super::error::CriteriaError;
use crate::domain::profiles::{ColumnId, ParamKind, Profile};

/// A parameter value as received: one value or a repeated/array value
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub enum ParamValue {
    One(String),
    Many(Vec<String>),
}

impl ParamValue {
    pub(crate) fn push(&mut self, value: String) {
        match self {
            Self::One(first) => *self = Self::Many(vec![std::mem::take(first), value]),
            Self::Many(values) => values.push(value),
        }
    }

    /// The single value, or `DuplicateParameter` for arrays
    pub fn single(&self, name: &str) -> Result<&str, CriteriaError> {
        match self {
            Self::One(v) => Ok(v),
            Self::Many(_) => Err(CriteriaError::DuplicateParameter(name.to_string())),
        }
    }
}

fn scalar_to_string(value: serde_json::Value) -> Result<String, String> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("unsupported parameter value: {}", other)),
    }
}

impl TryFrom<serde_json::Value> for ParamValue {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Array(items) => Ok(Self::Many(
                items
                    .into_iter()
                    .map(scalar_to_string)
                    .collect::<Result<_, _>>()?,
            )),
            other => scalar_to_string(other).map(Self::One),
        }
    }
}

/// File format selected through the `format` option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Tsv,
    Xlsx,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Xlsx => "xlsx",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Inline JSON paging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paging {
    /// `objectid >= start_id`, answered with `nextId`
    Keyset { start_id: Option<i64>, page_size: u64 },
    /// 1-based page number, answered with `nextOffset`
    Offset { page_number: u64, page_size: u64 },
}

impl Paging {
    pub fn page_size(&self) -> u64 {
        match self {
            Self::Keyset { page_size, .. } | Self::Offset { page_size, .. } => *page_size,
        }
    }
}

/// How rows leave the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    File(ExportFormat),
    Page(Paging),
}

/// Limits that validation enforces
#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    pub json_page_size: u64,
    pub max_page_size: u64,
    pub max_values_limit: u64,
}

const OPT_FORMAT: &str = "format";
const OPT_FORMAT_SHORT: &str = "f";
const OPT_START_ID: &str = "startId";
const OPT_PAGE_NUMBER: &str = "pageNumber";
const OPT_PAGE_SIZE: &str = "pageSize";
const COLUMNS_PARAM: &str = "columns";

/// `format` value selecting inline JSON pages
const FORMAT_JSON: &str = "json";

/// Largest OFFSET a page request may produce
const MAX_OFFSET: u64 = i64::MAX as u64;

/// Parameters of a query request: `{filters, options, columns}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub filters: BTreeMap<String, ParamValue>,
    pub options: BTreeMap<String, ParamValue>,
    pub columns: Vec<String>,
}

impl QueryRequest {
    /// Build from GET query pairs. Option names and `columns` are pulled out;
    /// everything else is a filter. Repeated names become arrays.
    pub fn from_query_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut request = Self::default();
        for (name, value) in pairs {
            if name == COLUMNS_PARAM {
                request.columns.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(String::from),
                );
                continue;
            }
            let target = match name.as_str() {
                OPT_FORMAT | OPT_FORMAT_SHORT | OPT_START_ID | OPT_PAGE_NUMBER | OPT_PAGE_SIZE => {
                    &mut request.options
                }
                _ => &mut request.filters,
            };
            match target.get_mut(&name) {
                Some(existing) => existing.push(value),
                None => {
                    target.insert(name, ParamValue::One(value));
                }
            }
        }
        request
    }

    /// Validate names and multiplicity against the profile
    pub fn validate(
        &self,
        profile: &Profile,
        limits: &QueryLimits,
    ) -> Result<ValidatedRequest, CriteriaError> {
        let filters = validate_filters(profile, &self.filters)?;
        let delivery = self.delivery(limits)?;

        let mut columns = Vec::with_capacity(self.columns.len());
        for alias in &self.columns {
            let id = profile
                .column_by_alias(alias)
                .ok_or_else(|| CriteriaError::unknown_column(alias))?;
            if Some(id) == profile.search_column() {
                return Err(CriteriaError::unknown_column(alias));
            }
            if !columns.contains(&id) {
                columns.push(id);
            }
        }

        Ok(ValidatedRequest {
            filters,
            columns,
            delivery,
        })
    }

    fn delivery(&self, limits: &QueryLimits) -> Result<Delivery, CriteriaError> {
        let mut format_seen = false;
        let mut format = None;
        let mut start_id = None;
        let mut page_number = None;
        let mut page_size = None;

        for (name, value) in &self.options {
            let value = value.single(name)?;
            match name.as_str() {
                OPT_FORMAT | OPT_FORMAT_SHORT => {
                    if format_seen {
                        return Err(CriteriaError::DuplicateParameter(OPT_FORMAT.to_string()));
                    }
                    format_seen = true;
                    if value.eq_ignore_ascii_case(FORMAT_JSON) {
                        continue;
                    }
                    format = Some(ExportFormat::parse(value).ok_or_else(|| {
                        CriteriaError::InvalidParameter(format!(
                            "The format '{}' is not supported. Use csv, tsv, xlsx or json",
                            value
                        ))
                    })?);
                }
                OPT_START_ID => start_id = Some(parse_integer::<i64>(name, value)?),
                OPT_PAGE_NUMBER => page_number = Some(parse_positive(name, value)?),
                OPT_PAGE_SIZE => page_size = Some(parse_positive(name, value)?),
                _ => return Err(CriteriaError::unknown_parameter(name)),
            }
        }

        if let Some(format) = format {
            for (name, present) in [
                (OPT_START_ID, start_id.is_some()),
                (OPT_PAGE_NUMBER, page_number.is_some()),
                (OPT_PAGE_SIZE, page_size.is_some()),
            ] {
                if present {
                    return Err(CriteriaError::InvalidParameter(format!(
                        "The parameter '{}' is only valid for JSON results",
                        name
                    )));
                }
            }
            return Ok(Delivery::File(format));
        }

        if let Some(size) = page_size
            && size > limits.max_page_size
        {
            return Err(CriteriaError::LimitExceeded {
                param: OPT_PAGE_SIZE.to_string(),
                value: size,
                max: limits.max_page_size,
            });
        }
        let page_size = page_size.unwrap_or(limits.json_page_size);

        let paging = match (start_id, page_number) {
            (Some(_), Some(_)) => {
                return Err(CriteriaError::InvalidParameter(format!(
                    "The parameters '{}' and '{}' cannot be combined",
                    OPT_START_ID, OPT_PAGE_NUMBER
                )));
            }
            (Some(start_id), None) => Paging::Keyset {
                start_id: Some(start_id),
                page_size,
            },
            (None, Some(page_number)) => {
                let max = MAX_OFFSET / page_size + 1;
                if page_number > max {
                    return Err(CriteriaError::LimitExceeded {
                        param: OPT_PAGE_NUMBER.to_string(),
                        value: page_number,
                        max,
                    });
                }
                Paging::Offset {
                    page_number,
                    page_size,
                }
            }
            (None, None) if self.options.contains_key(OPT_PAGE_SIZE) => Paging::Offset {
                page_number: 1,
                page_size,
            },
            (None, None) => Paging::Keyset {
                start_id: None,
                page_size,
            },
        };
        Ok(Delivery::Page(paging))
    }
}

fn parse_integer<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, CriteriaError> {
    value.trim().parse::<T>().map_err(|_| {
        CriteriaError::InvalidParameter(format!(
            "The parameter '{}' must be an integer, got '{}'",
            name, value
        ))
    })
}

fn parse_positive(name: &str, value: &str) -> Result<u64, CriteriaError> {
    let n = parse_integer::<u64>(name, value)?;
    if n == 0 {
        return Err(CriteriaError::InvalidParameter(format!(
            "The parameter '{}' must be greater than 0",
            name
        )));
    }
    Ok(n)
}

/// One filter value after validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    One(String),
    Many(Vec<String>),
}

/// Filters grouped by column: exact values and range bounds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnFilter {
    pub exact: Option<FilterValue>,
    pub low: Option<String>,
    pub high: Option<String>,
}

impl ColumnFilter {
    pub fn is_empty(&self) -> bool {
        self.exact.is_none() && self.low.is_none() && self.high.is_none()
    }
}

/// Check every filter name and multiplicity; group values by column
pub fn validate_filters(
    profile: &Profile,
    filters: &BTreeMap<String, ParamValue>,
) -> Result<BTreeMap<ColumnId, ColumnFilter>, CriteriaError> {
    let mut by_column: BTreeMap<ColumnId, ColumnFilter> = BTreeMap::new();

    for (name, value) in filters {
        let (id, kind) = profile
            .param(name)
            .ok_or_else(|| CriteriaError::unknown_parameter(name))?;
        let column = profile.column(id);
        let entry = by_column.entry(id).or_default();

        match kind {
            ParamKind::Low => entry.low = non_empty(value.single(name)?),
            ParamKind::High => entry.high = non_empty(value.single(name)?),
            ParamKind::Exact => {
                entry.exact = match value {
                    ParamValue::One(v) => non_empty(v).map(FilterValue::One),
                    ParamValue::Many(_) if !column.accepts_multiple => {
                        return Err(CriteriaError::DuplicateParameter(name.clone()));
                    }
                    ParamValue::Many(values) => {
                        let values: Vec<String> = values
                            .iter()
                            .filter(|v| !v.is_empty())
                            .cloned()
                            .collect();
                        if values.is_empty() {
                            None
                        } else {
                            Some(FilterValue::Many(values))
                        }
                    }
                };
            }
        }
    }

    by_column.retain(|_, f| !f.is_empty());
    Ok(by_column)
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// A request whose names and multiplicities have been checked
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub filters: BTreeMap<ColumnId, ColumnFilter>,
    /// Explicit column selection; empty means every base column
    pub columns: Vec<ColumnId>,
    pub delivery: Delivery,
}
