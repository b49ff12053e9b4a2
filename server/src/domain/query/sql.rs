//! SQL text with positional parameters

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// A statement and its text parameters, in `$n` order.
///
/// Every user value travels as a bound parameter with an explicit cast at its
/// placeholder; only validated identifiers are spliced into `sql`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<String>,
}

impl SqlQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Collects SQL parameters during query building (maintains insertion order)
#[derive(Debug, Default)]
pub struct SqlParams {
    values: Vec<String>,
}

impl SqlParams {
    /// Add a parameter and return its cast placeholder, e.g. `$3::numeric`
    pub fn push(&mut self, value: impl Into<String>, cast: &str) -> String {
        self.values.push(value.into());
        format!("${}::{}", self.values.len(), cast)
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }
}

/// Normalize a date bound to a UTC midnight boundary.
///
/// Low bounds map to the start of the day; high bounds to the start of the
/// following day so the whole high day is included. Returns `None` for values
/// that are not dates.
pub fn date_to_utc_time(value: &str, is_high: bool) -> Option<String> {
    let date = parse_date(value.trim())?;
    let date = if is_high {
        date.checked_add_signed(Duration::days(1))?
    } else {
        date
    };
    Some(format!("{}T00:00Z", date.format("%Y-%m-%d")))
}

/// Canonical `YYYY-MM-DD` form of a date value, or `None` if it is not a date
pub fn normalize_date(value: &str) -> Option<String> {
    parse_date(value.trim()).map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    NaiveDate::parse_from_str(value, "%m-%d-%Y")
        .or_else(|_| NaiveDate::parse_from_str(value, "%m/%d/%Y"))
        .ok()
}
