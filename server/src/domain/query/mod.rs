//! Dynamic query building
//!
//! - `params` - raw request parameters and validation against a profile
//! - `plan` - relation choice and SQL compilation for data and count requests
//! - `values` - distinct-value lookups for a single column
//! - `sql` - parameterized SQL text

mod error;
pub mod params;
pub mod plan;
pub mod sql;
pub mod values;

pub use error::CriteriaError;
pub use params::{Delivery, ExportFormat, Paging, QueryLimits, QueryRequest, ValidatedRequest};
pub use plan::QueryPlan;
pub use sql::SqlQuery;
pub use values::{ValuesPlan, ValuesRequest};
