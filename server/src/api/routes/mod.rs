//! HTTP route handlers
//!
//! - `query` - data, count and values endpoints under `/api/{profile}`
//! - `health` - ETL freshness checks under `/api/health`

pub mod health;
pub mod query;
