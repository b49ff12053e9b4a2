//! Domain logic for the expert query service
//!
//! - `profiles` - dataset definitions and column lookup
//! - `query` - request validation and SQL planning
//! - `export` - streaming file encoders
//! - `etl` - extract, load and blue-green schema rotation

pub mod etl;
pub mod export;
pub mod profiles;
pub mod query;
