//! Data storage layer
//!
//! - `postgres` - control tables, warehouse loads and query execution
//! - `exports` - national-download directories under the content directory
//! - `types` - shared row types
//! - `traits` - repository traits the ETL and handlers depend on
//! - `error` - unified error type for all backends

pub mod error;
pub mod exports;
#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod traits;
pub mod types;

pub use error::DataError;
pub use exports::FsExportStore;
pub use postgres::PostgresService;
pub use traits::{EtlRepository, ExportStore, QueryStore, RowStream, Warehouse};
