//! Blue-green schema ETL
//!
//! - `extract` - paginated pulls from the upstream services
//! - `load` - row conversion and warehouse DDL
//! - `rotation` - per-run schema creation, activation and retention
//! - `scheduler` - periodic runs until shutdown
//! - `status` - the run state machine shared with health checks

pub mod extract;
pub mod load;
pub mod rotation;
mod scheduler;
pub mod status;

pub use extract::{ExtractError, Extractor, HttpExtractor};
pub use rotation::{EtlError, RotationManager, RotationSettings, RunSummary};
pub use status::{EtlField, EtlState};
