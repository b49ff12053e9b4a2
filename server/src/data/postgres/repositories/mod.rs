pub mod etl;
pub mod query;
pub mod warehouse;
