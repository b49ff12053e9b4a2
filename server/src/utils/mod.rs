//! Utility functions for the application

pub mod retry;
pub mod sql;
