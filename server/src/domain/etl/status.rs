//! ETL status values and their allowed transitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// State of one `logging.etl_status` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EtlState {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
}

impl EtlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Transition table: idle→running, running→success|failed, success|failed→idle
    pub fn can_transition_to(self, next: EtlState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Running, Self::Success)
                | (Self::Running, Self::Failed)
                | (Self::Success, Self::Idle)
                | (Self::Failed, Self::Idle)
        )
    }

    /// States to pass through, starting after `self`, to reach `Running`
    pub fn path_to_running(self) -> Option<&'static [EtlState]> {
        match self {
            Self::Idle => Some(&[Self::Running]),
            Self::Success | Self::Failed => Some(&[Self::Idle, Self::Running]),
            Self::Running => None,
        }
    }
}

impl fmt::Display for EtlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EtlState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown ETL state '{}'", other)),
        }
    }
}

/// Column of the `etl_status` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtlField {
    Database,
    Glossary,
    DomainValues,
}

impl EtlField {
    pub const ALL: [EtlField; 3] = [Self::Database, Self::Glossary, Self::DomainValues];

    pub fn column(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Glossary => "glossary",
            Self::DomainValues => "domain_values",
        }
    }
}

impl fmt::Display for EtlField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}
