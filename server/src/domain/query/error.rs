//! Request validation errors for the query endpoints

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CriteriaError {
    /// A single-valued option or filter was given more than once
    #[error("Duplicate '{0}' parameters not allowed")]
    DuplicateParameter(String),

    /// Unknown filter name, or a parameter that does not apply in this context
    #[error("{0}")]
    InvalidParameter(String),

    /// Unknown column addressed by path (values endpoint)
    #[error("The column '{0}' does not exist on the specified profile")]
    UnknownColumn(String),

    #[error("The provided {param} ({value}) exceeds the maximum allowed value of {max}")]
    LimitExceeded { param: String, value: u64, max: u64 },

    /// The request has nothing to narrow the result
    #[error(
        "Please provide at least one filter. To retrieve the complete dataset, use the national downloads"
    )]
    NoParameters,
}

impl CriteriaError {
    pub fn unknown_parameter(name: &str) -> Self {
        Self::InvalidParameter(format!(
            "The parameter '{}' is not valid for the specified profile",
            name
        ))
    }

    pub fn unknown_column(name: &str) -> Self {
        Self::InvalidParameter(format!(
            "The column '{}' is not valid for the specified profile",
            name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            CriteriaError::DuplicateParameter("format".into()).to_string(),
            "Duplicate 'format' parameters not allowed"
        );
        assert_eq!(
            CriteriaError::unknown_parameter("bogus").to_string(),
            "The parameter 'bogus' is not valid for the specified profile"
        );
        assert_eq!(
            CriteriaError::LimitExceeded {
                param: "pageSize".into(),
                value: 900,
                max: 500
            }
            .to_string(),
            "The provided pageSize (900) exceeds the maximum allowed value of 500"
        );
    }
}
