//! Shared API types
//!
//! Error responses for every endpoint and the conversions from the domain
//! and storage error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::data::DataError;
use crate::domain::export::ExportError;
use crate::domain::query::CriteriaError;

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: String, message: String },
    NotFound { code: String, message: String },
    Unauthorized { code: String, message: String },
    ServiceUnavailable { message: String },
    Internal { message: String },
    /// Not a failure: answered with 200 and a `{message}` body
    Notice { message: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice {
            message: message.into(),
        }
    }

    pub fn profile_not_found() -> Self {
        Self::not_found("PROFILE_NOT_FOUND", "The requested profile does not exist")
    }
}

impl From<CriteriaError> for ApiError {
    fn from(e: CriteriaError) -> Self {
        let message = e.to_string();
        match e {
            CriteriaError::DuplicateParameter(_) => Self::bad_request("DUPLICATE_PARAMETER", message),
            CriteriaError::InvalidParameter(_) => Self::bad_request("INVALID_PARAMETER", message),
            CriteriaError::UnknownColumn(_) => Self::not_found("COLUMN_NOT_FOUND", message),
            CriteriaError::LimitExceeded { .. } => Self::bad_request("LIMIT_EXCEEDED", message),
            CriteriaError::NoParameters => Self::notice(message),
        }
    }
}

impl From<DataError> for ApiError {
    fn from(e: DataError) -> Self {
        tracing::error!(error = %e, "Data error");
        Self::internal(e.to_string())
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        tracing::error!(error = %e, "Export error");
        Self::internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match self {
            Self::Notice { message } => {
                return (StatusCode::OK, Json(json!({ "message": message }))).into_response();
            }
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, "bad_request", code, message)
            }
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, "not_found", code, message),
            Self::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, "unauthorized", code, message)
            }
            Self::ServiceUnavailable { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "SERVICE_UNAVAILABLE".to_string(),
                message,
            ),
            Self::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "INTERNAL".to_string(),
                message,
            ),
        };
        (
            status,
            Json(json!({
                "error": error_type,
                "code": code,
                "message": message
            })),
        )
            .into_response()
    }
}
