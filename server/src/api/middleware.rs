//! HTTP middleware (API key, CORS, 404 handler)

use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::types::ApiError;
use crate::core::constants::{API_KEY_HEADER, PRIVATE_ALLOWED_ORIGINS};

// ============================================================================
// API key
// ============================================================================

/// Shared key every `/api` request must present; `None` disables the check
#[derive(Clone, Default)]
pub struct ApiKeyState {
    pub key: Option<Arc<str>>,
}

impl ApiKeyState {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }
}

/// Constant-time string comparison
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub async fn require_api_key(
    State(state): State<ApiKeyState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.key.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if constant_time_eq(key, expected) => next.run(request).await,
        Some(_) => ApiError::unauthorized("API_KEY_INVALID", "Invalid API key").into_response(),
        None => ApiError::unauthorized("API_KEY_REQUIRED", "An API key is required")
            .into_response(),
    }
}

// ============================================================================
// CORS
// ============================================================================

/// Origins allowed to call the private (UI-only) endpoints
#[derive(Debug, Clone)]
pub struct AllowedOrigins {
    origins: Vec<String>,
}

impl AllowedOrigins {
    /// The deployment's own public URL plus the known UI hosts
    pub fn new(server_url: &str) -> Self {
        let mut origins: Vec<String> = PRIVATE_ALLOWED_ORIGINS
            .iter()
            .map(|o| o.to_string())
            .collect();
        let own = server_url.trim_end_matches('/');
        if !own.is_empty() && !origins.iter().any(|o| o == own) {
            origins.push(own.to_string());
        }
        Self { origins }
    }

    fn as_header_values(&self) -> Vec<HeaderValue> {
        self.origins.iter().filter_map(|o| o.parse().ok()).collect()
    }
}

fn api_key_header() -> HeaderName {
    HeaderName::from_static(API_KEY_HEADER)
}

/// Query and count endpoints: any origin, read methods only
pub fn cors_public() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::HEAD, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, api_key_header()])
}

/// Values and health endpoints: listed origins only
pub fn cors_private(allowed: &AllowedOrigins) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed.as_header_values()))
        .allow_methods([Method::GET, Method::HEAD, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, api_key_header()])
}

// ============================================================================
// Fallback
// ============================================================================

const MAX_404_BODY_LOG: usize = 64 * 1024;

/// Handle 404 Not Found with logging
pub async fn handle_404(req: Request) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();

    if tracing::enabled!(tracing::Level::DEBUG) {
        match to_bytes(req.into_body(), MAX_404_BODY_LOG).await {
            Ok(body) if !body.is_empty() => tracing::debug!(
                %method,
                %uri,
                body = %String::from_utf8_lossy(&body),
                "[404]"
            ),
            Ok(_) => tracing::debug!(%method, %uri, "[404]"),
            Err(_) => tracing::debug!(%method, %uri, "[404] (failed to read body)"),
        }
    }

    ApiError::not_found("NOT_FOUND", format!("No route for {} {}", method, uri.path()))
        .into_response()
}
