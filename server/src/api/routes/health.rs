//! ETL health endpoints
//!
//! Each check answers 200 with `{status}`; only an unexpected storage error
//! produces a 500.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::types::ApiError;
use crate::core::constants::{DOMAIN_VALUES_DIR, GLOSSARY_FILE, HEALTH_MAX_AGE_HOURS};
use crate::data::exports::oldest_modified;
use crate::data::{EtlRepository, QueryStore};
use crate::domain::etl::EtlState;
use crate::domain::profiles::ProfileRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "FAILED-DB")]
    FailedDb,
    #[serde(rename = "FAILED-SCHEMA")]
    FailedSchema,
    #[serde(rename = "FAILED-TIME")]
    FailedTime,
    #[serde(rename = "FAILED-QUERY")]
    FailedQuery,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
}

#[derive(Clone)]
pub struct HealthApiState {
    pub profiles: Arc<ProfileRegistry>,
    pub etl: Arc<dyn EtlRepository>,
    pub store: Arc<dyn QueryStore>,
    pub content_dir: PathBuf,
}

pub fn routes(state: HealthApiState) -> Router<()> {
    Router::new()
        .route("/etlDatabase", get(etl_database))
        .route("/etlDomainValues", get(etl_domain_values))
        .route("/etlGlossary", get(etl_glossary))
        .with_state(state)
}

fn is_stale(at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(at) >= chrono::Duration::hours(HEALTH_MAX_AGE_HOURS)
}

fn respond(status: HealthStatus) -> Json<HealthResponse> {
    Json(HealthResponse { status })
}

/// Status flag, newest schema row, schema age, then one row from every table
pub async fn etl_database(
    State(state): State<HealthApiState>,
) -> Result<Json<HealthResponse>, ApiError> {
    let status = state.etl.etl_status().await?;
    if status.database == EtlState::Failed {
        return Ok(respond(HealthStatus::FailedDb));
    }

    let schemas = state.etl.list_schemas().await?;
    let newest_active = schemas.first().is_some_and(|s| s.active);
    if !newest_active && status.database != EtlState::Running {
        return Ok(respond(HealthStatus::FailedSchema));
    }

    let Some(active) = schemas.iter().find(|s| s.active) else {
        return Ok(respond(HealthStatus::FailedSchema));
    };
    if is_stale(active.creation_date, Utc::now()) {
        return Ok(respond(HealthStatus::FailedTime));
    }

    for profile in state.profiles.iter() {
        if !state
            .store
            .has_rows(&active.schema_name, &profile.table_name)
            .await?
        {
            tracing::warn!(
                profile = %profile.id,
                schema = %active.schema_name,
                "Health query found no rows"
            );
            return Ok(respond(HealthStatus::FailedQuery));
        }
    }

    Ok(respond(HealthStatus::Up))
}

async fn content_health(
    state: EtlState,
    path: PathBuf,
) -> Result<Json<HealthResponse>, ApiError> {
    if state == EtlState::Failed {
        return Ok(respond(HealthStatus::FailedDb));
    }
    let oldest = oldest_modified(&path)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let fresh = oldest.is_some_and(|t| !is_stale(t.into(), Utc::now()));
    Ok(respond(if fresh {
        HealthStatus::Up
    } else {
        HealthStatus::FailedTime
    }))
}

pub async fn etl_domain_values(
    State(state): State<HealthApiState>,
) -> Result<Json<HealthResponse>, ApiError> {
    let status = state.etl.etl_status().await?;
    content_health(
        status.domain_values,
        state.content_dir.join(DOMAIN_VALUES_DIR),
    )
    .await
}

pub async fn etl_glossary(
    State(state): State<HealthApiState>,
) -> Result<Json<HealthResponse>, ApiError> {
    let status = state.etl.etl_status().await?;
    content_health(status.glossary, state.content_dir.join(GLOSSARY_FILE)).await
}
