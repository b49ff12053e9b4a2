//! Query, count and values endpoints

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value, json};

use crate::api::types::ApiError;
use crate::core::config::QueryConfig;
use crate::data::QueryStore;
use crate::domain::export::{self, json::page_body};
use crate::domain::profiles::{Profile, ProfileRegistry};
use crate::domain::query::{
    CriteriaError, Delivery, QueryLimits, QueryPlan, QueryRequest, ValuesPlan, ValuesRequest,
};

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
pub struct QueryApiState {
    pub profiles: Arc<ProfileRegistry>,
    pub store: Arc<dyn QueryStore>,
    pub config: QueryConfig,
    /// Public base URL for the national-downloads pointer
    pub server_url: String,
}

impl QueryApiState {
    fn limits(&self) -> QueryLimits {
        QueryLimits {
            json_page_size: self.config.json_page_size,
            max_page_size: self.config.max_page_size,
            max_values_limit: self.config.max_values_limit,
        }
    }

    /// Look up a queryable profile; hidden profiles answer like missing ones
    fn profile(&self, name: &str) -> Result<Arc<Profile>, ApiError> {
        match self.profiles.get(name) {
            Some(profile) if !profile.hidden => Ok(Arc::clone(profile)),
            _ => Err(ApiError::profile_not_found()),
        }
    }

    async fn active_schema(&self) -> Result<String, ApiError> {
        self.store
            .active_schema()
            .await?
            .map(|s| s.schema_name)
            .ok_or_else(|| ApiError::service_unavailable("No active schema is available"))
    }

    fn too_large(&self) -> ApiError {
        ApiError::notice(format!(
            "The current query exceeds the maximum query size of {} rows. Please refine the \
             search, or visit {}/national-downloads to download a compressed dataset",
            self.config.max_query_size,
            self.server_url.trim_end_matches('/')
        ))
    }
}

const NO_DATA_MESSAGE: &str = "No data available for the selected criteria";

// ============================================================================
// Routes
// ============================================================================

pub fn routes(state: QueryApiState) -> Router<()> {
    Router::new()
        .route("/{profile}", get(query_get).post(query_post))
        .route("/{profile}/count", get(count_get).post(count_post))
        .with_state(state)
}

pub fn values_routes(state: QueryApiState) -> Router<()> {
    Router::new()
        .route("/{profile}/values/{column}", get(values_get).post(values_post))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn query_get(
    State(state): State<QueryApiState>,
    Path(profile): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    execute_query(&state, &profile, QueryRequest::from_query_pairs(pairs)).await
}

async fn query_post(
    State(state): State<QueryApiState>,
    Path(profile): Path<String>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    execute_query(&state, &profile, request).await
}

async fn count_get(
    State(state): State<QueryApiState>,
    Path(profile): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    execute_count(&state, &profile, QueryRequest::from_query_pairs(pairs)).await
}

async fn count_post(
    State(state): State<QueryApiState>,
    Path(profile): Path<String>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<Value>, ApiError> {
    execute_count(&state, &profile, request).await
}

async fn values_get(
    State(state): State<QueryApiState>,
    Path((profile, column)): Path<(String, String)>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let request = ValuesRequest::from_query_pairs(pairs)?;
    execute_values(&state, &profile, &column, request).await
}

async fn values_post(
    State(state): State<QueryApiState>,
    Path((profile, column)): Path<(String, String)>,
    Json(request): Json<ValuesRequest>,
) -> Result<Json<Value>, ApiError> {
    execute_values(&state, &profile, &column, request).await
}

async fn execute_values(
    state: &QueryApiState,
    profile: &str,
    column: &str,
    request: ValuesRequest,
) -> Result<Json<Value>, ApiError> {
    let profile = state.profile(profile)?;
    let plan = ValuesPlan::build(&profile, column, &request, &state.limits())?;
    let schema = state.active_schema().await?;
    let rows = state.store.fetch_rows(&plan.to_sql(&schema)).await?;
    Ok(Json(plan.shape(rows)))
}

/// Check the size, then stream a file or answer one inline page
async fn execute_query(
    state: &QueryApiState,
    profile_name: &str,
    request: QueryRequest,
) -> Result<Response, ApiError> {
    let profile = state.profile(profile_name)?;
    let validated = request.validate(&profile, &state.limits())?;
    if matches!(validated.delivery, Delivery::File(_)) && validated.filters.is_empty() {
        return Err(CriteriaError::NoParameters.into());
    }
    let plan = QueryPlan::build(&profile, &validated)?;
    let schema = state.active_schema().await?;

    let max = state.config.max_query_size;
    let capped = state.store.fetch_count(&plan.capped_count_sql(&schema, max)).await?;
    if u64::try_from(capped).unwrap_or(0) > max {
        return Err(state.too_large());
    }

    match validated.delivery {
        Delivery::File(format) => {
            if capped == 0 {
                return Err(ApiError::notice(NO_DATA_MESSAGE));
            }
            let rows = state.store.stream_rows(plan.to_sql(&schema)).await?;
            let response = export::respond(
                format,
                &profile.table_name,
                rows,
                state.config.stream_high_water_mark,
            )?;
            Ok(response)
        }
        Delivery::Page(_) => {
            if capped == 0 {
                return Ok(Json(json!({ "data": [] })).into_response());
            }
            let rows = state.store.fetch_rows(&plan.to_sql(&schema)).await?;
            let body = match plan.paging {
                Some(paging) => {
                    let id_alias = &profile.column(profile.id_column()).alias;
                    page_body(rows, paging, id_alias)
                }
                None => json!({ "data": rows }),
            };
            Ok(Json(body).into_response())
        }
    }
}

async fn execute_count(
    state: &QueryApiState,
    profile_name: &str,
    request: QueryRequest,
) -> Result<Json<Value>, ApiError> {
    let profile = state.profile(profile_name)?;
    let validated = request.validate(&profile, &state.limits())?;
    let plan = QueryPlan::build(&profile, &validated)?;
    let schema = state.active_schema().await?;

    let count = state.store.fetch_count(&plan.count_sql(&schema)).await?;
    let mut body = Map::new();
    body.insert("count".into(), Value::from(count));
    body.insert("maxCount".into(), Value::from(state.config.max_query_size));

    if profile.include_cycle_count
        && let Some(query) = plan.cycle_count_sql(&schema)
    {
        let cycles = state.store.fetch_count(&query).await?;
        body.insert("cycleCount".into(), Value::from(cycles));
    }
    Ok(Json(Value::Object(body)))
}
