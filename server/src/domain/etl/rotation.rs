//! Blue-green schema rotation
//!
//! Each run loads every profile into a fresh `schema_<millis>` schema, then
//! flips the single active pointer, archives the outgoing national downloads
//! and trims schemas past the retention window.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use thiserror::Error;

use super::extract::{ExtractError, Extractor};
use super::load::{self, LoadError};
use super::status::{EtlField, EtlState};
use crate::core::config::EtlConfig;
use crate::core::constants::SCHEMA_PREFIX;
use crate::data::DataError;
use crate::data::traits::{EtlRepository, ExportStore, Warehouse};
use crate::domain::profiles::{Profile, ProfileRegistry};

pub const CRASH_MESSAGE: &str = "Server crashed during ETL";

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("An ETL run is already in progress")]
    AlreadyRunning,

    #[error("ETL status changed concurrently (expected {expected})")]
    StateConflict { expected: EtlState },

    #[error("Extract failed for {profile}: {source}")]
    Extract {
        profile: String,
        #[source]
        source: ExtractError,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Settings the rotation manager needs from configuration
#[derive(Debug, Clone)]
pub struct RotationSettings {
    pub max_chunks: u64,
    pub retention: chrono::Duration,
    pub query_role: String,
}

impl RotationSettings {
    pub fn from_config(config: &EtlConfig, query_role: &str) -> Self {
        Self {
            max_chunks: config.max_chunks,
            retention: chrono::Duration::days(
                i64::try_from(config.schema_retention_days).unwrap_or(i64::MAX / 86_400),
            ),
            query_role: query_role.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLoad {
    pub profile: String,
    pub chunks: u64,
    pub rows: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub schema: String,
    pub loads: Vec<ProfileLoad>,
    pub dropped_schemas: Vec<String>,
    pub pruned_exports: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub failed_fields: Vec<EtlField>,
    pub failed_logs: u64,
}

/// Schema name for a run started at `now`
pub fn schema_name(now: DateTime<Utc>) -> String {
    format!("{}{}", SCHEMA_PREFIX, now.timestamp_millis())
}

pub struct RotationManager {
    profiles: Arc<ProfileRegistry>,
    repo: Arc<dyn EtlRepository>,
    warehouse: Arc<dyn Warehouse>,
    exports: Arc<dyn ExportStore>,
    extractor: Arc<dyn Extractor>,
    settings: RotationSettings,
}

impl RotationManager {
    pub fn new(
        profiles: Arc<ProfileRegistry>,
        repo: Arc<dyn EtlRepository>,
        warehouse: Arc<dyn Warehouse>,
        exports: Arc<dyn ExportStore>,
        extractor: Arc<dyn Extractor>,
        settings: RotationSettings,
    ) -> Self {
        Self {
            profiles,
            repo,
            warehouse,
            exports,
            extractor,
            settings,
        }
    }

    /// Run one full extract-load-rotate cycle
    pub async fn run_job(&self) -> Result<RunSummary, EtlError> {
        self.enter_running().await?;

        let started = Utc::now();
        let log_id = match self.repo.start_log(started).await {
            Ok(id) => id,
            Err(e) => {
                self.leave_running(EtlState::Failed).await;
                return Err(e.into());
            }
        };
        let schema = schema_name(started);
        tracing::info!(%schema, "ETL run started");

        match self.rotate(&schema, started).await {
            Ok(summary) => {
                if let Err(e) = self.repo.finish_log(log_id, Utc::now()).await {
                    tracing::warn!(error = %e, "Failed to record ETL end time");
                }
                self.leave_running(EtlState::Success).await;
                tracing::info!(
                    %schema,
                    profiles = summary.loads.len(),
                    dropped = summary.dropped_schemas.len(),
                    "ETL run complete"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(%schema, error = %e, "ETL run failed");
                if let Err(log_err) = self.repo.fail_log(log_id, &e.to_string()).await {
                    tracing::warn!(error = %log_err, "Failed to record ETL error");
                }
                self.leave_running(EtlState::Failed).await;
                Err(e)
            }
        }
    }

    /// Move any field left `running` by a dead process to `failed`
    pub async fn recover_from_crash(&self) -> Result<RecoveryReport, EtlError> {
        let status = self.repo.etl_status().await?;
        let mut report = RecoveryReport::default();

        for field in EtlField::ALL {
            let state = match field {
                EtlField::Database => status.database,
                EtlField::Glossary => status.glossary,
                EtlField::DomainValues => status.domain_values,
            };
            if state == EtlState::Running
                && self
                    .repo
                    .transition(field, EtlState::Running, EtlState::Failed)
                    .await?
            {
                report.failed_fields.push(field);
            }
        }

        report.failed_logs = self.repo.fail_unfinished_logs(CRASH_MESSAGE).await?;
        if !report.failed_fields.is_empty() || report.failed_logs > 0 {
            tracing::warn!(
                fields = ?report.failed_fields,
                logs = report.failed_logs,
                "Recovered from interrupted ETL run"
            );
        }
        Ok(report)
    }

    async fn enter_running(&self) -> Result<(), EtlError> {
        let mut current = self.repo.etl_status().await?.database;
        let path = current.path_to_running().ok_or(EtlError::AlreadyRunning)?;

        for &next in path {
            if !self
                .repo
                .transition(EtlField::Database, current, next)
                .await?
            {
                return Err(if next == EtlState::Running {
                    EtlError::AlreadyRunning
                } else {
                    EtlError::StateConflict { expected: current }
                });
            }
            current = next;
        }
        Ok(())
    }

    async fn leave_running(&self, to: EtlState) {
        match self
            .repo
            .transition(EtlField::Database, EtlState::Running, to)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(state = %to, "ETL status was no longer running"),
            Err(e) => tracing::error!(state = %to, error = %e, "Failed to record ETL status"),
        }
    }

    async fn rotate(&self, schema: &str, started: DateTime<Utc>) -> Result<RunSummary, EtlError> {
        self.warehouse.execute(&load::create_schema_sql(schema)).await?;
        let schema_id = self.repo.insert_schema(schema, started).await?;

        let loads = match try_join_all(
            self.profiles
                .iter()
                .map(|profile| self.load_profile(schema, profile)),
        )
        .await
        {
            Ok(loads) => loads,
            Err(e) => {
                self.discard_schema(schema, schema_id).await;
                return Err(e);
            }
        };

        self.warehouse
            .grant_read(schema, &self.settings.query_role)
            .await?;

        let previous = self
            .repo
            .list_schemas()
            .await?
            .into_iter()
            .find(|s| s.active && s.id != schema_id);
        self.repo.activate_schema(schema_id).await?;
        tracing::info!(%schema, "Schema activated");

        if let Some(previous) = &previous
            && self.exports.archive_latest(&previous.schema_name).await?
        {
            tracing::debug!(archive = %previous.schema_name, "Archived national downloads");
        }
        if self.exports.promote_new().await? {
            tracing::debug!("Promoted new national downloads");
        }

        let dropped_schemas = self.trim_schemas(schema_id).await?;
        let keep: HashSet<String> = self
            .repo
            .list_schemas()
            .await?
            .into_iter()
            .map(|s| s.schema_name)
            .collect();
        let pruned_exports = self.exports.prune(&keep).await?;

        Ok(RunSummary {
            schema: schema.to_string(),
            loads,
            dropped_schemas,
            pruned_exports,
        })
    }

    async fn load_profile(&self, schema: &str, profile: &Profile) -> Result<ProfileLoad, EtlError> {
        self.warehouse
            .execute(&load::drop_table_sql(profile, schema))
            .await?;
        self.warehouse
            .execute(&load::create_table_sql(profile, schema))
            .await?;
        self.warehouse
            .execute(&load::set_logged_sql(profile, schema, false))
            .await?;

        let mut cursor = 0;
        let mut chunks = 0;
        let mut rows = 0;
        loop {
            if chunks >= self.settings.max_chunks {
                tracing::warn!(profile = %profile.id, chunks, "Chunk limit reached");
                break;
            }
            let page = self
                .extractor
                .extract(profile, cursor)
                .await
                .map_err(|source| EtlError::Extract {
                    profile: profile.id.clone(),
                    source,
                })?;
            let Some(data) = page.data else {
                break;
            };

            let batch = load::transform(profile, schema, &data)?;
            rows += self.warehouse.insert(&batch).await?;
            chunks += 1;
            cursor = page.next_cursor;
            tracing::debug!(profile = %profile.id, %schema, chunk = chunks, rows, "Loaded chunk");
        }

        self.warehouse
            .execute(&load::set_logged_sql(profile, schema, true))
            .await?;
        for view in profile.materialized_views() {
            self.warehouse
                .execute(&load::materialized_view_sql(profile, schema, view))
                .await?;
        }
        for view in profile.views() {
            if let Some(sql) = load::view_sql(schema, view) {
                self.warehouse.execute(&sql).await?;
            }
        }

        tracing::info!(profile = %profile.id, %schema, chunks, rows, "Profile loaded");
        Ok(ProfileLoad {
            profile: profile.id.clone(),
            chunks,
            rows,
        })
    }

    async fn discard_schema(&self, schema: &str, schema_id: i32) {
        if let Err(e) = self.warehouse.execute(&load::drop_schema_sql(schema)).await {
            tracing::warn!(%schema, error = %e, "Failed to drop incomplete schema");
            return;
        }
        if let Err(e) = self.repo.delete_schema_row(schema_id).await {
            tracing::warn!(%schema, error = %e, "Failed to delete incomplete schema row");
        }
    }

    /// Drop inactive schemas older than the retention window
    async fn trim_schemas(&self, active_id: i32) -> Result<Vec<String>, EtlError> {
        let cutoff = Utc::now() - self.settings.retention;
        let mut dropped = Vec::new();
        for row in self.repo.list_schemas().await? {
            if row.id == active_id || row.active || row.creation_date >= cutoff {
                continue;
            }
            self.warehouse
                .execute(&load::drop_schema_sql(&row.schema_name))
                .await?;
            self.repo.delete_schema_row(row.id).await?;
            tracing::debug!(schema = %row.schema_name, "Dropped expired schema");
            dropped.push(row.schema_name);
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::{MemoryExtractor, MemoryStore};
    use crate::data::types::SchemaRow;
    use serde_json::json;

    const PROFILES: &str = r#"{
      "profiles": [
        {
          "id": "alpha",
          "tableName": "alpha",
          "idColumn": "objectid",
          "source": { "kind": "offset", "path": "profile_alpha" },
          "columns": [
            { "name": "objectid", "alias": "objectId", "type": "integer", "nullable": false },
            { "name": "organizationid", "alias": "organizationId", "type": "text", "nullable": false },
            { "name": "state", "alias": "state", "type": "text" }
          ],
          "materializedViews": [
            { "name": "alpha_states", "columns": ["state"] }
          ]
        },
        {
          "id": "beta",
          "tableName": "beta",
          "idColumn": "objectid",
          "source": { "kind": "watermark" },
          "columns": [
            { "name": "objectid", "alias": "objectId", "type": "integer", "nullable": false },
            { "name": "size", "alias": "size", "type": "numeric" }
          ]
        }
      ]
    }"#;

    fn rows(value: serde_json::Value) -> Vec<crate::data::types::Row> {
        serde_json::from_value(value).unwrap()
    }

    fn manager(
        store: &Arc<MemoryStore>,
        extractor: MemoryExtractor,
        max_chunks: u64,
    ) -> RotationManager {
        RotationManager::new(
            Arc::new(ProfileRegistry::from_json(PROFILES).unwrap()),
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(extractor),
            RotationSettings {
                max_chunks,
                retention: chrono::Duration::days(2),
                query_role: "eq".into(),
            },
        )
    }

    fn extractor() -> MemoryExtractor {
        MemoryExtractor::default()
            .with_pages(
                "alpha",
                vec![
                    rows(json!([{ "objectid": 1, "organizationid": "A", "state": "TX" }])),
                    rows(json!([{ "objectid": 2, "organizationid": "B", "state": "OK" }])),
                ],
            )
            .with_pages("beta", vec![rows(json!([{ "objectid": 1, "size": 4.5 }]))])
    }

    fn old_schema(id: i32, name: &str, active: bool, days_old: i64) -> SchemaRow {
        SchemaRow {
            id,
            schema_name: name.into(),
            creation_date: Utc::now() - chrono::Duration::days(days_old),
            active,
        }
    }

    #[tokio::test]
    async fn test_run_job_rotates_schema() {
        let store = Arc::new(MemoryStore::default());
        store.seed_schema(old_schema(1, "schema_1", false, 10));
        store.seed_schema(old_schema(2, "schema_2", true, 1));
        store.seed_exports(&["latest", "new", "schema_1", "orphan"]);

        let summary = manager(&store, extractor(), 100).run_job().await.unwrap();

        assert!(summary.schema.starts_with("schema_"));
        assert_eq!(
            summary.loads,
            vec![
                ProfileLoad { profile: "alpha".into(), chunks: 2, rows: 2 },
                ProfileLoad { profile: "beta".into(), chunks: 1, rows: 1 },
            ]
        );
        assert_eq!(summary.dropped_schemas, vec!["schema_1".to_string()]);

        let state = store.snapshot();
        assert_eq!(state.status.database, EtlState::Success);
        let active: Vec<_> = state.schemas.iter().filter(|s| s.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].schema_name, summary.schema);
        assert!(state.grants.contains(&(summary.schema.clone(), "eq".to_string())));

        // outgoing "latest" archived under the previous active schema, "new" promoted
        assert!(state.export_dirs.contains(&"schema_2".to_string()));
        assert!(state.export_dirs.contains(&"latest".to_string()));
        assert!(!state.export_dirs.contains(&"new".to_string()));
        assert!(!state.export_dirs.contains(&"orphan".to_string()));
        assert!(!state.export_dirs.contains(&"schema_1".to_string()));

        assert!(state.logs[0].end_time.is_some());
        assert!(state.logs[0].load_error.is_none());

        let statements = state.statements.join("\n");
        assert!(statements.contains("SET UNLOGGED"));
        assert!(statements.contains("SET LOGGED"));
        assert!(statements.contains("CREATE MATERIALIZED VIEW"));
        assert!(statements.contains("DROP SCHEMA IF EXISTS \"schema_1\" CASCADE"));
    }

    #[tokio::test]
    async fn test_run_job_rejects_concurrent_run() {
        let store = Arc::new(MemoryStore::default());
        store.set_database_state(EtlState::Running);

        let err = manager(&store, extractor(), 100).run_job().await.unwrap_err();
        assert!(matches!(err, EtlError::AlreadyRunning));
        assert!(store.snapshot().schemas.is_empty());
        assert_eq!(store.snapshot().status.database, EtlState::Running);
    }

    #[tokio::test]
    async fn test_run_job_leaves_live_lock_and_log_alone() {
        let store = Arc::new(MemoryStore::default());
        store.set_database_state(EtlState::Running);
        store.seed_unfinished_log();

        let err = manager(&store, extractor(), 100).run_job().await.unwrap_err();
        assert!(matches!(err, EtlError::AlreadyRunning));
        let state = store.snapshot();
        assert_eq!(state.status.database, EtlState::Running);
        assert_eq!(state.logs.len(), 1);
        assert!(state.logs[0].end_time.is_none());
        assert!(state.logs[0].load_error.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_see_one_active_schema_during_activation() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let store = Arc::new(MemoryStore::default());
        store.seed_schema(old_schema(1, "schema_1", true, 1));
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let store = store.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut reads = 0u64;
                loop {
                    let schemas = store.list_schemas().await.unwrap();
                    let active = schemas.iter().filter(|s| s.active).count();
                    assert_eq!(active, 1, "reader saw {} active schemas", active);
                    reads += 1;
                    if done.load(Ordering::Acquire) {
                        return reads;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let summary = manager(&store, extractor(), 100).run_job().await.unwrap();
        done.store(true, Ordering::Release);
        assert!(reader.await.unwrap() > 0);

        let schemas = store.list_schemas().await.unwrap();
        let active: Vec<_> = schemas.iter().filter(|s| s.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].schema_name, summary.schema);
        assert_eq!(schemas[0].schema_name, summary.schema);
    }

    #[tokio::test]
    async fn test_run_job_after_failure_passes_through_idle() {
        let store = Arc::new(MemoryStore::default());
        store.set_database_state(EtlState::Failed);

        manager(&store, extractor(), 100).run_job().await.unwrap();
        let state = store.snapshot();
        assert_eq!(state.status.database, EtlState::Success);
        assert_eq!(
            state.transitions,
            vec![
                (EtlState::Failed, EtlState::Idle),
                (EtlState::Idle, EtlState::Running),
                (EtlState::Running, EtlState::Success),
            ]
        );
    }

    #[tokio::test]
    async fn test_profile_failure_aborts_run() {
        let store = Arc::new(MemoryStore::default());
        store.seed_schema(old_schema(1, "schema_1", true, 1));

        let err = manager(&store, extractor().failing("beta"), 100)
            .run_job()
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Extract { ref profile, .. } if profile == "beta"));

        let state = store.snapshot();
        assert_eq!(state.status.database, EtlState::Failed);
        assert!(state.logs[0].load_error.as_deref().unwrap().contains("Retry count exceeded"));
        // previous schema stays active, the partial one is gone
        assert_eq!(state.schemas.len(), 1);
        assert!(state.schemas[0].active);
        assert_eq!(state.schemas[0].schema_name, "schema_1");
    }

    #[tokio::test]
    async fn test_malformed_rows_fail_run() {
        let store = Arc::new(MemoryStore::default());
        let extractor = MemoryExtractor::default()
            .with_pages("alpha", vec![rows(json!([{ "state": "TX" }]))]);

        let err = manager(&store, extractor, 100).run_job().await.unwrap_err();
        assert!(matches!(err, EtlError::Load(LoadError::MissingValue { .. })));
        assert_eq!(store.snapshot().status.database, EtlState::Failed);
    }

    #[tokio::test]
    async fn test_max_chunks_caps_extraction() {
        let store = Arc::new(MemoryStore::default());
        let summary = manager(&store, extractor(), 1).run_job().await.unwrap();
        assert_eq!(summary.loads[0].chunks, 1);
        assert_eq!(summary.loads[0].rows, 1);
    }

    #[tokio::test]
    async fn test_recover_from_crash() {
        let store = Arc::new(MemoryStore::default());
        store.set_database_state(EtlState::Running);
        store.seed_unfinished_log();

        let report = manager(&store, extractor(), 100)
            .recover_from_crash()
            .await
            .unwrap();
        assert_eq!(report.failed_fields, vec![EtlField::Database]);
        assert_eq!(report.failed_logs, 1);

        let state = store.snapshot();
        assert_eq!(state.status.database, EtlState::Failed);
        assert_eq!(state.logs[0].load_error.as_deref(), Some(CRASH_MESSAGE));
    }

    #[test]
    fn test_schema_name() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(schema_name(now), "schema_1700000000123");
    }
}
