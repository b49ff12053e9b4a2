//! In-memory storage fakes for unit tests
//!
//! `MemoryStore` implements every storage trait over one mutex-guarded state so
//! tests can drive the ETL and the HTTP handlers and then inspect what happened.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;

use super::error::DataError;
use super::traits::{EtlRepository, ExportStore, QueryStore, RowStream, Warehouse};
use super::types::{EtlStatusRow, Row, SchemaRow};
use crate::core::constants::{EXPORT_LATEST_DIR, EXPORT_NEW_DIR};
use crate::domain::etl::extract::{ExtractError, ExtractPage, Extractor};
use crate::domain::etl::load::BulkInsert;
use crate::domain::etl::{EtlField, EtlState};
use crate::domain::profiles::Profile;
use crate::domain::query::SqlQuery;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub load_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub status: EtlStatusRow,
    pub transitions: Vec<(EtlState, EtlState)>,
    pub logs: Vec<LogEntry>,
    pub schemas: Vec<SchemaRow>,
    pub statements: Vec<String>,
    pub inserted_rows: u64,
    pub grants: Vec<(String, String)>,
    pub export_dirs: Vec<String>,
    pub queries: Vec<SqlQuery>,
    pub count: i64,
    pub rows: Vec<Row>,
    pub stream_error: Option<String>,
    pub populated: HashMap<String, bool>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn snapshot(&self) -> MemoryState {
        self.state.lock().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut MemoryState)) {
        f(&mut self.state.lock());
    }

    pub fn set_database_state(&self, state: EtlState) {
        self.update(|s| s.status.database = state);
    }

    pub fn seed_schema(&self, row: SchemaRow) {
        self.update(|s| s.schemas.push(row));
    }

    pub fn seed_exports(&self, dirs: &[&str]) {
        self.update(|s| s.export_dirs.extend(dirs.iter().map(|d| d.to_string())));
    }

    pub fn seed_unfinished_log(&self) {
        self.update(|s| {
            let id = s.logs.len() as i32 + 1;
            s.logs.push(LogEntry {
                id,
                start_time: Utc::now(),
                end_time: None,
                load_error: None,
            });
        });
    }

    /// Active schema plus canned query results
    pub fn with_results(schema: &str, count: i64, rows: Vec<Row>) -> Self {
        let store = Self::default();
        store.update(|s| {
            s.schemas.push(SchemaRow {
                id: 1,
                schema_name: schema.to_string(),
                creation_date: Utc::now(),
                active: true,
            });
            s.count = count;
            s.rows = rows;
        });
        store
    }

    fn status_field(status: &mut EtlStatusRow, field: EtlField) -> &mut EtlState {
        match field {
            EtlField::Database => &mut status.database,
            EtlField::Glossary => &mut status.glossary,
            EtlField::DomainValues => &mut status.domain_values,
        }
    }
}

#[async_trait]
impl EtlRepository for MemoryStore {
    async fn etl_status(&self) -> Result<EtlStatusRow, DataError> {
        Ok(self.state.lock().status)
    }

    async fn transition(
        &self,
        field: EtlField,
        from: EtlState,
        to: EtlState,
    ) -> Result<bool, DataError> {
        let mut state = self.state.lock();
        let current = Self::status_field(&mut state.status, field);
        if *current != from {
            return Ok(false);
        }
        *current = to;
        state.transitions.push((from, to));
        Ok(true)
    }

    async fn start_log(&self, start_time: DateTime<Utc>) -> Result<i32, DataError> {
        let mut state = self.state.lock();
        let id = state.logs.len() as i32 + 1;
        state.logs.push(LogEntry {
            id,
            start_time,
            end_time: None,
            load_error: None,
        });
        Ok(id)
    }

    async fn finish_log(&self, id: i32, end_time: DateTime<Utc>) -> Result<(), DataError> {
        let mut state = self.state.lock();
        if let Some(log) = state.logs.iter_mut().find(|l| l.id == id) {
            log.end_time = Some(end_time);
        }
        Ok(())
    }

    async fn fail_log(&self, id: i32, error: &str) -> Result<(), DataError> {
        let mut state = self.state.lock();
        if let Some(log) = state.logs.iter_mut().find(|l| l.id == id) {
            log.end_time = Some(Utc::now());
            log.load_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn fail_unfinished_logs(&self, error: &str) -> Result<u64, DataError> {
        let mut state = self.state.lock();
        let mut failed = 0;
        for log in state
            .logs
            .iter_mut()
            .filter(|l| l.end_time.is_none() && l.load_error.is_none())
        {
            log.end_time = Some(Utc::now());
            log.load_error = Some(error.to_string());
            failed += 1;
        }
        Ok(failed)
    }

    async fn insert_schema(
        &self,
        schema_name: &str,
        creation_date: DateTime<Utc>,
    ) -> Result<i32, DataError> {
        let mut state = self.state.lock();
        let id = state.schemas.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        state.schemas.push(SchemaRow {
            id,
            schema_name: schema_name.to_string(),
            creation_date,
            active: false,
        });
        Ok(id)
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaRow>, DataError> {
        let mut schemas = self.state.lock().schemas.clone();
        schemas.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
        Ok(schemas)
    }

    async fn activate_schema(&self, id: i32) -> Result<(), DataError> {
        let mut state = self.state.lock();
        if !state.schemas.iter().any(|s| s.id == id) {
            return Err(DataError::Conflict(format!("schema {} not found", id)));
        }
        for schema in &mut state.schemas {
            schema.active = schema.id == id;
        }
        Ok(())
    }

    async fn delete_schema_row(&self, id: i32) -> Result<(), DataError> {
        self.state.lock().schemas.retain(|s| s.id != id);
        Ok(())
    }
}

#[async_trait]
impl Warehouse for MemoryStore {
    async fn execute(&self, statement: &str) -> Result<(), DataError> {
        self.state
            .lock()
            .statements
            .push(statement.to_string());
        Ok(())
    }

    async fn insert(&self, batch: &BulkInsert) -> Result<u64, DataError> {
        let mut state = self.state.lock();
        state.statements.push(batch.sql.clone());
        state.inserted_rows += batch.row_count as u64;
        Ok(batch.row_count as u64)
    }

    async fn grant_read(&self, schema: &str, role: &str) -> Result<(), DataError> {
        self.state
            .lock()
            .grants
            .push((schema.to_string(), role.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ExportStore for MemoryStore {
    async fn archive_latest(&self, name: &str) -> Result<bool, DataError> {
        let mut state = self.state.lock();
        match state.export_dirs.iter().position(|d| d == EXPORT_LATEST_DIR) {
            Some(i) => {
                state.export_dirs[i] = name.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn promote_new(&self) -> Result<bool, DataError> {
        let mut state = self.state.lock();
        match state.export_dirs.iter().position(|d| d == EXPORT_NEW_DIR) {
            Some(i) => {
                state.export_dirs[i] = EXPORT_LATEST_DIR.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn prune(&self, keep: &HashSet<String>) -> Result<Vec<String>, DataError> {
        let mut state = self.state.lock();
        let (kept, pruned): (Vec<String>, Vec<String>) =
            state.export_dirs.drain(..).partition(|d| {
                d == EXPORT_LATEST_DIR || d == EXPORT_NEW_DIR || keep.contains(d)
            });
        state.export_dirs = kept;
        Ok(pruned)
    }
}

#[async_trait]
impl QueryStore for MemoryStore {
    async fn active_schema(&self) -> Result<Option<SchemaRow>, DataError> {
        Ok(self
            .state
            .lock()
            .schemas
            .iter()
            .find(|s| s.active)
            .cloned())
    }

    async fn fetch_count(&self, query: &SqlQuery) -> Result<i64, DataError> {
        let mut state = self.state.lock();
        state.queries.push(query.clone());
        Ok(state.count)
    }

    async fn fetch_rows(&self, query: &SqlQuery) -> Result<Vec<Row>, DataError> {
        let mut state = self.state.lock();
        state.queries.push(query.clone());
        Ok(state.rows.clone())
    }

    async fn stream_rows(&self, query: SqlQuery) -> Result<RowStream, DataError> {
        let mut state = self.state.lock();
        state.queries.push(query);
        let mut items: Vec<Result<Row, DataError>> = state.rows.iter().cloned().map(Ok).collect();
        if let Some(message) = &state.stream_error {
            items.push(Err(DataError::Decode(message.clone())));
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn has_rows(&self, _schema: &str, table: &str) -> Result<bool, DataError> {
        Ok(self
            .state
            .lock()
            .populated
            .get(table)
            .copied()
            .unwrap_or(true))
    }
}

/// Extractor serving canned pages per profile
#[derive(Default)]
pub struct MemoryExtractor {
    pages: HashMap<String, Vec<Vec<Row>>>,
    failing: HashSet<String>,
}

impl MemoryExtractor {
    pub fn with_pages(mut self, profile: &str, pages: Vec<Vec<Row>>) -> Self {
        self.pages.insert(profile.to_string(), pages);
        self
    }

    pub fn failing(mut self, profile: &str) -> Self {
        self.failing.insert(profile.to_string());
        self
    }
}

#[async_trait]
impl Extractor for MemoryExtractor {
    async fn extract(&self, profile: &Profile, cursor: u64) -> Result<ExtractPage, ExtractError> {
        if self.failing.contains(&profile.id) {
            return Err(ExtractError::RetryExceeded {
                attempts: 5,
                last: "Non-200 response".into(),
            });
        }
        let rows = self
            .pages
            .get(&profile.id)
            .and_then(|pages| pages.get(cursor as usize))
            .cloned()
            .unwrap_or_default();
        Ok(ExtractPage::from_rows(rows, cursor, 1))
    }
}
