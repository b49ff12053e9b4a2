//! PostgreSQL schema definitions
//!
//! Only the ETL control tables live here. Profile tables are created per run
//! inside `schema_<millis>` schemas by the loader.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema SQL for PostgreSQL
pub const SCHEMA: &str = r#"
-- =============================================================================
-- Infrastructure: Schema version tracking
-- =============================================================================
CREATE SCHEMA IF NOT EXISTS logging;

CREATE TABLE IF NOT EXISTS logging.schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at BIGINT NOT NULL,
    description TEXT
);

-- =============================================================================
-- 1. ETL run log
-- =============================================================================
CREATE TABLE IF NOT EXISTS logging.etl_log (
    id SERIAL PRIMARY KEY,
    start_time TIMESTAMPTZ NOT NULL,
    end_time TIMESTAMPTZ,
    load_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_etl_log_unfinished
    ON logging.etl_log(id) WHERE end_time IS NULL AND load_error IS NULL;

-- =============================================================================
-- 2. Loaded schemas (at most one active)
-- =============================================================================
CREATE TABLE IF NOT EXISTS logging.etl_schemas (
    id SERIAL PRIMARY KEY,
    schema_name VARCHAR(40) NOT NULL UNIQUE,
    creation_date TIMESTAMPTZ NOT NULL,
    active BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_etl_schemas_single_active
    ON logging.etl_schemas(active) WHERE active;

-- =============================================================================
-- 3. ETL status (singleton)
-- =============================================================================
CREATE TABLE IF NOT EXISTS logging.etl_status (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    database VARCHAR(10) NOT NULL DEFAULT 'idle'
        CHECK (database IN ('idle', 'running', 'success', 'failed')),
    glossary VARCHAR(10) NOT NULL DEFAULT 'idle'
        CHECK (glossary IN ('idle', 'running', 'success', 'failed')),
    domain_values VARCHAR(10) NOT NULL DEFAULT 'idle'
        CHECK (domain_values IN ('idle', 'running', 'success', 'failed'))
);
"#;

/// Seed rows required by the application
pub const DEFAULT_DATA: &str = r#"
INSERT INTO logging.etl_status (id) VALUES (1) ON CONFLICT (id) DO NOTHING;
"#;
