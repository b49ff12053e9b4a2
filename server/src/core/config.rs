use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::cli::CliConfig;
use super::constants::{
    CONFIG_FILE_NAME, DEFAULT_CHUNK_SIZE, DEFAULT_CONTENT_DIR, DEFAULT_ETL_INTERVAL_MINUTES,
    DEFAULT_GIS_CHUNK_SIZE, DEFAULT_GIS_URL, DEFAULT_HOST, DEFAULT_JSON_PAGE_SIZE,
    DEFAULT_MATERIALIZED_VIEWS_URL, DEFAULT_MAX_CHUNKS, DEFAULT_MAX_PAGE_SIZE,
    DEFAULT_MAX_QUERY_SIZE, DEFAULT_MAX_VALUES_LIMIT, DEFAULT_PORT, DEFAULT_RETRY_INTERVAL_SECS,
    DEFAULT_RETRY_LIMIT, DEFAULT_SCHEMA_RETENTION_DAYS, DEFAULT_SERVER_URL,
    DEFAULT_STREAM_HIGH_WATER_MARK, DEFAULT_WEB_SERVICE_TIMEOUT_SECS,
    POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS, POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS,
    POSTGRES_DEFAULT_MAX_CONNECTIONS, POSTGRES_DEFAULT_MAX_LIFETIME_SECS,
    POSTGRES_DEFAULT_MIN_CONNECTIONS, POSTGRES_DEFAULT_QUERY_ROLE,
    POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS, POSTGRES_DEFAULT_URL,
};

// =============================================================================
// Retry Backoff Enum
// =============================================================================

/// Delay growth between upstream retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Same delay before every attempt
    #[default]
    Fixed,
    /// Delay doubles after every failed attempt
    Exponential,
}

impl fmt::Display for RetryBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryBackoff::Fixed => write!(f, "fixed"),
            RetryBackoff::Exponential => write!(f, "exponential"),
        }
    }
}

// =============================================================================
// File Config Structures (JSON)
// =============================================================================

/// Server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub server_url: Option<String>,
    pub api_key: Option<String>,
}

/// PostgreSQL configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PostgresFileConfig {
    /// PostgreSQL connection URL (or use EXPERTQ_POSTGRES_URL env var)
    pub url: Option<String>,
    /// Maximum number of connections in the pool (default: 20)
    pub max_connections: Option<u32>,
    /// Minimum number of connections to keep warm (default: 2)
    pub min_connections: Option<u32>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Idle connection timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Max connection lifetime in seconds (default: 1800)
    pub max_lifetime_secs: Option<u64>,
    /// Statement timeout in seconds, 0 to disable (default: 0)
    pub statement_timeout_secs: Option<u64>,
    /// Role granted USAGE/SELECT on every loaded schema
    pub query_role: Option<String>,
}

/// Query limits section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct QueryFileConfig {
    pub max_query_size: Option<u64>,
    pub json_page_size: Option<u64>,
    pub max_page_size: Option<u64>,
    pub max_values_limit: Option<u64>,
    pub stream_high_water_mark: Option<usize>,
}

/// Upstream service URLs
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServicesFileConfig {
    pub materialized_views: Option<String>,
    pub attains_gis: Option<String>,
}

/// ETL section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct EtlFileConfig {
    pub enabled: Option<bool>,
    pub run_on_start: Option<bool>,
    pub interval_minutes: Option<u64>,
    pub chunk_size: Option<u64>,
    pub gis_chunk_size: Option<u64>,
    pub max_chunks: Option<u64>,
    pub retry_limit: Option<u32>,
    pub retry_interval_seconds: Option<u64>,
    pub retry_backoff: Option<RetryBackoff>,
    pub web_service_timeout_seconds: Option<u64>,
    pub schema_retention_days: Option<u64>,
    pub api_key: Option<String>,
    pub services: Option<ServicesFileConfig>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub postgres: Option<PostgresFileConfig>,
    pub query: Option<QueryFileConfig>,
    pub etl: Option<EtlFileConfig>,
    pub content_dir: Option<PathBuf>,
    pub profiles: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }
}

// =============================================================================
// Final Configuration Structures
// =============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL, referenced by the oversized-query message
    pub server_url: String,
    pub api_key: Option<String>,
}

/// PostgreSQL configuration (final/runtime)
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    /// Statement timeout in seconds (0 = disabled)
    pub statement_timeout_secs: u64,
    pub query_role: String,
}

/// Guards and sizing for the query endpoints
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub max_query_size: u64,
    pub json_page_size: u64,
    pub max_page_size: u64,
    pub max_values_limit: u64,
    pub stream_high_water_mark: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_query_size: DEFAULT_MAX_QUERY_SIZE,
            json_page_size: DEFAULT_JSON_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            max_values_limit: DEFAULT_MAX_VALUES_LIMIT,
            stream_high_water_mark: DEFAULT_STREAM_HIGH_WATER_MARK,
        }
    }
}

/// Upstream request behavior shared by every extract
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub materialized_views_url: String,
    pub gis_url: String,
    pub chunk_size: u64,
    pub gis_chunk_size: u64,
    pub retry_limit: u32,
    pub retry_interval: Duration,
    pub retry_backoff: RetryBackoff,
    pub timeout: Duration,
    pub api_key: Option<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            materialized_views_url: DEFAULT_MATERIALIZED_VIEWS_URL.to_string(),
            gis_url: DEFAULT_GIS_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            gis_chunk_size: DEFAULT_GIS_CHUNK_SIZE,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
            retry_backoff: RetryBackoff::Fixed,
            timeout: Duration::from_secs(DEFAULT_WEB_SERVICE_TIMEOUT_SECS),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub enabled: bool,
    pub run_on_start: bool,
    pub interval_minutes: u64,
    pub max_chunks: u64,
    pub schema_retention_days: u64,
    pub extract: ExtractConfig,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            run_on_start: false,
            interval_minutes: DEFAULT_ETL_INTERVAL_MINUTES,
            max_chunks: DEFAULT_MAX_CHUNKS,
            schema_retention_days: DEFAULT_SCHEMA_RETENTION_DAYS,
            extract: ExtractConfig::default(),
        }
    }
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub query: QueryConfig,
    pub etl: EtlConfig,
    pub content_dir: PathBuf,
    /// Profile definitions override; the built-in set is used when absent
    pub profiles: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Local directory config OR CLI-specified config path
    /// 3. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");

        let file_config = match &cli.config {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                let config = FileConfig::load_from_file(path)?;
                config.warn_unknown_fields();
                config
            }
            None => {
                let local = PathBuf::from(CONFIG_FILE_NAME);
                if local.exists() {
                    let config = FileConfig::load_from_file(&local)?;
                    config.warn_unknown_fields();
                    config
                } else {
                    FileConfig::default()
                }
            }
        };

        let config = Self::from_sources(cli, file_config);
        config.validate()?;
        tracing::debug!(
            host = %config.server.host,
            port = config.server.port,
            etl_enabled = config.etl.enabled,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Layer configs: defaults -> file config -> CLI/env overrides
    fn from_sources(cli: &CliConfig, file_config: FileConfig) -> Self {
        let file_server = file_config.server.unwrap_or_default();
        let file_pg = file_config.postgres.unwrap_or_default();
        let file_query = file_config.query.unwrap_or_default();
        let file_etl = file_config.etl.unwrap_or_default();
        let file_services = file_etl.services.clone().unwrap_or_default();

        let server = ServerConfig {
            host: cli
                .host
                .clone()
                .or(file_server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT),
            server_url: cli
                .server_url
                .clone()
                .or(file_server.server_url)
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            api_key: cli
                .api_key
                .clone()
                .or(file_server.api_key)
                .filter(|k| !k.is_empty()),
        };

        let postgres = PostgresConfig {
            url: cli
                .postgres_url
                .clone()
                .or(file_pg.url)
                .unwrap_or_else(|| POSTGRES_DEFAULT_URL.to_string()),
            max_connections: file_pg
                .max_connections
                .unwrap_or(POSTGRES_DEFAULT_MAX_CONNECTIONS),
            min_connections: file_pg
                .min_connections
                .unwrap_or(POSTGRES_DEFAULT_MIN_CONNECTIONS),
            acquire_timeout_secs: file_pg
                .acquire_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout_secs: file_pg
                .idle_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS),
            max_lifetime_secs: file_pg
                .max_lifetime_secs
                .unwrap_or(POSTGRES_DEFAULT_MAX_LIFETIME_SECS),
            statement_timeout_secs: file_pg
                .statement_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS),
            query_role: cli
                .query_role
                .clone()
                .or(file_pg.query_role)
                .unwrap_or_else(|| POSTGRES_DEFAULT_QUERY_ROLE.to_string()),
        };

        let query = QueryConfig {
            max_query_size: file_query
                .max_query_size
                .unwrap_or(DEFAULT_MAX_QUERY_SIZE),
            json_page_size: file_query
                .json_page_size
                .unwrap_or(DEFAULT_JSON_PAGE_SIZE),
            max_page_size: file_query.max_page_size.unwrap_or(DEFAULT_MAX_PAGE_SIZE),
            max_values_limit: file_query
                .max_values_limit
                .unwrap_or(DEFAULT_MAX_VALUES_LIMIT),
            stream_high_water_mark: file_query
                .stream_high_water_mark
                .unwrap_or(DEFAULT_STREAM_HIGH_WATER_MARK),
        };

        let extract = ExtractConfig {
            materialized_views_url: file_services
                .materialized_views
                .unwrap_or_else(|| DEFAULT_MATERIALIZED_VIEWS_URL.to_string()),
            gis_url: file_services
                .attains_gis
                .unwrap_or_else(|| DEFAULT_GIS_URL.to_string()),
            chunk_size: file_etl.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            gis_chunk_size: file_etl.gis_chunk_size.unwrap_or(DEFAULT_GIS_CHUNK_SIZE),
            retry_limit: file_etl.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT),
            retry_interval: Duration::from_secs(
                file_etl
                    .retry_interval_seconds
                    .unwrap_or(DEFAULT_RETRY_INTERVAL_SECS),
            ),
            retry_backoff: file_etl.retry_backoff.unwrap_or_default(),
            timeout: Duration::from_secs(
                file_etl
                    .web_service_timeout_seconds
                    .unwrap_or(DEFAULT_WEB_SERVICE_TIMEOUT_SECS),
            ),
            api_key: cli.extract_api_key.clone().or(file_etl.api_key),
        };

        let etl = EtlConfig {
            enabled: cli.etl_enabled.or(file_etl.enabled).unwrap_or(false),
            run_on_start: cli
                .etl_run_on_start
                .or(file_etl.run_on_start)
                .unwrap_or(false),
            interval_minutes: cli
                .etl_interval_minutes
                .or(file_etl.interval_minutes)
                .unwrap_or(DEFAULT_ETL_INTERVAL_MINUTES),
            max_chunks: file_etl.max_chunks.unwrap_or(DEFAULT_MAX_CHUNKS),
            schema_retention_days: file_etl
                .schema_retention_days
                .unwrap_or(DEFAULT_SCHEMA_RETENTION_DAYS),
            extract,
        };

        Self {
            server,
            postgres,
            query,
            etl,
            content_dir: cli
                .content_dir
                .clone()
                .or(file_config.content_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTENT_DIR)),
            profiles: cli.profiles.clone().or(file_config.profiles),
        }
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }
        if self.query.json_page_size == 0 {
            anyhow::bail!("Configuration error: query.json_page_size must be greater than 0");
        }
        if self.query.json_page_size > self.query.max_page_size {
            anyhow::bail!(
                "Configuration error: query.json_page_size ({}) exceeds query.max_page_size ({})",
                self.query.json_page_size,
                self.query.max_page_size
            );
        }
        if self.etl.extract.chunk_size == 0 || self.etl.extract.gis_chunk_size == 0 {
            anyhow::bail!("Configuration error: etl chunk sizes must be greater than 0");
        }
        if self.etl.enabled && self.etl.interval_minutes == 0 {
            anyhow::bail!("Configuration error: etl.interval_minutes must be greater than 0");
        }
        if self.postgres.query_role.is_empty() {
            anyhow::bail!("Configuration error: postgres.query_role must not be empty");
        }
        Ok(())
    }
}
