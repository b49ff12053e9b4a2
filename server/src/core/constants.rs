// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "Expert Query";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "expertq";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "expertq.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "EXPERTQ_CONFIG";

/// Environment variable for the profile definitions file
pub const ENV_PROFILES: &str = "EXPERTQ_PROFILES";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "EXPERTQ_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "EXPERTQ_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "EXPERTQ_LOG";

/// Environment variable to switch logs to JSON lines
pub const ENV_LOG_JSON: &str = "EXPERTQ_LOG_JSON";

/// Public base URL, used in messages that point at bulk downloads
pub const ENV_SERVER_URL: &str = "EXPERTQ_SERVER_URL";

/// Shared API key required on every /api request when set
pub const ENV_API_KEY: &str = "EXPERTQ_API_KEY";

/// Directory holding etl content (national downloads, domain values, glossary)
pub const ENV_CONTENT_DIR: &str = "EXPERTQ_CONTENT_DIR";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 3002;

/// Default public base URL
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

/// Default content directory
pub const DEFAULT_CONTENT_DIR: &str = "content-etl";

/// Request body limit (query and values bodies are small JSON documents)
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Header carrying the shared API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// UI origins allowed to call the values and health endpoints
pub const PRIVATE_ALLOWED_ORIGINS: &[&str] = &[
    "https://owapps-dev.app.cloud.gov",
    "https://owapps-stage.app.cloud.gov",
    "https://owapps.app.cloud.gov",
    "https://owapps.epa.gov",
];

// =============================================================================
// PostgreSQL
// =============================================================================

/// Environment variable for the PostgreSQL connection URL
pub const ENV_POSTGRES_URL: &str = "EXPERTQ_POSTGRES_URL";

/// Environment variable for the role granted read access to loaded schemas
pub const ENV_POSTGRES_QUERY_ROLE: &str = "EXPERTQ_POSTGRES_QUERY_ROLE";

pub const POSTGRES_DEFAULT_URL: &str = "postgres://localhost:5432/expert_query";
pub const POSTGRES_DEFAULT_MAX_CONNECTIONS: u32 = 20;
pub const POSTGRES_DEFAULT_MIN_CONNECTIONS: u32 = 2;
pub const POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const POSTGRES_DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;
pub const POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 0;
pub const POSTGRES_DEFAULT_QUERY_ROLE: &str = "eq";

/// Schema holding the etl control tables
pub const LOGGING_SCHEMA: &str = "logging";

/// Prefix of every schema created by an etl run
pub const SCHEMA_PREFIX: &str = "schema_";

// =============================================================================
// Query Limits
// =============================================================================

/// Rows above which a query is refused in favor of the bulk download
pub const DEFAULT_MAX_QUERY_SIZE: u64 = 1_000_000;

/// Default page size for inline JSON responses
pub const DEFAULT_JSON_PAGE_SIZE: u64 = 20;

/// Largest page size a client may request
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 500;

/// Largest limit accepted by the values endpoint
pub const DEFAULT_MAX_VALUES_LIMIT: u64 = 1_000;

/// Bytes buffered before a chunk is handed to the response body
pub const DEFAULT_STREAM_HIGH_WATER_MARK: usize = 16 * 1024;

/// Bounded channel depth between the row stream and the spreadsheet writer
pub const XLSX_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// ETL
// =============================================================================

pub const ENV_ETL_ENABLED: &str = "EXPERTQ_ETL_ENABLED";
pub const ENV_ETL_INTERVAL_MINUTES: &str = "EXPERTQ_ETL_INTERVAL_MINUTES";
pub const ENV_ETL_RUN_ON_START: &str = "EXPERTQ_ETL_RUN_ON_START";
pub const ENV_EXTRACT_API_KEY: &str = "EXPERTQ_EXTRACT_API_KEY";

pub const DEFAULT_ETL_INTERVAL_MINUTES: u64 = 30;
pub const DEFAULT_CHUNK_SIZE: u64 = 5_000;
pub const DEFAULT_GIS_CHUNK_SIZE: u64 = 2_000;
pub const DEFAULT_MAX_CHUNKS: u64 = 10_000;
pub const DEFAULT_RETRY_LIMIT: u32 = 5;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_WEB_SERVICE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SCHEMA_RETENTION_DAYS: u64 = 2;
pub const DEFAULT_MATERIALIZED_VIEWS_URL: &str =
    "https://attains.epa.gov/attains-public/api/expert-query";
pub const DEFAULT_GIS_URL: &str =
    "https://gispub.epa.gov/arcgis/rest/services/OW/ATTAINS_Assessment/MapServer/3";

/// Content subdirectory with the bulk export archives
pub const NATIONAL_DOWNLOADS_DIR: &str = "national-downloads";

/// Export directory being prepared by the current run
pub const EXPORT_NEW_DIR: &str = "new";

/// Export directory served to clients
pub const EXPORT_LATEST_DIR: &str = "latest";

/// Content subdirectory with domain value files
pub const DOMAIN_VALUES_DIR: &str = "domainValues";

/// Glossary file within the content directory
pub const GLOSSARY_FILE: &str = "glossary.json";

/// Age after which health checks report stale content
pub const HEALTH_MAX_AGE_HOURS: i64 = 169;

// =============================================================================
// Shutdown
// =============================================================================

/// Timeout for graceful shutdown of background tasks
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
