use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::constants::{
    ENV_API_KEY, ENV_CONFIG, ENV_CONTENT_DIR, ENV_ETL_ENABLED, ENV_ETL_INTERVAL_MINUTES,
    ENV_ETL_RUN_ON_START, ENV_EXTRACT_API_KEY, ENV_HOST, ENV_LOG_JSON, ENV_PORT,
    ENV_POSTGRES_QUERY_ROLE, ENV_POSTGRES_URL, ENV_PROFILES, ENV_SERVER_URL,
};

#[derive(Parser)]
#[command(name = "expertq")]
#[command(version, about = "Water quality expert query service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Path to a profile definitions file (defaults to the built-in set)
    #[arg(long, global = true, env = ENV_PROFILES)]
    pub profiles: Option<PathBuf>,

    /// Public base URL used in bulk download hints
    #[arg(long, global = true, env = ENV_SERVER_URL)]
    pub server_url: Option<String>,

    /// Shared API key required on /api requests
    #[arg(long, global = true, env = ENV_API_KEY, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Directory holding etl content (national downloads, domain values)
    #[arg(long, global = true, env = ENV_CONTENT_DIR)]
    pub content_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = ENV_LOG_JSON)]
    pub log_json: bool,

    /// PostgreSQL connection URL
    #[arg(long, global = true, env = ENV_POSTGRES_URL, hide_env_values = true)]
    pub postgres_url: Option<String>,

    /// Role granted read access to each loaded schema
    #[arg(long, global = true, env = ENV_POSTGRES_QUERY_ROLE)]
    pub query_role: Option<String>,

    /// Enable or disable the scheduled etl
    #[arg(long, global = true, env = ENV_ETL_ENABLED)]
    pub etl_enabled: Option<bool>,

    /// Run the etl once right after startup
    #[arg(long, global = true, env = ENV_ETL_RUN_ON_START)]
    pub etl_run_on_start: Option<bool>,

    /// Minutes between scheduled etl runs
    #[arg(long, global = true, env = ENV_ETL_INTERVAL_MINUTES)]
    pub etl_interval_minutes: Option<u64>,

    /// API key sent to the upstream extract services
    #[arg(long, global = true, env = ENV_EXTRACT_API_KEY, hide_env_values = true)]
    pub extract_api_key: Option<String>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Serve,
    /// ETL maintenance commands
    Etl {
        #[command(subcommand)]
        command: EtlCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum EtlCommands {
    /// Load a fresh schema and promote it, then exit
    Run,
    /// Mark runs left behind by a crashed process as failed
    Recover,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub profiles: Option<PathBuf>,
    pub server_url: Option<String>,
    pub api_key: Option<String>,
    pub content_dir: Option<PathBuf>,
    pub log_json: bool,
    pub postgres_url: Option<String>,
    pub query_role: Option<String>,
    pub etl_enabled: Option<bool>,
    pub etl_run_on_start: Option<bool>,
    pub etl_interval_minutes: Option<u64>,
    pub extract_api_key: Option<String>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        profiles: cli.profiles,
        server_url: cli.server_url,
        api_key: cli.api_key,
        content_dir: cli.content_dir,
        log_json: cli.log_json,
        postgres_url: cli.postgres_url,
        query_role: cli.query_role,
        etl_enabled: cli.etl_enabled,
        etl_run_on_start: cli.etl_run_on_start,
        etl_interval_minutes: cli.etl_interval_minutes,
        extract_api_key: cli.extract_api_key,
    };
    (config, cli.command)
}
