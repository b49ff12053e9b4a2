//! Core application

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::api::ApiServer;
use crate::core::cli::{self, CliConfig, Commands, EtlCommands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME, APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::{FsExportStore, PostgresService};
use crate::domain::etl::{HttpExtractor, RotationManager, RotationSettings};
use crate::domain::profiles::ProfileRegistry;

/// Only the long-lived server and an explicit `etl recover` clear a
/// `running` status; a one-shot `etl run` must still see another process's lock.
fn recovers_on_start(command: Option<&Commands>) -> bool {
    match command {
        Some(Commands::Etl { command }) => matches!(command, EtlCommands::Recover),
        Some(Commands::Serve) | None => true,
    }
}

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub profiles: Arc<ProfileRegistry>,
    pub database: Arc<PostgresService>,
    pub etl: Arc<RotationManager>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();

        let (cli_config, command) = cli::parse();
        Self::init_logging(cli_config.log_json);
        tracing::trace!(command = ?command, "Parsed command");

        let app = Self::init(&cli_config).await?;
        if recovers_on_start(command.as_ref()) {
            Self::recover(&app).await;
        }

        match command {
            Some(Commands::Etl {
                command: EtlCommands::Run,
            }) => {
                let result = app.etl.run_job().await;
                app.database.close().await;
                let summary = result.context("ETL run failed")?;
                for load in &summary.loads {
                    tracing::info!(
                        profile = %load.profile,
                        chunks = load.chunks,
                        rows = load.rows,
                        "Profile loaded"
                    );
                }
                tracing::info!(schema = %summary.schema, "Schema promoted");
                Ok(())
            }
            Some(Commands::Etl {
                command: EtlCommands::Recover,
            }) => {
                app.database.close().await;
                Ok(())
            }
            Some(Commands::Serve) | None => Self::start_server(app).await,
        }
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;

        let profiles = Arc::new(
            ProfileRegistry::load(config.profiles.as_deref())
                .context("Failed to load profile definitions")?,
        );
        tracing::debug!(profiles = profiles.len(), "Profiles loaded");

        let database = Arc::new(
            PostgresService::init(&config.postgres)
                .await
                .context("Failed to initialize PostgreSQL")?,
        );

        let exports = Arc::new(FsExportStore::new(&config.content_dir));
        let extractor = Arc::new(
            HttpExtractor::new(config.etl.extract.clone())
                .context("Failed to build the extract client")?,
        );
        let etl = Arc::new(RotationManager::new(
            profiles.clone(),
            database.clone(),
            database.clone(),
            exports,
            extractor,
            RotationSettings::from_config(&config.etl, &config.postgres.query_role),
        ));

        let shutdown = ShutdownService::new(Some(database.clone()));

        Ok(Self {
            shutdown,
            config,
            profiles,
            database,
            etl,
        })
    }

    /// A previous process may have died mid-run; its status and log rows
    /// are closed out before anything else touches them.
    async fn recover(app: &Self) {
        match app.etl.recover_from_crash().await {
            Ok(report) => tracing::debug!(
                fields = report.failed_fields.len(),
                logs = report.failed_logs,
                "Crash recovery complete"
            ),
            Err(e) => tracing::warn!(error = %e, "Crash recovery failed"),
        }
    }

    fn init_logging(json: bool) {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        if json {
            tracing_subscriber::fmt()
                .json()
                .with_target(false)
                .with_env_filter(filter)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_thread_ids(false)
                .with_level(true)
                .with_ansi(true)
                .compact()
                .with_env_filter(filter)
                .init();
        }
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        app.start_background_tasks().await;

        tracing::info!(
            host = %app.config.server.host,
            port = app.config.server.port,
            etl = app.config.etl.enabled,
            "{} listening",
            APP_NAME
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }

    pub async fn start_background_tasks(&self) {
        self.shutdown
            .register(
                self.database
                    .start_health_check_task(self.shutdown.subscribe()),
            )
            .await;

        if self.config.etl.enabled {
            let period = Duration::from_secs(self.config.etl.interval_minutes * 60);
            self.shutdown
                .register(self.etl.start_etl_task(
                    period,
                    self.config.etl.run_on_start,
                    self.shutdown.subscribe(),
                ))
                .await;
        } else {
            tracing::debug!("Scheduled ETL disabled by config");
        }

        tracing::debug!("Background tasks started");
    }
}
