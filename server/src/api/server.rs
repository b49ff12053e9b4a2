//! API server initialization

use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use super::middleware::{self, AllowedOrigins, ApiKeyState, require_api_key};
use super::routes::health::{self, HealthApiState};
use super::routes::query::{self, QueryApiState};
use crate::core::CoreApp;
use crate::core::constants::DEFAULT_BODY_LIMIT;

pub struct ApiServer {
    app: CoreApp,
    allowed_origins: AllowedOrigins,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        let allowed_origins = AllowedOrigins::new(&app.config.server.server_url);
        Self {
            app,
            allowed_origins,
        }
    }

    /// Assemble the `/api` router
    ///
    /// Query and count endpoints accept any origin; values and health
    /// endpoints only the listed UI origins. Every route requires the shared
    /// API key when one is configured.
    pub fn router(&self) -> Router {
        let app = &self.app;
        let query_state = QueryApiState {
            profiles: app.profiles.clone(),
            store: app.database.clone(),
            config: app.config.query.clone(),
            server_url: app.config.server.server_url.clone(),
        };
        let health_state = HealthApiState {
            profiles: app.profiles.clone(),
            etl: app.database.clone(),
            store: app.database.clone(),
            content_dir: app.config.content_dir.clone(),
        };

        let public = query::routes(query_state.clone()).layer(middleware::cors_public());
        let private = query::values_routes(query_state)
            .nest("/health", health::routes(health_state))
            .layer(middleware::cors_private(&self.allowed_origins));

        let api = public
            .merge(private)
            .layer(axum::middleware::from_fn_with_state(
                ApiKeyState::new(app.config.server.api_key.clone()),
                require_api_key,
            ));

        Router::new()
            .nest("/api", api)
            .fallback(middleware::handle_404)
            .layer(CompressionLayer::new())
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
    }

    /// Returns CoreApp for graceful shutdown
    pub async fn start(self) -> Result<CoreApp> {
        let router = self.router();
        let Self { app, .. } = self;

        let shutdown = app.shutdown.clone();
        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.wait())
        .await?;

        Ok(app)
    }
}
