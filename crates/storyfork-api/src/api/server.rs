/// HTTP server
use crate::api::handlers::{generate_token, hash_password, health_check, AppState};
use crate::api::middleware::require_auth;
use crate::api::{
    bookmark_handlers, fork_handlers, preview_handlers, pull_request_handlers, seed_handlers,
};
use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use storyfork_config::config::AppConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

impl ApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            enable_cors: config.server.enable_cors,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Every route of the API. Everything but `/health` and `/auth/*` needs a
/// bearer token.
pub fn build_router(state: AppState, enable_cors: bool) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/auth/token", post(generate_token))
        .route("/auth/hash", post(hash_password));

    let protected_routes = Router::new()
        // Story seeds
        .route("/story-seeds", post(seed_handlers::create_seed))
        .route("/story-seeds/{id}", get(seed_handlers::get_seed))
        .route("/story-seeds/{id}/publish", post(seed_handlers::publish_seed))
        .route(
            "/story-seeds/{id}/chapters",
            get(seed_handlers::list_chapters).post(seed_handlers::append_chapter),
        )
        .route(
            "/story-seeds/{id}/branch-points",
            get(seed_handlers::list_branch_points).post(seed_handlers::create_branch_point),
        )
        .route("/stories/slug/{slug}", get(seed_handlers::get_seed_by_slug))
        // Forks
        .route(
            "/story-seeds/{id}/fork",
            get(fork_handlers::find_fork).post(fork_handlers::create_fork),
        )
        .route(
            "/stories/slug/{slug}/fork",
            post(fork_handlers::create_fork_by_slug),
        )
        .route("/reader-forks/me", get(fork_handlers::list_my_forks))
        .route(
            "/reader-forks/{fork_id}",
            get(fork_handlers::get_fork).delete(fork_handlers::delete_fork),
        )
        .route("/reader-forks/{fork_id}/frontier", get(fork_handlers::frontier))
        .route(
            "/reader-forks/{fork_id}/branch-points/generate",
            post(fork_handlers::generate_branch_point),
        )
        .route("/reader-forks/{fork_id}/commits", get(fork_handlers::list_commits))
        .route("/reader-forks/{fork_id}/choose", post(fork_handlers::choose))
        .route(
            "/reader-forks/{fork_id}/stream-choose",
            post(fork_handlers::stream_choose),
        )
        .route("/reader-forks/{fork_id}/rollback", post(fork_handlers::rollback))
        .route(
            "/reader-forks/{fork_id}/rollback-to-branch-point",
            post(fork_handlers::rollback_to_branch_point),
        )
        .route("/reader-forks/{fork_id}/progress", post(fork_handlers::update_progress))
        // Bookmarks
        .route(
            "/reader-forks/{fork_id}/bookmarks",
            get(bookmark_handlers::list_bookmarks).post(bookmark_handlers::create_bookmark),
        )
        .route(
            "/reader-forks/{fork_id}/bookmarks/{bookmark_id}",
            put(bookmark_handlers::update_bookmark).delete(bookmark_handlers::delete_bookmark),
        )
        // AI previews
        .route(
            "/reader-forks/{fork_id}/ai-preview",
            get(preview_handlers::get_previews)
                .post(preview_handlers::save_preview)
                .delete(preview_handlers::delete_previews),
        )
        .route(
            "/reader-forks/{fork_id}/ai-preview/{chapter_number}",
            axum::routing::delete(preview_handlers::delete_preview_chapter),
        )
        .route(
            "/reader-forks/{fork_id}/ai-preview/{chapter_number}/summary",
            post(preview_handlers::generate_summary),
        )
        .route(
            "/reader-forks/{fork_id}/ai-preview/{chapter_number}/promote",
            post(preview_handlers::promote_preview),
        )
        // Pull requests
        .route(
            "/story-seeds/{id}/pull-requests",
            get(pull_request_handlers::list_pull_requests)
                .post(pull_request_handlers::create_pull_request),
        )
        .route(
            "/story-pull-requests/{id}",
            get(pull_request_handlers::get_pull_request)
                .patch(pull_request_handlers::update_pull_request_status),
        )
        .layer(middleware::from_fn_with_state(
            state.auth_service.clone(),
            require_auth,
        ));

    let mut router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state);

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http())
}

pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), self.config.enable_cors)
    }

    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown_signal` resolves, then drain in-flight requests.
    pub async fn run_with_shutdown(
        self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let app = self.router();
        let bind_addr = self.config.bind_address();
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind {bind_addr}"))?;

        tracing::info!(
            address = %bind_addr,
            auth = self.state.auth_service.is_enabled(),
            "Starting HTTP server"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .context("Server error")?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
