/// REST API over the story fork engine
///
/// This module provides:
/// - Routes for seeds, forks, commits, bookmarks, previews and pull requests
/// - Bearer token authentication with optional user credentials
/// - JSON request/response bodies in camelCase
pub mod auth;
pub mod bookmark_handlers;
pub mod fork_handlers;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod preview_handlers;
pub mod pull_request_handlers;
pub mod seed_handlers;
pub mod server;

pub use auth::{AuthService, TokenRequest, TokenResponse};
pub use handlers::AppState;
pub use middleware::AuthUser;
pub use models::{ApiError, ErrorResponse};
pub use server::{ApiConfig, ApiServer};
