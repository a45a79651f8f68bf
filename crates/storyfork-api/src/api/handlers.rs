/// Shared state plus the health and auth endpoints
use crate::api::auth::{AuthService, TokenRequest, TokenResponse};
use crate::api::models::{ErrorResponse, HealthResponse};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use storyfork_config::config::AppConfig;
use storyfork_core::StoryEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<StoryEngine>,
    pub config: AppConfig,
    pub start_time: Instant,
    pub auth_service: Arc<AuthService>,
}

impl AppState {
    pub fn new(engine: Arc<StoryEngine>, config: AppConfig) -> anyhow::Result<Self> {
        let auth_service = AuthService::from_config(&config.auth)?;
        Ok(Self::with_auth(engine, config, auth_service))
    }

    pub fn with_auth(engine: Arc<StoryEngine>, config: AppConfig, auth_service: AuthService) -> Self {
        Self {
            engine,
            config,
            start_time: Instant::now(),
            auth_service: Arc::new(auth_service),
        }
    }
}

fn auth_disabled() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::new(
            "auth_disabled",
            "Authentication is not enabled on this server",
        )),
    )
        .into_response()
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Exchange username and password for a bearer token
pub async fn generate_token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> Response {
    if !state.auth_service.is_enabled() {
        return auth_disabled();
    }
    if !state
        .auth_service
        .verify_password(&request.username, &request.password)
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "invalid_credentials",
                "Invalid username or password",
            )),
        )
            .into_response();
    }

    match state.auth_service.generate_token(&request.username) {
        Ok(token) => Json(TokenResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_in: state.auth_service.token_expiry_secs(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!("Failed to generate token: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("token_error", "Failed to generate token")),
            )
                .into_response()
        }
    }
}

/// Hash a password for the credentials file
pub async fn hash_password(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if !state.auth_service.is_enabled() {
        return auth_disabled();
    }
    let Some(password) = body.get("password").and_then(|v| v.as_str()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "invalid_input",
                "Missing 'password' field in request body",
            )),
        )
            .into_response();
    };

    match AuthService::hash_password(password) {
        Ok(hash) => Json(json!({ "passwordHash": hash })).into_response(),
        Err(e) => {
            tracing::error!("Failed to hash password: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("hash_error", "Failed to hash password")),
            )
                .into_response()
        }
    }
}
