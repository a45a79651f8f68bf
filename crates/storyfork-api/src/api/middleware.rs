/// Bearer token authentication
use crate::api::auth::AuthService;
use crate::api::models::ErrorResponse;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// Caller resolved from the bearer token, available to handlers as an
/// `Extension`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub username: String,
}

fn unauthenticated(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("unauthenticated", message)),
    )
        .into_response()
}

/// Reject requests without a valid `Authorization: Bearer` header.
pub async fn require_auth(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let Some(bearer) = bearer else {
        return unauthenticated("missing bearer token");
    };
    let Some(username) = auth.authenticate(bearer) else {
        return unauthenticated("invalid or expired token");
    };
    request.extensions_mut().insert(AuthUser { username });
    next.run(request).await
}
