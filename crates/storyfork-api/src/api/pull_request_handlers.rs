/// Pull request workflow endpoints
use crate::api::handlers::AppState;
use crate::api::middleware::AuthUser;
use crate::api::models::{
    ApiError, ApiResult, CreatePullRequestRequest, UpdatePullRequestStatusRequest,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use storyfork_config::types::{PullRequest, PullRequestStatus};

pub async fn create_pull_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(seed_id): Path<i64>,
    Json(request): Json<CreatePullRequestRequest>,
) -> ApiResult<(StatusCode, Json<PullRequest>)> {
    let pull_request = state.engine.create_pull_request(
        &user.username,
        seed_id,
        request.fork_id,
        request.from_commit_id,
        request.title.as_deref(),
        request.description.as_deref(),
    )?;
    Ok((StatusCode::CREATED, Json(pull_request)))
}

pub async fn list_pull_requests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(seed_id): Path<i64>,
) -> ApiResult<Json<Vec<PullRequest>>> {
    Ok(Json(state.engine.list_pull_requests(&user.username, seed_id)?))
}

pub async fn get_pull_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<PullRequest>> {
    Ok(Json(state.engine.get_pull_request(&user.username, id)?))
}

pub async fn update_pull_request_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<UpdatePullRequestStatusRequest>,
) -> ApiResult<Json<PullRequest>> {
    let status: PullRequestStatus = request
        .status
        .parse()
        .map_err(|err| ApiError::bad_request(format!("{err}")))?;
    Ok(Json(
        state
            .engine
            .update_pull_request_status(&user.username, id, status)
            .await?,
    ))
}
