/// Fork, commit log and frontier endpoints
use crate::api::handlers::AppState;
use crate::api::middleware::AuthUser;
use crate::api::models::{
    optional_json, ApiResult, ChooseRequest, CreateForkRequest, ProgressRequest,
    RollbackRequest, RollbackToBranchPointRequest,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use futures::{Stream, StreamExt};
use storyfork_config::types::{BranchPoint, Commit, InsertOutcome, ReaderFork};
use storyfork_core::engine::{Choice, Frontier};

/// 201 for a new fork, 200 when the caller already had one.
fn fork_created(outcome: InsertOutcome<ReaderFork>) -> (StatusCode, Json<ReaderFork>) {
    let status = if outcome.was_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(outcome.into_inner()))
}

pub async fn create_fork(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(seed_id): Path<i64>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<ReaderFork>)> {
    let request: CreateForkRequest = optional_json(&body)?;
    let outcome =
        state
            .engine
            .create_fork(&user.username, seed_id, request.from_chapter_sort_order)?;
    Ok(fork_created(outcome))
}

pub async fn create_fork_by_slug(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(slug): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<ReaderFork>)> {
    let request: CreateForkRequest = optional_json(&body)?;
    let outcome = state.engine.create_fork_by_slug(
        &user.username,
        &slug,
        request.from_chapter_sort_order,
    )?;
    Ok(fork_created(outcome))
}

/// The caller's fork of a seed, or `null`
pub async fn find_fork(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(seed_id): Path<i64>,
) -> ApiResult<Json<Option<ReaderFork>>> {
    Ok(Json(state.engine.find_fork(&user.username, seed_id)?))
}

pub async fn list_my_forks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<ReaderFork>>> {
    Ok(Json(state.engine.list_forks(&user.username)?))
}

pub async fn get_fork(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
) -> ApiResult<Json<ReaderFork>> {
    Ok(Json(state.engine.get_fork(&user.username, fork_id)?))
}

pub async fn delete_fork(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.engine.delete_fork(&user.username, fork_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn frontier(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
) -> ApiResult<Json<Frontier>> {
    Ok(Json(state.engine.frontier(&user.username, fork_id)?))
}

pub async fn generate_branch_point(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
) -> ApiResult<Json<Vec<BranchPoint>>> {
    Ok(Json(
        state
            .engine
            .generate_branch_point(&user.username, fork_id)
            .await?,
    ))
}

pub async fn list_commits(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
) -> ApiResult<Json<Vec<Commit>>> {
    Ok(Json(state.engine.list_commits(&user.username, fork_id)?))
}

pub async fn choose(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
    Json(request): Json<ChooseRequest>,
) -> ApiResult<(StatusCode, Json<Choice>)> {
    let choice = state
        .engine
        .choose(
            &user.username,
            fork_id,
            request.branch_point_id,
            request.option_id,
            request.expected_version,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(choice)))
}

/// Server-sent events: `chunk` events while the continuation is generated,
/// then one `committed` or `failed` event. Validation failures are plain
/// JSON errors before the stream opens.
pub async fn stream_choose(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
    Json(request): Json<ChooseRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let events = state
        .engine
        .stream_choose(
            &user.username,
            fork_id,
            request.branch_point_id,
            request.option_id,
            request.expected_version,
        )
        .await?;
    let events = events.map(|event| Event::default().event(event.name()).json_data(&event));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub async fn rollback(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
    Json(request): Json<RollbackRequest>,
) -> ApiResult<Json<ReaderFork>> {
    Ok(Json(state.engine.rollback(
        &user.username,
        fork_id,
        request.commit_id,
    )?))
}

pub async fn rollback_to_branch_point(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
    Json(request): Json<RollbackToBranchPointRequest>,
) -> ApiResult<Json<ReaderFork>> {
    Ok(Json(state.engine.rollback_to_branch_point(
        &user.username,
        fork_id,
        request.branch_point_sort_order,
    )?))
}

pub async fn update_progress(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
    Json(request): Json<ProgressRequest>,
) -> ApiResult<Json<ReaderFork>> {
    Ok(Json(state.engine.update_reading_progress(
        &user.username,
        fork_id,
        request.commit_id,
    )?))
}
