/// Story seed, chapter and authored branch point endpoints
use crate::api::handlers::AppState;
use crate::api::middleware::AuthUser;
use crate::api::models::{
    AppendChapterRequest, ApiResult, CreateBranchPointRequest, CreateSeedRequest, PositionQuery,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use storyfork_config::types::{BranchPoint, Chapter, StorySeed};

pub async fn create_seed(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateSeedRequest>,
) -> ApiResult<(StatusCode, Json<StorySeed>)> {
    let seed = state.engine.create_seed(
        &user.username,
        &request.title,
        request.slug.as_deref(),
        request.opening.as_deref(),
    )?;
    Ok((StatusCode::CREATED, Json(seed)))
}

pub async fn get_seed(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(seed_id): Path<i64>,
) -> ApiResult<Json<StorySeed>> {
    Ok(Json(state.engine.get_seed(&user.username, seed_id)?))
}

pub async fn get_seed_by_slug(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(slug): Path<String>,
) -> ApiResult<Json<StorySeed>> {
    Ok(Json(state.engine.get_seed_by_slug(&user.username, &slug)?))
}

pub async fn publish_seed(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(seed_id): Path<i64>,
) -> ApiResult<Json<StorySeed>> {
    Ok(Json(state.engine.publish_seed(&user.username, seed_id)?))
}

pub async fn list_chapters(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(seed_id): Path<i64>,
) -> ApiResult<Json<Vec<Chapter>>> {
    Ok(Json(state.engine.list_chapters(&user.username, seed_id)?))
}

pub async fn append_chapter(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(seed_id): Path<i64>,
    Json(request): Json<AppendChapterRequest>,
) -> ApiResult<(StatusCode, Json<Chapter>)> {
    let chapter = state.engine.append_chapter(
        &user.username,
        seed_id,
        &request.title,
        &request.content_markdown,
    )?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

/// Authored branch points, optionally at `?position=n`
pub async fn list_branch_points(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(seed_id): Path<i64>,
    Query(query): Query<PositionQuery>,
) -> ApiResult<Json<Vec<BranchPoint>>> {
    Ok(Json(state.engine.get_branch_points_for_position(
        &user.username,
        seed_id,
        query.position,
    )?))
}

pub async fn create_branch_point(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(seed_id): Path<i64>,
    Json(request): Json<CreateBranchPointRequest>,
) -> ApiResult<(StatusCode, Json<BranchPoint>)> {
    let point = state.engine.create_branch_point(
        &user.username,
        seed_id,
        request.sort_order,
        request.anchor_text.as_deref(),
        request.options,
    )?;
    Ok((StatusCode::CREATED, Json(point)))
}
