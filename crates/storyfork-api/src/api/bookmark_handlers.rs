/// Bookmark CRUD scoped to a fork
use crate::api::handlers::AppState;
use crate::api::middleware::AuthUser;
use crate::api::models::ApiResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use storyfork_core::engine::{BookmarkPatch, BookmarkView};

pub async fn list_bookmarks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
) -> ApiResult<Json<Vec<BookmarkView>>> {
    Ok(Json(state.engine.list_bookmarks(&user.username, fork_id)?))
}

pub async fn create_bookmark(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
    Json(patch): Json<BookmarkPatch>,
) -> ApiResult<(StatusCode, Json<BookmarkView>)> {
    let bookmark = state.engine.create_bookmark(&user.username, fork_id, patch)?;
    Ok((StatusCode::CREATED, Json(bookmark)))
}

pub async fn update_bookmark(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((fork_id, bookmark_id)): Path<(i64, i64)>,
    Json(patch): Json<BookmarkPatch>,
) -> ApiResult<Json<BookmarkView>> {
    Ok(Json(state.engine.update_bookmark(
        &user.username,
        fork_id,
        bookmark_id,
        patch,
    )?))
}

pub async fn delete_bookmark(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((fork_id, bookmark_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .delete_bookmark(&user.username, fork_id, bookmark_id)?;
    Ok(StatusCode::NO_CONTENT)
}
