/// AI preview cache endpoints
use crate::api::handlers::AppState;
use crate::api::middleware::AuthUser;
use crate::api::models::ApiResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use storyfork_config::types::Commit;
use storyfork_core::preview::{AiPreviewChapter, PreviewDraft, SummaryAck};

pub async fn get_previews(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
) -> ApiResult<Json<Vec<AiPreviewChapter>>> {
    Ok(Json(state.engine.get_previews(&user.username, fork_id).await?))
}

pub async fn save_preview(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
    Json(draft): Json<PreviewDraft>,
) -> ApiResult<Json<AiPreviewChapter>> {
    Ok(Json(
        state
            .engine
            .save_preview(&user.username, fork_id, draft)
            .await?,
    ))
}

pub async fn delete_previews(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(fork_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.engine.delete_previews(&user.username, fork_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deleting a chapter that is already gone also succeeds.
pub async fn delete_preview_chapter(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((fork_id, chapter_number)): Path<(i64, i32)>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .delete_preview_chapter(&user.username, fork_id, chapter_number)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Queue summarization and answer 202; poll the preview list for the result.
pub async fn generate_summary(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((fork_id, chapter_number)): Path<(i64, i32)>,
) -> ApiResult<(StatusCode, Json<SummaryAck>)> {
    let ack = state
        .engine
        .generate_preview_summary(&user.username, fork_id, chapter_number)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

pub async fn promote_preview(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((fork_id, chapter_number)): Path<(i64, i32)>,
) -> ApiResult<(StatusCode, Json<Commit>)> {
    let commit = state
        .engine
        .promote_preview(&user.username, fork_id, chapter_number)
        .await?;
    Ok((StatusCode::CREATED, Json(commit)))
}
