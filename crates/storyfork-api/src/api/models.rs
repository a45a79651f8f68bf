//! Request and response bodies for the REST API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use storyfork_config::types::NewStoryOption;
use storyfork_core::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Whether resending the same request may succeed
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            retryable: false,
        }
    }
}

/// Engine failure on its way to an HTTP response
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError(EngineError::InvalidInput(message.into()))
    }
}

pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyExists { .. }
        | EngineError::InvalidState(_)
        | EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
        EngineError::Unauthorized(_) => StatusCode::FORBIDDEN,
        EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        EngineError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = match &self.0 {
            EngineError::Storage(err) => {
                tracing::error!("Storage failure: {err:#}");
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorResponse {
            error: self.0.code().to_string(),
            message,
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Parse a JSON body that may be absent; an empty body yields `T::default()`.
pub fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

// ---------- Story seeds ----------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSeedRequest {
    pub title: String,
    pub slug: Option<String>,
    pub opening: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendChapterRequest {
    pub title: String,
    pub content_markdown: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBranchPointRequest {
    pub sort_order: i32,
    pub anchor_text: Option<String>,
    pub options: Vec<NewStoryOption>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PositionQuery {
    pub position: Option<i32>,
}

// ---------- Forks and commits ----------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateForkRequest {
    pub from_chapter_sort_order: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChooseRequest {
    pub branch_point_id: i64,
    pub option_id: i64,
    /// Fork version the client last saw
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    pub commit_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackToBranchPointRequest {
    pub branch_point_sort_order: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    pub commit_id: Option<i64>,
}

// ---------- Pull requests ----------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePullRequestRequest {
    pub fork_id: i64,
    pub from_commit_id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePullRequestStatusRequest {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyfork_config::types::PullRequestStatus;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&EngineError::NotFound("fork")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&EngineError::InvalidTransition {
                from: PullRequestStatus::Merged,
                to: PullRequestStatus::Closed,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&EngineError::Unauthorized("author only")),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&EngineError::UpstreamFailure("timeout".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&EngineError::Storage(anyhow::anyhow!("disk"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_optional_json() {
        let empty: CreateForkRequest = optional_json(b"  ").unwrap();
        assert!(empty.from_chapter_sort_order.is_none());
        let given: CreateForkRequest = optional_json(br#"{"fromChapterSortOrder":3}"#).unwrap();
        assert_eq!(given.from_chapter_sort_order, Some(3));
        assert!(optional_json::<CreateForkRequest>(b"{").is_err());
    }
}
