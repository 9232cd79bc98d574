use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::{error::StreakError, models::StreakRecord, services::AppState};

pub(crate) async fn get_streak(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<StreakRecord>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let record = state.streaks.get_streak(user_id).await?;
    Ok(Json(record))
}

pub(crate) async fn record_activity(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<StreakRecord>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    tracing::info!("Recording practice activity for user_id={}", user_id);

    let record = state.streaks.record_activity(user_id).await?;
    Ok(Json(record))
}

fn parse_user_id(value: &str) -> Result<&str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("Invalid user_id: must not be blank"));
    }
    Ok(trimmed)
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    Conflict(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl From<StreakError> for ApiError {
    fn from(err: StreakError) -> Self {
        let message = err.to_string();
        match err {
            StreakError::StorageUnavailable(_)
            | StreakError::SourceUnavailable(_)
            | StreakError::ProfileUnavailable(_) => ApiError::ServiceUnavailable(message),
            StreakError::ConcurrentUpdate { .. } => ApiError::Conflict(message),
            StreakError::CorruptState { .. } => {
                tracing::error!("{}", message);
                ApiError::Internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::ServiceUnavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        (status, Json(message)).into_response()
    }
}
