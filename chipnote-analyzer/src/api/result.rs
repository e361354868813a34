//! Analysis results
//!
//! GET /result/:job_id answers by job status:
//! - completed → 200 with the AnalysisResult
//! - failed → 500 `{error: <failure message>}`
//! - starting/running → 202 `{error: "Analysis not complete", status}`
//! - unknown → 404

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chipnote_common::{JobId, JobStatus};
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /result/:job_id
pub async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job = job_id
        .parse::<JobId>()
        .ok()
        .and_then(|id| state.registry.get(id))
        .ok_or(ApiError::JobNotFound(job_id))?;

    let response = match job.status {
        JobStatus::Completed => match job.result {
            Some(result) => (StatusCode::OK, Json(result.as_ref())).into_response(),
            None => {
                return Err(ApiError::Internal(format!(
                    "Job {} completed without a result",
                    job.id
                )))
            }
        },
        JobStatus::Failed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": job.message })),
        )
            .into_response(),
        JobStatus::Starting | JobStatus::Running => (
            StatusCode::ACCEPTED,
            Json(json!({ "error": "Analysis not complete", "status": job.status })),
        )
            .into_response(),
    };
    Ok(response)
}

/// Build result routes
pub fn result_routes() -> Router<AppState> {
    Router::new().route("/result/:job_id", get(get_result))
}
