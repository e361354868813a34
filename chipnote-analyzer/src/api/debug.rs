//! Job diagnostics
//!
//! GET /debug/jobs lists every job with its task state; POST /debug/cleanup
//! removes finished jobs. Cleanup is idempotent and safe while other jobs run.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::services::JobDebugInfo;
use crate::AppState;

/// GET /debug/jobs response
#[derive(Debug, Serialize)]
pub struct DebugJobsResponse {
    pub total_jobs: usize,
    pub jobs: Vec<JobDebugInfo>,
}

/// GET /debug/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<DebugJobsResponse> {
    let jobs = state.registry.debug_entries();
    Json(DebugJobsResponse {
        total_jobs: jobs.len(),
        jobs,
    })
}

/// POST /debug/cleanup response
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub cleaned_jobs: usize,
    pub remaining_jobs: usize,
}

/// POST /debug/cleanup
pub async fn cleanup_jobs(State(state): State<AppState>) -> Json<CleanupResponse> {
    let report = state.registry.cleanup_finished();
    Json(CleanupResponse {
        cleaned_jobs: report.cleaned,
        remaining_jobs: report.remaining,
    })
}

/// Build diagnostic routes
pub fn debug_routes() -> Router<AppState> {
    Router::new()
        .route("/debug/jobs", get(list_jobs))
        .route("/debug/cleanup", post(cleanup_jobs))
}
