//! Job progress: SSE push and JSON poll
//!
//! GET /progress/:job_id streams `progress` events until the job is
//! terminal; an unknown job gets one `error` event and the stream closes.
//! GET /progress-json/:job_id returns the same snapshot once.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use chipnote_common::{JobId, JobSnapshot, TOTAL_STAGES};
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::models::AnalysisStage;
use crate::services::ProgressEvent;
use crate::AppState;

/// SSE event name for snapshots
pub const PROGRESS_EVENT: &str = "progress";

/// SSE event name for lookup failures
pub const ERROR_EVENT: &str = "error";

/// GET /progress/:job_id
pub async fn progress_stream(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(job_id = %job_id, "Progress stream client connected");
    let streamer = state.streamer.clone();

    let stream = async_stream::stream! {
        let Ok(id) = job_id.parse::<JobId>() else {
            yield Ok(not_found_event(&job_id));
            return;
        };

        let events = streamer.stream(id);
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            match event {
                ProgressEvent::Snapshot(snapshot) => {
                    match Event::default().event(PROGRESS_EVENT).json_data(&snapshot) {
                        Ok(event) => {
                            yield Ok(event);
                        }
                        Err(e) => {
                            warn!(job_id = %id, error = %e, "Failed to serialize snapshot");
                        }
                    }
                }
                ProgressEvent::NotFound(id) => {
                    yield Ok(not_found_event(&id.to_string()));
                }
            }
        }

        debug!(job_id = %id, "Progress stream closed");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

fn not_found_event(job_id: &str) -> Event {
    let body = json!({ "error": "Job not found", "job_id": job_id });
    Event::default().event(ERROR_EVENT).data(body.to_string())
}

/// GET /progress-json/:job_id
pub async fn progress_json(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let snapshot = job_id
        .parse::<JobId>()
        .ok()
        .and_then(|id| state.registry.snapshot(id))
        .ok_or(ApiError::JobNotFound(job_id))?;
    Ok(Json(snapshot))
}

/// GET /progress - stage and endpoint overview
pub async fn progress_overview() -> Json<Value> {
    let stages: Vec<Value> = AnalysisStage::ALL
        .iter()
        .map(|stage| json!({ "stage": stage.number(), "name": stage, "label": stage.label() }))
        .collect();

    Json(json!({
        "total_stages": TOTAL_STAGES,
        "stages": stages,
        "endpoints": {
            "stream": "/progress/{job_id}",
            "poll": "/progress-json/{job_id}",
            "result": "/result/{job_id}",
        },
        "statuses": ["starting", "running", "completed", "failed"],
    }))
}

/// Build progress routes
pub fn progress_routes() -> Router<AppState> {
    Router::new()
        .route("/progress", get(progress_overview))
        .route("/progress/:job_id", get(progress_stream))
        .route("/progress-json/:job_id", get(progress_json))
}
