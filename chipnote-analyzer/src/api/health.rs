//! Health and service info endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::models::ALGORITHM;
use crate::services::frequency_quantizer::{FREQUENCY_ALPHABET, PENTATONIC_SCALE};
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Module name ("chipnote-analyzer")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Jobs not yet completed or failed
    pub active_jobs: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "chipnote-analyzer".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        active_jobs: state.registry.active_count(),
    })
}

/// GET /info response
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub service: String,
    pub description: String,
    pub supported_formats: Vec<String>,
    pub max_file_size_bytes: usize,
    pub alphabet_size: usize,
    pub pentatonic_size: usize,
    pub algorithm: String,
    pub hop_length: usize,
    pub frequency_range: [f64; 2],
}

/// GET /info
pub async fn service_info(State(state): State<AppState>) -> Json<InfoResponse> {
    let config = &state.config;
    Json(InfoResponse {
        service: "chipnote-analyzer".to_string(),
        description: "Converts a melody recording into a quantized step-sequencer note sequence"
            .to_string(),
        supported_formats: config.upload.allowed_extensions.clone(),
        max_file_size_bytes: config.upload.max_file_size_bytes,
        alphabet_size: FREQUENCY_ALPHABET.len(),
        pentatonic_size: PENTATONIC_SCALE.len(),
        algorithm: ALGORITHM.to_string(),
        hop_length: config.analysis.hop_length,
        frequency_range: config.analysis.frequency_range,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(service_info))
}
