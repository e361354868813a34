//! chipnote-analyzer library interface
//!
//! Exposes the application state, router and analysis services for the
//! binary and for integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AnalyzerConfig;
use crate::services::{AnalysisPipeline, Collaborators, JobRegistry, ProgressStreamer};

/// Multipart framing allowance on top of the file size limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// All analysis jobs
    pub registry: JobRegistry,
    /// Starts and runs analysis jobs
    pub pipeline: AnalysisPipeline,
    /// Builds per-client progress streams
    pub streamer: ProgressStreamer,
    pub config: Arc<AnalyzerConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// State with the built-in collaborators
    pub fn new(config: AnalyzerConfig) -> Self {
        let collaborators =
            Collaborators::defaults(config.analysis.hop_length, config.analysis.frequency_range);
        Self::with_collaborators(config, collaborators)
    }

    /// State with caller-supplied collaborators
    pub fn with_collaborators(config: AnalyzerConfig, collaborators: Collaborators) -> Self {
        let registry = JobRegistry::new();
        let pipeline =
            AnalysisPipeline::new(registry.clone(), collaborators, config.analysis.clone());
        let streamer = ProgressStreamer::new(registry.clone(), config.stream.interval());
        Self {
            registry,
            pipeline,
            streamer,
            config: Arc::new(config),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.upload.max_file_size_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .merge(api::analyze_routes())
        .merge(api::progress_routes())
        .merge(api::result_routes())
        .merge(api::health_routes())
        .merge(api::debug_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
