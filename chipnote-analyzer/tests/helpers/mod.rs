//! Test Helper Utilities
//!
//! Shared utilities for testing chipnote-analyzer

#![allow(dead_code)]

pub mod audio_generator;
pub mod scripted;

pub use audio_generator::{generate_test_wav, multipart_body, ToneConfig, BOUNDARY};
pub use scripted::{
    melody_frames, BlockingLoader, FixedLeadSelector, FixedLoader, FixedPitchTracker,
    FixedTempoEstimator, ScriptedCollaborators,
};

use chipnote_analyzer::config::AnalyzerConfig;
use chipnote_analyzer::services::Collaborators;
use chipnote_analyzer::AppState;
use std::path::Path;

/// Config tuned for tests: fast streams, uploads staged under `staging_dir`
pub fn test_config(staging_dir: &Path) -> AnalyzerConfig {
    let mut config = AnalyzerConfig::default();
    config.upload.staging_dir = Some(staging_dir.to_path_buf());
    config.stream.interval_ms = 20;
    config
}

/// App state backed by the given collaborators
pub fn test_state(staging_dir: &Path, collaborators: Collaborators) -> AppState {
    AppState::with_collaborators(test_config(staging_dir), collaborators)
}
