//! Configuration for chipnote-analyzer
//!
//! Settings are layered with CLI → ENV → TOML → default priority. CLI and
//! ENV handling lives in the binary's clap arguments (each flag has an env
//! fallback); this module owns the TOML schema, the defaults, and
//! validation.

use chipnote_common::config::{load_or_default, resolve_config_path, LoggingConfig};
use chipnote_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5001;

/// Config file name under the platform config dir
pub const CONFIG_FILE_NAME: &str = "chipnote-analyzer.toml";

/// Env var naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CHIPNOTE_CONFIG";

/// Full service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub port: u16,
    pub bind_address: String,
    pub logging: LoggingConfig,
    pub upload: UploadConfig,
    pub analysis: AnalysisConfig,
    pub stream: StreamConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: "127.0.0.1".to_string(),
            logging: LoggingConfig::default(),
            upload: UploadConfig::default(),
            analysis: AnalysisConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

/// Upload validation and staging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size_bytes: usize,
    /// Lowercase extensions without the dot
    pub allowed_extensions: Vec<String>,
    /// Where staged uploads are written (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 16 * 1024 * 1024,
            allowed_extensions: ["wav", "mp3", "flac", "ogg", "m4a", "aac"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            staging_dir: None,
        }
    }
}

impl UploadConfig {
    /// Case-insensitive extension check on a client filename
    pub fn is_allowed(&self, filename: &str) -> bool {
        extension_of(filename)
            .map(|ext| self.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)))
            .unwrap_or(false)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Lowercased extension of a filename, if any
pub fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Analysis parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Pitch frame hop in samples
    pub hop_length: usize,
    /// Frames with confidence at or below this are unvoiced
    pub confidence_threshold: f64,
    pub min_note_duration_beats: f64,
    /// Pitch search band in Hz
    pub frequency_range: [f64; 2],
    /// Tempo used when the request omits `bpm_hint`
    pub default_bpm_hint: u32,
    /// Merge tolerance between identical notes, in seconds
    pub merge_gap_seconds: f64,
    /// Shortest note kept after post-processing, in beats
    pub min_output_duration_beats: f64,
    pub segmentation_timeout_seconds: u64,
    pub timeout_check_interval_frames: usize,
    pub stall_check_seconds: u64,
    pub progress_interval_frames: usize,
    /// Detected tempos outside this range fall back to the hint
    pub tempo_range: [f64; 2],
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            hop_length: 128,
            confidence_threshold: 0.01,
            min_note_duration_beats: 0.125,
            frequency_range: [65.0, 700.0],
            default_bpm_hint: 120,
            merge_gap_seconds: 0.03,
            min_output_duration_beats: 0.125,
            segmentation_timeout_seconds: 120,
            timeout_check_interval_frames: 500,
            stall_check_seconds: 30,
            progress_interval_frames: 2000,
            tempo_range: [60.0, 200.0],
        }
    }
}

impl AnalysisConfig {
    pub fn segmentation_timeout(&self) -> Duration {
        Duration::from_secs(self.segmentation_timeout_seconds)
    }

    pub fn stall_check(&self) -> Duration {
        Duration::from_secs(self.stall_check_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hop_length == 0 {
            return Err(Error::Config("analysis.hop_length must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "analysis.confidence_threshold must be in [0, 1), got {}",
                self.confidence_threshold
            )));
        }
        if !(self.min_note_duration_beats >= 0.0) || !(self.min_output_duration_beats >= 0.0) {
            return Err(Error::Config("note duration minimums must be >= 0".into()));
        }
        if !(self.merge_gap_seconds >= 0.0) {
            return Err(Error::Config("analysis.merge_gap_seconds must be >= 0".into()));
        }
        check_range("analysis.frequency_range", self.frequency_range)?;
        check_range("analysis.tempo_range", self.tempo_range)?;
        if self.default_bpm_hint == 0 {
            return Err(Error::Config("analysis.default_bpm_hint must be positive".into()));
        }
        if self.timeout_check_interval_frames == 0 {
            return Err(Error::Config(
                "analysis.timeout_check_interval_frames must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn check_range(name: &str, range: [f64; 2]) -> Result<()> {
    let [low, high] = range;
    if !(low.is_finite() && high.is_finite() && low > 0.0 && low < high) {
        return Err(Error::Config(format!(
            "{name} must be increasing and positive, got [{low}, {high}]"
        )));
    }
    Ok(())
}

/// Progress stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Snapshot cadence in milliseconds
    pub interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { interval_ms: 500 }
    }
}

impl StreamConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Values from the command line (or their env fallbacks)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub log_level: Option<String>,
}

impl AnalyzerConfig {
    /// Resolve, load, layer and validate
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let path = resolve_config_path(
            overrides.config_path.as_deref(),
            CONFIG_ENV_VAR,
            CONFIG_FILE_NAME,
        );
        let mut config: AnalyzerConfig = load_or_default(path.as_deref())?;
        if path.is_none() {
            info!("No config file found, using built-in defaults");
        }

        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file with no overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: AnalyzerConfig = chipnote_common::config::load_toml_config(path)?;
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(bind) = &overrides.bind_address {
            self.bind_address = bind.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.logging.validate()?;
        self.analysis.validate()?;
        if self.upload.max_file_size_bytes == 0 {
            return Err(Error::Config("upload.max_file_size_bytes must be positive".into()));
        }
        if self.upload.allowed_extensions.is_empty() {
            return Err(Error::Config("upload.allowed_extensions is empty".into()));
        }
        if self.stream.interval_ms == 0 {
            return Err(Error::Config("stream.interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// `bind_address:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
