//! External collaborator contracts
//!
//! The pipeline drives five collaborators, one per signal-processing stage.
//! Each is a trait object so deployments (and tests) can swap in other
//! implementations, e.g. a neural stem separator behind the same seam.
//!
//! Implementations may use `anyhow` internally; errors cross the trait
//! boundary as [`CollaboratorError`], whose message is shown to clients.

pub mod autocorrelation_tempo;
pub mod mcleod_pitch_tracker;
pub mod passthrough_separator;
pub mod spectral_lead_selector;
pub mod symphonia_loader;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::models::Frame;

pub use autocorrelation_tempo::AutocorrelationTempoEstimator;
pub use mcleod_pitch_tracker::McLeodPitchTracker;
pub use passthrough_separator::PassthroughSeparator;
pub use spectral_lead_selector::SpectralLeadSelector;
pub use symphonia_loader::SymphoniaLoader;

/// Collaborator failure; the message reaches the client verbatim
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<anyhow::Error> for CollaboratorError {
    fn from(err: anyhow::Error) -> Self {
        // Alternate formatting keeps the context chain
        Self(format!("{err:#}"))
    }
}

/// Two-channel signal at its native sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct StereoSignal {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
}

impl StereoSignal {
    /// Frames per channel
    pub fn len(&self) -> usize {
        self.left.len().min(self.right.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Average of both channels
    pub fn to_mono(&self) -> MonoSignal {
        let samples = self
            .left
            .iter()
            .zip(&self.right)
            .map(|(l, r)| (l + r) * 0.5)
            .collect();
        MonoSignal::new(samples, self.sample_rate)
    }
}

/// Single-channel signal
#[derive(Debug, Clone, PartialEq)]
pub struct MonoSignal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoSignal {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Peak absolute amplitude
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}

/// Named stem produced by separation
#[derive(Debug, Clone, PartialEq)]
pub struct Stem {
    pub name: String,
    pub signal: StereoSignal,
}

/// Stem chosen to carry the melody
#[derive(Debug, Clone, PartialEq)]
pub struct LeadSelection {
    pub stem_name: String,
    pub signal: MonoSignal,
    /// Selector-specific score (higher is more lead-like)
    pub score: f64,
}

/// Framewise pitch track
#[derive(Debug, Clone, PartialEq)]
pub struct PitchTrack {
    pub frames: Vec<Frame>,
    /// Samples between frames
    pub hop_length: usize,
    pub sample_rate: u32,
}

impl PitchTrack {
    /// Seconds between frames
    pub fn hop_duration(&self) -> f64 {
        self.hop_length as f64 / self.sample_rate as f64
    }

    pub fn voiced_count(&self) -> usize {
        self.frames.iter().filter(|f| f.frequency > 0.0).count()
    }
}

/// Decodes the staged upload
#[async_trait]
pub trait AudioLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<StereoSignal, CollaboratorError>;
}

/// Splits a mix into named stems
#[async_trait]
pub trait StemSeparator: Send + Sync {
    async fn separate(&self, signal: StereoSignal) -> Result<Vec<Stem>, CollaboratorError>;
}

/// Picks the stem carrying the melody
#[async_trait]
pub trait LeadSelector: Send + Sync {
    async fn select_lead(&self, stems: Vec<Stem>) -> Result<LeadSelection, CollaboratorError>;
}

/// Framewise fundamental frequency and confidence
#[async_trait]
pub trait PitchTracker: Send + Sync {
    async fn track(&self, signal: &MonoSignal) -> Result<PitchTrack, CollaboratorError>;
}

/// Tempo estimate in BPM (range checking is left to the caller)
#[async_trait]
pub trait TempoEstimator: Send + Sync {
    async fn estimate(&self, signal: &MonoSignal) -> Result<f64, CollaboratorError>;
}

/// Full collaborator set used by one pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub loader: Arc<dyn AudioLoader>,
    pub separator: Arc<dyn StemSeparator>,
    pub lead_selector: Arc<dyn LeadSelector>,
    pub pitch_tracker: Arc<dyn PitchTracker>,
    pub tempo_estimator: Arc<dyn TempoEstimator>,
}

impl Collaborators {
    /// Built-in implementations
    ///
    /// `hop_length` and `frequency_range` configure the pitch tracker.
    pub fn defaults(hop_length: usize, frequency_range: [f64; 2]) -> Self {
        Self {
            loader: Arc::new(SymphoniaLoader::new()),
            separator: Arc::new(PassthroughSeparator),
            lead_selector: Arc::new(SpectralLeadSelector::default()),
            pitch_tracker: Arc::new(McLeodPitchTracker::new(hop_length, frequency_range)),
            tempo_estimator: Arc::new(AutocorrelationTempoEstimator::default()),
        }
    }
}

/// Run a CPU-bound collaborator body on the blocking pool
pub(crate) async fn run_blocking<T, F>(task: F) -> Result<T, CollaboratorError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| CollaboratorError::new(format!("worker task failed: {e}")))?
        .map_err(CollaboratorError::from)
}
