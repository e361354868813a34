//! Scripted collaborators
//!
//! Stand-ins for the signal-processing stages so pipeline and HTTP tests
//! control exactly what each stage returns.

use async_trait::async_trait;
use chipnote_analyzer::models::Frame;
use chipnote_analyzer::services::collaborators::PassthroughSeparator;
use chipnote_analyzer::services::{
    AudioLoader, CollaboratorError, Collaborators, LeadSelection, LeadSelector, MonoSignal,
    PitchTrack, PitchTracker, Stem, StereoSignal, TempoEstimator,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;

/// Sample rate of scripted signals
pub const SCRIPT_SAMPLE_RATE: u32 = 44100;

/// Hop giving exactly 10ms frames at [`SCRIPT_SAMPLE_RATE`]
pub const SCRIPT_HOP: usize = 441;

/// One second of constant stereo signal
pub fn scripted_stereo() -> StereoSignal {
    StereoSignal {
        left: vec![0.25; SCRIPT_SAMPLE_RATE as usize],
        right: vec![0.25; SCRIPT_SAMPLE_RATE as usize],
        sample_rate: SCRIPT_SAMPLE_RATE,
    }
}

/// Frames at 10ms spacing: each `(hz, count)` segment in order, 0 Hz for
/// unvoiced runs
pub fn melody_frames(segments: &[(f64, usize)]) -> Vec<Frame> {
    let mut frames = Vec::new();
    for &(hz, count) in segments {
        for _ in 0..count {
            let time = frames.len() as f64 * 0.01;
            frames.push(if hz > 0.0 {
                Frame::new(time, hz, 0.9)
            } else {
                Frame::unvoiced(time)
            });
        }
    }
    frames
}

/// Loader returning a fixed outcome regardless of path
pub struct FixedLoader(pub Result<StereoSignal, CollaboratorError>);

#[async_trait]
impl AudioLoader for FixedLoader {
    async fn load(&self, _path: &Path) -> Result<StereoSignal, CollaboratorError> {
        self.0.clone()
    }
}

/// Loader that parks until released
///
/// `entered` is notified once the pipeline reaches the load stage.
#[derive(Default)]
pub struct BlockingLoader {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl AudioLoader for BlockingLoader {
    async fn load(&self, _path: &Path) -> Result<StereoSignal, CollaboratorError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(scripted_stereo())
    }
}

/// Lead selector picking the first stem, or failing with a message
pub struct FixedLeadSelector(pub Option<String>);

#[async_trait]
impl LeadSelector for FixedLeadSelector {
    async fn select_lead(&self, stems: Vec<Stem>) -> Result<LeadSelection, CollaboratorError> {
        if let Some(message) = &self.0 {
            return Err(CollaboratorError::new(message.clone()));
        }
        let stem = stems
            .into_iter()
            .next()
            .ok_or_else(|| CollaboratorError::new("no stems"))?;
        Ok(LeadSelection {
            stem_name: stem.name,
            signal: stem.signal.to_mono(),
            score: 1.0,
        })
    }
}

/// Pitch tracker replaying fixed frames
pub struct FixedPitchTracker(pub Vec<Frame>);

#[async_trait]
impl PitchTracker for FixedPitchTracker {
    async fn track(&self, signal: &MonoSignal) -> Result<PitchTrack, CollaboratorError> {
        Ok(PitchTrack {
            frames: self.0.clone(),
            hop_length: SCRIPT_HOP,
            sample_rate: signal.sample_rate,
        })
    }
}

/// Tempo estimator returning a fixed outcome
pub struct FixedTempoEstimator(pub Result<f64, CollaboratorError>);

#[async_trait]
impl TempoEstimator for FixedTempoEstimator {
    async fn estimate(&self, _signal: &MonoSignal) -> Result<f64, CollaboratorError> {
        self.0.clone()
    }
}

/// Builder for a collaborator set with scripted stages
pub struct ScriptedCollaborators {
    loader: Arc<dyn AudioLoader>,
    lead_failure: Option<String>,
    frames: Vec<Frame>,
    tempo: Result<f64, CollaboratorError>,
}

impl Default for ScriptedCollaborators {
    fn default() -> Self {
        Self {
            loader: Arc::new(FixedLoader(Ok(scripted_stereo()))),
            lead_failure: None,
            // A4 for 0.5s, a short gap, C5 for 0.5s
            frames: melody_frames(&[(440.0, 50), (0.0, 25), (523.25, 50)]),
            tempo: Ok(120.0),
        }
    }
}

impl ScriptedCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loader(mut self, loader: impl AudioLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn with_load_failure(self, message: &str) -> Self {
        self.with_loader(FixedLoader(Err(CollaboratorError::new(message))))
    }

    pub fn with_lead_failure(mut self, message: &str) -> Self {
        self.lead_failure = Some(message.to_string());
        self
    }

    pub fn with_frames(mut self, frames: Vec<Frame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_tempo(mut self, tempo: Result<f64, CollaboratorError>) -> Self {
        self.tempo = tempo;
        self
    }

    pub fn build(self) -> Collaborators {
        Collaborators {
            loader: self.loader,
            separator: Arc::new(PassthroughSeparator),
            lead_selector: Arc::new(FixedLeadSelector(self.lead_failure)),
            pitch_tracker: Arc::new(FixedPitchTracker(self.frames)),
            tempo_estimator: Arc::new(FixedTempoEstimator(self.tempo)),
        }
    }
}
