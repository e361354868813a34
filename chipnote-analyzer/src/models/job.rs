//! Analysis job state machine
//!
//! A job moves through `Starting → Running → (Completed | Failed)`. While
//! running, the pipeline reports which of the seven analysis stages it is in:
//! LOAD → SEPARATE → SELECT_LEAD → PITCH_DETECT → TEMPO_TRACK →
//! SEGMENT_AND_QUANTIZE → POST_PROCESS

use chipnote_common::{JobId, JobSnapshot, JobStatus, TOTAL_STAGES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::AnalysisResult;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStage {
    /// Decode the staged upload
    Load,
    /// Split the mix into stems
    Separate,
    /// Pick the stem carrying the melody
    SelectLead,
    /// Framewise f0 + confidence
    PitchDetect,
    /// Tempo estimate with hint fallback
    TempoTrack,
    /// Frames → quantized notes
    SegmentAndQuantize,
    /// Merge and filter
    PostProcess,
}

impl AnalysisStage {
    pub const ALL: [AnalysisStage; 7] = [
        AnalysisStage::Load,
        AnalysisStage::Separate,
        AnalysisStage::SelectLead,
        AnalysisStage::PitchDetect,
        AnalysisStage::TempoTrack,
        AnalysisStage::SegmentAndQuantize,
        AnalysisStage::PostProcess,
    ];

    /// 1-based stage number reported to clients
    pub fn number(self) -> u8 {
        match self {
            AnalysisStage::Load => 1,
            AnalysisStage::Separate => 2,
            AnalysisStage::SelectLead => 3,
            AnalysisStage::PitchDetect => 4,
            AnalysisStage::TempoTrack => 5,
            AnalysisStage::SegmentAndQuantize => 6,
            AnalysisStage::PostProcess => 7,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AnalysisStage::Load => "Loading audio file",
            AnalysisStage::Separate => "Separating audio stems",
            AnalysisStage::SelectLead => "Selecting lead stem",
            AnalysisStage::PitchDetect => "Detecting pitch and notes",
            AnalysisStage::TempoTrack => "Tracking rhythm and tempo",
            AnalysisStage::SegmentAndQuantize => "Extracting and quantizing notes",
            AnalysisStage::PostProcess => "Post-processing and cleanup",
        }
    }
}

/// Rejected lifecycle transition
#[derive(Debug, Error, PartialEq)]
#[error("job {id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Background analysis job
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// 0 until the pipeline reports its first stage
    pub stage: u8,
    pub message: String,
    /// Percent complete (0 - 100)
    pub progress: f64,
    pub status: JobStatus,
    pub filename: String,
    pub debug: String,
    /// Set exactly once, on completion
    pub result: Option<Arc<AnalysisResult>>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, filename: impl Into<String>) -> Self {
        Self {
            id,
            stage: 0,
            message: "Starting analysis...".to_string(),
            progress: 0.0,
            status: JobStatus::Starting,
            filename: filename.into(),
            debug: String::new(),
            result: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Progress view for poll/stream clients
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            stage: self.stage,
            total_stages: TOTAL_STAGES,
            message: self.message.clone(),
            progress: self.progress,
            status: self.status,
            filename: self.filename.clone(),
            debug: self.debug.clone(),
        }
    }

    /// Record stage progress; the first report moves the job to `Running`
    pub fn record_progress(
        &mut self,
        stage: u8,
        message: impl Into<String>,
        progress: f64,
        debug: Option<String>,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)?;
        self.stage = stage.min(TOTAL_STAGES);
        self.message = message.into();
        self.progress = clamp_percent(progress);
        if let Some(debug) = debug {
            self.debug = debug;
        }
        Ok(())
    }

    /// Terminal success; stores the result
    pub fn complete(&mut self, result: Arc<AnalysisResult>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed)?;
        self.message = format!("Analysis complete! {} notes", result.note_count);
        self.progress = 100.0;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Terminal failure; `message` is shown to clients verbatim
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.message = message.into();
        self.progress = 100.0;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

fn clamp_percent(progress: f64) -> f64 {
    if progress.is_finite() {
        progress.clamp(0.0, 100.0)
    } else {
        0.0
    }
}
