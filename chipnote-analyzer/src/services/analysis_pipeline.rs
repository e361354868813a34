//! Analysis pipeline orchestration
//!
//! Runs one job through the fixed stage sequence
//! LOAD → SEPARATE → SELECT_LEAD → PITCH_DETECT → TEMPO_TRACK →
//! SEGMENT_AND_QUANTIZE → POST_PROCESS, writing progress into the
//! [`JobRegistry`] at each boundary. A collaborator error fails the job
//! immediately; nothing is retried.
//!
//! Every run holds a [`JobFinalizer`]. Its `Drop` runs on success, on a
//! handled failure, on panic and on task abort, and guarantees the job ends
//! terminal, the staged upload is deleted, and the task handle is released.

use chipnote_common::JobId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::collaborators::{CollaboratorError, Collaborators};
use super::job_registry::{JobRegistry, RegistryError};
use super::note_segmenter::{
    NoteSegmenter, SegmentProgress, SegmentationOutcome, SegmenterConfig, SegmenterError,
};
use super::sequence_post_processor::SequencePostProcessor;
use crate::config::AnalysisConfig;
use crate::models::{
    AnalysisOutput, AnalysisParams, AnalysisResult, AnalysisStage, Frame, RequestMetadata,
    ALGORITHM,
};

/// Failure message for jobs whose task ended without a terminal write
pub const TERMINATED_MESSAGE: &str = "Analysis terminated unexpectedly";

/// Tempo source labels
pub const TEMPO_DETECTED: &str = "detected";
pub const TEMPO_HINT: &str = "BPM hint";

/// Pipeline failure
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{source}")]
    Collaborator {
        stage: AnalysisStage,
        #[source]
        source: CollaboratorError,
    },

    #[error("{0}")]
    Segmenter(#[from] SegmenterError),

    #[error("job state update failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Worker(String),
}

impl PipelineError {
    fn collaborator(stage: AnalysisStage) -> impl FnOnce(CollaboratorError) -> Self {
        move |source| PipelineError::Collaborator { stage, source }
    }

    /// Text stored as the failed job's message
    pub fn client_message(&self) -> String {
        format!("Analysis failed: {self}")
    }
}

/// Uploaded audio waiting for analysis
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl StagedUpload {
    /// Staging copy owned by the job; deleted when the job finalizes
    pub fn temporary(temp: TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            temp: Some(temp),
        }
    }

    /// File owned by someone else; left in place
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn release(mut self) {
        if let Some(temp) = self.temp.take() {
            if let Err(e) = temp.close() {
                warn!(path = %self.path.display(), error = %e, "Failed to remove staged upload");
            }
        }
    }
}

/// One analysis job's inputs
#[derive(Debug)]
pub struct AnalysisRequest {
    pub job_id: JobId,
    pub upload: StagedUpload,
    pub original_filename: String,
    pub file_size_bytes: u64,
    pub bpm_hint: u32,
}

impl AnalysisRequest {
    fn metadata(&self) -> RequestMetadata {
        RequestMetadata {
            job_id: self.job_id,
            original_filename: self.original_filename.clone(),
            file_size_bytes: self.file_size_bytes,
            bpm_hint: self.bpm_hint,
        }
    }
}

/// Drives jobs through the stage sequence
#[derive(Clone)]
pub struct AnalysisPipeline {
    registry: JobRegistry,
    collaborators: Collaborators,
    config: Arc<AnalysisConfig>,
}

impl AnalysisPipeline {
    pub fn new(registry: JobRegistry, collaborators: Collaborators, config: AnalysisConfig) -> Self {
        Self {
            registry,
            collaborators,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Register a job and start it on a background task
    ///
    /// Returns as soon as the task is spawned.
    pub fn submit(
        &self,
        upload: StagedUpload,
        original_filename: String,
        file_size_bytes: u64,
        bpm_hint: u32,
    ) -> JobId {
        let job_id = self.registry.create(original_filename.clone());
        let request = AnalysisRequest {
            job_id,
            upload,
            original_filename,
            file_size_bytes,
            bpm_hint,
        };

        // The task waits for its handle to be attached so the finalizer
        // always has a handle to release
        let (attached_tx, attached_rx) = oneshot::channel::<()>();
        let pipeline = self.clone();
        let handle = tokio::spawn(async move {
            let _ = attached_rx.await;
            pipeline.run(request).await
        });
        if let Err(e) = self.registry.attach_task(job_id, handle) {
            warn!(job_id = %job_id, error = %e, "Could not attach task handle");
        }
        let _ = attached_tx.send(());

        info!(job_id = %job_id, bpm_hint, "Analysis job submitted");
        job_id
    }

    /// Run a registered job to a terminal state on the current task
    pub async fn run(&self, request: AnalysisRequest) {
        let job_id = request.job_id;
        let metadata = request.metadata();
        let bpm_hint = request.bpm_hint;
        let finalizer = JobFinalizer::new(self.registry.clone(), job_id, request.upload);

        match self.execute(&metadata, finalizer.audio_path(), bpm_hint).await {
            Ok(result) => {
                if let Err(e) = self.registry.complete(job_id, result) {
                    error!(job_id = %job_id, error = %e, "Could not record job completion");
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Analysis failed");
                if let Err(update) = self.registry.fail(job_id, e.client_message()) {
                    error!(job_id = %job_id, error = %update, "Could not record job failure");
                }
            }
        }

        drop(finalizer);
    }

    async fn execute(
        &self,
        request: &RequestMetadata,
        audio_path: &Path,
        bpm_hint: u32,
    ) -> Result<AnalysisResult, PipelineError> {
        let id = request.job_id;
        let cfg = &self.config;

        // Stage 1: load
        self.report(
            id,
            AnalysisStage::Load,
            10.0,
            "Loading audio file",
            format!("File: {}", request.original_filename),
        )?;
        let stereo = self
            .collaborators
            .loader
            .load(audio_path)
            .await
            .map_err(PipelineError::collaborator(AnalysisStage::Load))?;
        let sample_rate = stereo.sample_rate;
        let duration = stereo.duration_seconds();
        self.report(
            id,
            AnalysisStage::Load,
            20.0,
            "Audio loaded",
            format!("Stereo audio: {} frames, {:.2}s at {} Hz", stereo.len(), duration, sample_rate),
        )?;

        // Stage 2: separate
        self.report(
            id,
            AnalysisStage::Separate,
            25.0,
            "Preparing stem separation",
            format!("Input: {:.2}s stereo", duration),
        )?;
        self.report(
            id,
            AnalysisStage::Separate,
            30.0,
            "Separating audio stems",
            "Running separator".to_string(),
        )?;
        let stems = self
            .collaborators
            .separator
            .separate(stereo)
            .await
            .map_err(PipelineError::collaborator(AnalysisStage::Separate))?;
        let stem_summary = stems
            .iter()
            .map(|s| format!("{}: {:.4}", s.name, s.signal.to_mono().rms()))
            .collect::<Vec<_>>()
            .join(", ");
        self.report(
            id,
            AnalysisStage::Separate,
            40.0,
            "Stems separated",
            format!("{} stems, RMS energy: {}", stems.len(), stem_summary),
        )?;

        // Stage 3: lead selection
        self.report(
            id,
            AnalysisStage::SelectLead,
            45.0,
            AnalysisStage::SelectLead.label(),
            format!("Scoring {} stems", stems.len()),
        )?;
        let lead = self
            .collaborators
            .lead_selector
            .select_lead(stems)
            .await
            .map_err(PipelineError::collaborator(AnalysisStage::SelectLead))?;
        self.report(
            id,
            AnalysisStage::SelectLead,
            50.0,
            "Lead stem selected",
            format!("Lead: {} (score {:.3e})", lead.stem_name, lead.score),
        )?;
        let lead_signal = lead.signal;

        // Stage 4: pitch
        self.report(
            id,
            AnalysisStage::PitchDetect,
            55.0,
            AnalysisStage::PitchDetect.label(),
            format!(
                "Hop {} samples, range {:.0}-{:.0} Hz",
                cfg.hop_length, cfg.frequency_range[0], cfg.frequency_range[1]
            ),
        )?;
        let track = self
            .collaborators
            .pitch_tracker
            .track(&lead_signal)
            .await
            .map_err(PipelineError::collaborator(AnalysisStage::PitchDetect))?;
        self.report(
            id,
            AnalysisStage::PitchDetect,
            65.0,
            "Pitch detected",
            format!("{} frames, {} with frequency", track.frames.len(), track.voiced_count()),
        )?;

        // Stage 5: tempo
        self.report(
            id,
            AnalysisStage::TempoTrack,
            70.0,
            AnalysisStage::TempoTrack.label(),
            format!("BPM hint: {}", bpm_hint),
        )?;
        let estimate = self.collaborators.tempo_estimator.estimate(&lead_signal).await;
        let (tempo, tempo_source) = resolve_tempo(estimate, bpm_hint, cfg.tempo_range);
        self.report(
            id,
            AnalysisStage::TempoTrack,
            75.0,
            "Tempo resolved",
            format!("Tempo: {:.1} BPM ({})", tempo, tempo_source),
        )?;

        // Stage 6: segmentation
        let hop_length = track.hop_length;
        let segmenter = NoteSegmenter::new(
            SegmenterConfig::new(track.hop_duration(), tempo)
                .with_confidence_threshold(cfg.confidence_threshold)
                .with_min_note_duration_beats(cfg.min_note_duration_beats)
                .with_timeout(cfg.segmentation_timeout())
                .with_timeout_check_interval(cfg.timeout_check_interval_frames)
                .with_stall_check(cfg.stall_check())
                .with_progress_interval(cfg.progress_interval_frames),
        )?;
        self.report(
            id,
            AnalysisStage::SegmentAndQuantize,
            80.0,
            AnalysisStage::SegmentAndQuantize.label(),
            format!(
                "Min note: {} frames at {:.1} BPM",
                segmenter.config().min_frames(),
                tempo
            ),
        )?;
        let outcome = self.segment(id, segmenter, track.frames).await?;
        let stats = &outcome.stats;
        let mut summary = format!(
            "{} notes from {}/{} voiced frames ({} frame errors, {} discarded)",
            outcome.sequence.len(),
            stats.voiced_frames,
            stats.frames_seen,
            stats.frame_errors,
            stats.discarded_notes
        );
        if stats.timed_out {
            summary.push_str(&format!(
                "; timed out after {}ms, sequence is partial",
                stats.elapsed_ms
            ));
        }
        self.report(id, AnalysisStage::SegmentAndQuantize, 90.0, "Notes extracted", summary)?;

        // Stage 7: post-processing
        self.report(
            id,
            AnalysisStage::PostProcess,
            95.0,
            AnalysisStage::PostProcess.label(),
            format!("{} notes before cleanup", outcome.sequence.len()),
        )?;
        let SegmentationOutcome { sequence, stats } = outcome;
        let initial = sequence.len();
        let post = SequencePostProcessor::new(tempo)
            .with_merge_gap_seconds(cfg.merge_gap_seconds)
            .with_min_duration_beats(cfg.min_output_duration_beats);
        let merged = post.merge_adjacent(sequence);
        let merged_count = merged.len();
        let sequence = post.filter_short(merged);
        self.report(
            id,
            AnalysisStage::PostProcess,
            100.0,
            "Post-processing complete",
            format!("Notes: {} → {} merged → {} final", initial, merged_count, sequence.len()),
        )?;

        let output = AnalysisOutput {
            sequence,
            detected_tempo: tempo,
            tempo_source,
            sample_rate,
            duration,
            params: AnalysisParams {
                hop_length,
                min_note_duration_beats: cfg.min_note_duration_beats,
                frequency_range: cfg.frequency_range,
                algorithm: ALGORITHM.to_string(),
                confidence_threshold: cfg.confidence_threshold,
            },
            segmentation: stats,
        };
        Ok(AnalysisResult::new(request.clone(), output))
    }

    /// Segment on the blocking pool, reporting progress into the registry
    async fn segment(
        &self,
        id: JobId,
        segmenter: NoteSegmenter,
        frames: Vec<Frame>,
    ) -> Result<SegmentationOutcome, PipelineError> {
        let registry = self.registry.clone();
        let stage = AnalysisStage::SegmentAndQuantize;

        tokio::task::spawn_blocking(move || {
            segmenter.segment_with_progress(frames, |p: SegmentProgress| {
                let percent = 80.0 + p.fraction().unwrap_or(0.0) * 10.0;
                let detail = match p.frames_total {
                    Some(total) => format!(
                        "Processed {}/{} frames, {} voiced",
                        p.frames_seen, total, p.voiced_frames
                    ),
                    None => format!("Processed {} frames, {} voiced", p.frames_seen, p.voiced_frames),
                };
                if let Err(e) =
                    registry.update_progress(id, stage.number(), stage.label(), percent, Some(detail))
                {
                    warn!(job_id = %id, error = %e, "Segmentation progress update rejected");
                }
            })
        })
        .await
        .map_err(|e| PipelineError::Worker(format!("segmentation worker failed: {e}")))
    }

    fn report(
        &self,
        id: JobId,
        stage: AnalysisStage,
        progress: f64,
        message: &str,
        detail: String,
    ) -> Result<(), PipelineError> {
        info!(
            job_id = %id,
            stage = stage.number(),
            progress,
            detail = %detail,
            "{}",
            message
        );
        self.registry
            .update_progress(id, stage.number(), message, progress, Some(detail))?;
        Ok(())
    }
}

/// Choose the tempo for segmentation
///
/// A detected tempo inside `range` wins; otherwise the hint is used and the
/// source says why.
pub fn resolve_tempo(
    estimate: Result<f64, CollaboratorError>,
    bpm_hint: u32,
    range: [f64; 2],
) -> (f64, String) {
    match estimate {
        Ok(bpm) if bpm.is_finite() && bpm >= range[0] && bpm <= range[1] => {
            (bpm, TEMPO_DETECTED.to_string())
        }
        Ok(bpm) => {
            info!(detected = bpm, hint = bpm_hint, "Detected tempo out of range, using hint");
            (bpm_hint as f64, TEMPO_HINT.to_string())
        }
        Err(e) => {
            warn!(error = %e, hint = bpm_hint, "Beat tracking failed, using hint");
            (
                bpm_hint as f64,
                format!("{TEMPO_HINT} (beat tracking failed: {e})"),
            )
        }
    }
}

/// Guaranteed end-of-job cleanup
///
/// Dropped at the end of [`AnalysisPipeline::run`], or during unwinding if
/// the run panics or its task is aborted.
pub struct JobFinalizer {
    registry: JobRegistry,
    job_id: JobId,
    upload: Option<StagedUpload>,
    audio_path: PathBuf,
}

impl JobFinalizer {
    pub fn new(registry: JobRegistry, job_id: JobId, upload: StagedUpload) -> Self {
        let audio_path = upload.path().to_path_buf();
        Self {
            registry,
            job_id,
            upload: Some(upload),
            audio_path,
        }
    }

    pub fn audio_path(&self) -> &Path {
        &self.audio_path
    }
}

impl Drop for JobFinalizer {
    fn drop(&mut self) {
        if self.registry.fail_if_unfinished(self.job_id, TERMINATED_MESSAGE) {
            error!(job_id = %self.job_id, "Job ended without a terminal status; marked failed");
        }
        if let Some(upload) = self.upload.take() {
            upload.release();
        }
        self.registry.detach_task(self.job_id);
    }
}
