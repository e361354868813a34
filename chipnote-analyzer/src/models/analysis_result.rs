//! Completed analysis payload
//!
//! One schema shared by the pipeline (which builds it once, after
//! post-processing) and the result endpoint (which serializes it as-is).

use chipnote_common::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Note;

/// Result schema version
pub const RESULT_VERSION: &str = "1.0";

/// Producer tag written into every result
pub const RESULT_SOURCE: &str = "advanced_audio_analysis";

/// Algorithm chain tag
pub const ALGORITHM: &str = "separation+pitch+pentatonic";

/// Analysis settings that shaped the sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParams {
    /// Pitch frame hop in samples
    pub hop_length: usize,
    pub min_note_duration_beats: f64,
    /// Pitch search band in Hz, `[min, max]`
    pub frequency_range: [f64; 2],
    pub algorithm: String,
    pub confidence_threshold: f64,
}

/// Counters reported by the note segmenter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentationStats {
    /// Frames pulled from the input before stopping
    pub frames_seen: usize,
    /// Frames with frequency > 0
    pub frames_with_frequency: usize,
    /// Frames accepted as voiced (frequency and confidence over threshold)
    pub voiced_frames: usize,
    /// Malformed frames skipped
    pub frame_errors: usize,
    /// Sub-threshold pending notes dropped at flush
    pub discarded_notes: usize,
    /// Minimum pending-note length, in frames, for emission
    pub min_frames: usize,
    /// Processing cap tripped; sequence is partial
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

/// Completed analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub version: String,
    pub sequence: Vec<Note>,
    pub created: DateTime<Utc>,
    pub source: String,
    pub analysis_id: Uuid,
    pub job_id: JobId,
    pub original_filename: String,
    pub file_size_bytes: u64,
    pub bpm_hint: u32,
    pub detected_tempo: f64,
    /// `"detected"`, `"BPM hint"`, or `"BPM hint (beat tracking failed: …)"`
    pub tempo_source: String,
    pub sample_rate: u32,
    /// Audio duration in seconds
    pub duration: f64,
    pub note_count: usize,
    pub analysis_params: AnalysisParams,
    pub segmentation: SegmentationStats,
}

/// Inputs for [`AnalysisResult::new`] that come from the request
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    pub job_id: JobId,
    pub original_filename: String,
    pub file_size_bytes: u64,
    pub bpm_hint: u32,
}

/// Inputs for [`AnalysisResult::new`] that come from the analysis
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub sequence: Vec<Note>,
    pub detected_tempo: f64,
    pub tempo_source: String,
    pub sample_rate: u32,
    pub duration: f64,
    pub params: AnalysisParams,
    pub segmentation: SegmentationStats,
}

impl AnalysisResult {
    pub fn new(request: RequestMetadata, output: AnalysisOutput) -> Self {
        let note_count = output.sequence.len();
        Self {
            version: RESULT_VERSION.to_string(),
            sequence: output.sequence,
            created: Utc::now(),
            source: RESULT_SOURCE.to_string(),
            analysis_id: Uuid::new_v4(),
            job_id: request.job_id,
            original_filename: request.original_filename,
            file_size_bytes: request.file_size_bytes,
            bpm_hint: request.bpm_hint,
            detected_tempo: output.detected_tempo,
            tempo_source: output.tempo_source,
            sample_rate: output.sample_rate,
            duration: output.duration,
            note_count,
            analysis_params: output.params,
            segmentation: output.segmentation,
        }
    }

    #[cfg(test)]
    pub(crate) fn empty_for_tests() -> Self {
        Self::new(
            RequestMetadata {
                job_id: JobId::new(),
                original_filename: "test.wav".to_string(),
                file_size_bytes: 0,
                bpm_hint: 120,
            },
            AnalysisOutput {
                sequence: Vec::new(),
                detected_tempo: 120.0,
                tempo_source: "BPM hint".to_string(),
                sample_rate: 44100,
                duration: 0.0,
                params: AnalysisParams {
                    hop_length: 128,
                    min_note_duration_beats: 0.125,
                    frequency_range: [65.0, 700.0],
                    algorithm: ALGORITHM.to_string(),
                    confidence_threshold: 0.01,
                },
                segmentation: SegmentationStats::default(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_count_matches_sequence() {
        let mut result = AnalysisResult::empty_for_tests();
        assert_eq!(result.note_count, 0);

        result = AnalysisResult::new(
            RequestMetadata {
                job_id: result.job_id,
                original_filename: result.original_filename.clone(),
                file_size_bytes: 10,
                bpm_hint: 100,
            },
            AnalysisOutput {
                sequence: vec![Note::new('v', 440.0, 1.0, 0.0), Note::silence(0.5, 0.5)],
                detected_tempo: 100.0,
                tempo_source: "detected".to_string(),
                sample_rate: 44100,
                duration: 1.0,
                params: result.analysis_params.clone(),
                segmentation: SegmentationStats::default(),
            },
        );
        assert_eq!(result.note_count, 2);
    }

    #[test]
    fn test_result_json_fields() {
        let value = serde_json::to_value(AnalysisResult::empty_for_tests()).unwrap();
        for field in [
            "version",
            "sequence",
            "created",
            "source",
            "analysis_id",
            "original_filename",
            "bpm_hint",
            "detected_tempo",
            "tempo_source",
            "sample_rate",
            "duration",
            "note_count",
            "analysis_params",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(value["analysis_params"]["hop_length"], 128);
        assert_eq!(value["analysis_params"]["frequency_range"][1], 700.0);
    }
}
