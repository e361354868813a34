//! Sequence cleanup after segmentation
//!
//! Two passes, both idempotent:
//! 1. Merge adjacent notes with the same key and frequency when the silent
//!    gap between them is within tolerance
//! 2. Drop notes shorter than the minimum output duration

use tracing::debug;

use crate::models::{Note, Sequence};

/// Default merge tolerance in seconds
pub const DEFAULT_MERGE_GAP_SECONDS: f64 = 0.03;

/// Default shortest note kept in the output, in beats
pub const DEFAULT_MIN_DURATION_BEATS: f64 = 0.125;

/// Merges and filters a segmented sequence
#[derive(Debug, Clone)]
pub struct SequencePostProcessor {
    tempo_bpm: f64,
    merge_gap_seconds: f64,
    min_duration_beats: f64,
}

impl SequencePostProcessor {
    pub fn new(tempo_bpm: f64) -> Self {
        Self {
            tempo_bpm,
            merge_gap_seconds: DEFAULT_MERGE_GAP_SECONDS,
            min_duration_beats: DEFAULT_MIN_DURATION_BEATS,
        }
    }

    pub fn with_merge_gap_seconds(mut self, seconds: f64) -> Self {
        self.merge_gap_seconds = seconds;
        self
    }

    pub fn with_min_duration_beats(mut self, beats: f64) -> Self {
        self.min_duration_beats = beats;
        self
    }

    /// Merge then filter
    pub fn process(&self, sequence: Sequence) -> Sequence {
        let before = sequence.len();
        let merged = self.merge_adjacent(sequence);
        let merged_len = merged.len();
        let filtered = self.filter_short(merged);

        debug!(
            before,
            after_merge = merged_len,
            after_filter = filtered.len(),
            "Post-processed sequence"
        );
        filtered
    }

    /// Merge runs of identical notes separated by at most the tolerance
    ///
    /// The merged note keeps the first note's start and extends to the last
    /// note's end, so the gap is absorbed into its duration.
    pub fn merge_adjacent(&self, sequence: Sequence) -> Sequence {
        let mut merged: Sequence = Vec::with_capacity(sequence.len());

        for next in sequence {
            if let Some(current) = merged.last_mut() {
                if self.can_merge(current, &next) {
                    let gap_seconds = (next.start_time - current.end_time(self.tempo_bpm)).max(0.0);
                    current.duration += self.seconds_to_beats(gap_seconds) + next.duration;
                    continue;
                }
            }
            merged.push(next);
        }
        merged
    }

    /// Drop notes (and rests) shorter than the minimum duration
    pub fn filter_short(&self, sequence: Sequence) -> Sequence {
        sequence
            .into_iter()
            .filter(|note| note.duration >= self.min_duration_beats)
            .collect()
    }

    fn can_merge(&self, current: &Note, next: &Note) -> bool {
        if current.key != next.key || current.frequency != next.frequency {
            return false;
        }
        let gap_seconds = next.start_time - current.end_time(self.tempo_bpm);
        gap_seconds <= self.merge_gap_seconds
    }

    fn seconds_to_beats(&self, seconds: f64) -> f64 {
        seconds * self.tempo_bpm / 60.0
    }
}
