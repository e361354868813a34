//! Frame-to-note segmentation
//!
//! Walks the pitch track once, grouping consecutive voiced frames that
//! quantize to the same key into a pending note, and emitting the note when
//! the pitch changes, the voice drops out, or the input ends.
//!
//! # Rules
//! - A frame is voiced iff `frequency > 0` and `confidence > threshold`
//! - Pending notes shorter than `min_frames` are dropped silently
//! - Note duration in beats: `round(frames * hop / 60 * bpm * 4) / 4`
//! - A rest is emitted after a flushed note when the gap to the unvoiced
//!   frame exceeds the minimum note length and rounds to at least 1/4 beat
//! - Malformed frames are counted and skipped without touching pending state
//! - Wall-clock cap: on expiry, stop reading frames, flush, return partial

use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use super::frequency_quantizer::{self, QuantizeError};
use crate::models::{Frame, Note, Sequence, SegmentationStats};

/// Pitch distance, in semitones, under which two frames are the same note
const SAME_NOTE_SEMITONES: f64 = 0.5;

/// Shortest rest emitted, in beats
const MIN_REST_BEATS: f64 = 0.25;

/// Individual frame faults logged before going quiet
const LOGGED_FRAME_ERRORS: usize = 10;

/// Invalid segmenter configuration
#[derive(Debug, Error, PartialEq)]
pub enum SegmenterError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Malformed input frame
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("frame {index}: {field} is not finite")]
    NonFinite { index: usize, field: &'static str },

    #[error("frame {index}: time {time} is before previous frame time {previous}")]
    TimeWentBackwards { index: usize, time: f64, previous: f64 },

    #[error("frame {index}: {source}")]
    Pitch {
        index: usize,
        #[source]
        source: QuantizeError,
    },
}

/// Segmentation parameters
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Seconds between frames (`hop_length / sample_rate`)
    pub hop_duration: f64,
    pub tempo_bpm: f64,
    /// Frames at or below this confidence are unvoiced
    pub confidence_threshold: f64,
    pub min_note_duration_beats: f64,
    /// Wall-clock processing cap
    pub timeout: Duration,
    /// Check the cap every this many frames...
    pub timeout_check_interval: usize,
    /// ...or whenever this long has passed since the last check
    pub stall_check: Duration,
    /// Report progress every this many frames (0 = never)
    pub progress_interval: usize,
}

impl SegmenterConfig {
    /// Defaults for everything but frame spacing and tempo
    pub fn new(hop_duration: f64, tempo_bpm: f64) -> Self {
        Self {
            hop_duration,
            tempo_bpm,
            confidence_threshold: 0.01,
            min_note_duration_beats: 0.125,
            timeout: Duration::from_secs(120),
            timeout_check_interval: 500,
            stall_check: Duration::from_secs(30),
            progress_interval: 2000,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_timeout_check_interval(mut self, frames: usize) -> Self {
        self.timeout_check_interval = frames;
        self
    }

    pub fn with_stall_check(mut self, stall_check: Duration) -> Self {
        self.stall_check = stall_check;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_min_note_duration_beats(mut self, beats: f64) -> Self {
        self.min_note_duration_beats = beats;
        self
    }

    pub fn with_progress_interval(mut self, frames: usize) -> Self {
        self.progress_interval = frames;
        self
    }

    /// Minimum note length in seconds
    pub fn min_note_seconds(&self) -> f64 {
        60.0 / self.tempo_bpm * self.min_note_duration_beats
    }

    /// Minimum pending-note length in frames (at least 1)
    pub fn min_frames(&self) -> usize {
        ((self.min_note_seconds() / self.hop_duration).floor() as usize).max(1)
    }

    fn validate(&self) -> Result<(), SegmenterError> {
        if !(self.hop_duration.is_finite() && self.hop_duration > 0.0) {
            return Err(SegmenterError::InvalidParameters(format!(
                "hop duration must be positive, got {}",
                self.hop_duration
            )));
        }
        if !(self.tempo_bpm.is_finite() && self.tempo_bpm > 0.0) {
            return Err(SegmenterError::InvalidParameters(format!(
                "tempo must be positive, got {}",
                self.tempo_bpm
            )));
        }
        if !(self.min_note_duration_beats.is_finite() && self.min_note_duration_beats >= 0.0) {
            return Err(SegmenterError::InvalidParameters(
                "min note duration must be >= 0".to_string(),
            ));
        }
        if !self.confidence_threshold.is_finite() {
            return Err(SegmenterError::InvalidParameters(
                "confidence threshold must be finite".to_string(),
            ));
        }
        if self.timeout_check_interval == 0 {
            return Err(SegmenterError::InvalidParameters(
                "timeout check interval must be >= 1 frame".to_string(),
            ));
        }
        Ok(())
    }
}

/// Periodic progress report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentProgress {
    pub frames_seen: usize,
    /// Total frames, when the input knows its length
    pub frames_total: Option<usize>,
    pub voiced_frames: usize,
    pub frame_errors: usize,
}

impl SegmentProgress {
    /// Fraction of input consumed (0.0 - 1.0), if the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.frames_total {
            Some(total) if total > 0 => Some((self.frames_seen as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

/// Segmentation output
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationOutcome {
    pub sequence: Sequence,
    pub stats: SegmentationStats,
}

/// Frame-to-note segmenter
pub struct NoteSegmenter {
    config: SegmenterConfig,
}

#[derive(Debug, Clone, Copy)]
struct PendingNote {
    /// Quantized frequency
    frequency: f64,
    start_time: f64,
    frame_count: usize,
}

impl NoteSegmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self, SegmenterError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Segment a frame stream into notes
    pub fn segment<I>(&self, frames: I) -> SegmentationOutcome
    where
        I: IntoIterator<Item = Frame>,
    {
        self.segment_with_progress(frames, |_| {})
    }

    /// Segment a frame stream, reporting progress every
    /// `progress_interval` frames
    pub fn segment_with_progress<I, F>(&self, frames: I, mut on_progress: F) -> SegmentationOutcome
    where
        I: IntoIterator<Item = Frame>,
        F: FnMut(SegmentProgress),
    {
        let mut frames = frames.into_iter();
        let frames_total = frames.size_hint().1;
        let mut run = SegmentRun::new(&self.config);

        let started = Instant::now();
        let mut last_check = started;
        let mut index = 0usize;

        loop {
            let now = Instant::now();
            if index % self.config.timeout_check_interval == 0
                || now.duration_since(last_check) > self.config.stall_check
            {
                let elapsed = now.duration_since(started);
                if elapsed >= self.config.timeout {
                    warn!(
                        frame = index,
                        total = ?frames_total,
                        elapsed_ms = elapsed.as_millis() as u64,
                        voiced = run.stats.voiced_frames,
                        "Frame processing timeout, returning partial sequence"
                    );
                    run.stats.timed_out = true;
                    break;
                }
                last_check = now;
            }

            if self.config.progress_interval > 0
                && index > 0
                && index % self.config.progress_interval == 0
            {
                on_progress(SegmentProgress {
                    frames_seen: index,
                    frames_total,
                    voiced_frames: run.stats.voiced_frames,
                    frame_errors: run.stats.frame_errors,
                });
            }

            let Some(frame) = frames.next() else {
                break;
            };

            if let Err(e) = run.process(index, frame) {
                run.stats.frame_errors += 1;
                if run.stats.frame_errors <= LOGGED_FRAME_ERRORS {
                    warn!(error = %e, "Skipping malformed frame");
                }
            }
            index += 1;
        }

        run.stats.frames_seen = index;
        run.flush();
        run.stats.elapsed_ms = started.elapsed().as_millis() as u64;

        debug!(
            notes = run.sequence.len(),
            frames = run.stats.frames_seen,
            voiced = run.stats.voiced_frames,
            errors = run.stats.frame_errors,
            discarded = run.stats.discarded_notes,
            "Segmentation finished"
        );

        SegmentationOutcome {
            sequence: run.sequence,
            stats: run.stats,
        }
    }
}

/// Round a beat count to the nearest quarter beat
pub fn round_to_quarter_beat(beats: f64) -> f64 {
    (beats * 4.0).round() / 4.0
}

/// Mutable state of one segmentation pass
struct SegmentRun<'a> {
    config: &'a SegmenterConfig,
    min_frames: usize,
    pending: Option<PendingNote>,
    last_time: Option<f64>,
    sequence: Sequence,
    stats: SegmentationStats,
}

impl<'a> SegmentRun<'a> {
    fn new(config: &'a SegmenterConfig) -> Self {
        let min_frames = config.min_frames();
        Self {
            config,
            min_frames,
            pending: None,
            last_time: None,
            sequence: Vec::new(),
            stats: SegmentationStats {
                min_frames,
                ..SegmentationStats::default()
            },
        }
    }

    fn process(&mut self, index: usize, frame: Frame) -> Result<(), FrameError> {
        self.check_frame(index, &frame)?;

        if frame.frequency > 0.0 {
            self.stats.frames_with_frequency += 1;
        }

        let voiced = frame.frequency > 0.0 && frame.confidence > self.config.confidence_threshold;
        if voiced {
            self.voiced(index, frame)?;
            self.stats.voiced_frames += 1;
        } else {
            self.unvoiced(frame.time);
        }
        self.last_time = Some(frame.time);
        Ok(())
    }

    fn check_frame(&self, index: usize, frame: &Frame) -> Result<(), FrameError> {
        for (field, value) in [
            ("time", frame.time),
            ("frequency", frame.frequency),
            ("confidence", frame.confidence),
        ] {
            if !value.is_finite() {
                return Err(FrameError::NonFinite { index, field });
            }
        }
        if let Some(previous) = self.last_time {
            if frame.time < previous {
                return Err(FrameError::TimeWentBackwards {
                    index,
                    time: frame.time,
                    previous,
                });
            }
        }
        Ok(())
    }

    fn voiced(&mut self, index: usize, frame: Frame) -> Result<(), FrameError> {
        let quantized = frequency_quantizer::quantize(frame.frequency);

        let Some(pending) = self.pending.as_mut() else {
            self.start(quantized, frame.time);
            return Ok(());
        };

        // Computed before any mutation so a failure leaves state untouched
        let distance = frequency_quantizer::semitone_distance(quantized, pending.frequency)
            .map_err(|source| FrameError::Pitch { index, source })?;

        if distance < SAME_NOTE_SEMITONES {
            pending.frame_count += 1;
        } else {
            self.flush();
            self.start(quantized, frame.time);
        }
        Ok(())
    }

    fn unvoiced(&mut self, time: f64) {
        let Some(note_end) = self.flush() else {
            return;
        };

        let gap_seconds = time - note_end;
        if gap_seconds > self.config.min_note_seconds() {
            let gap_beats = round_to_quarter_beat(gap_seconds * self.config.tempo_bpm / 60.0);
            if gap_beats >= MIN_REST_BEATS {
                self.sequence.push(Note::silence(gap_beats, note_end));
            }
        }
    }

    fn start(&mut self, frequency: f64, time: f64) {
        self.pending = Some(PendingNote {
            frequency,
            start_time: time,
            frame_count: 1,
        });
    }

    /// Emit the pending note if long enough; returns its end time in
    /// seconds when emitted
    fn flush(&mut self) -> Option<f64> {
        let pending = self.pending.take()?;
        if pending.frame_count < self.min_frames {
            self.stats.discarded_notes += 1;
            return None;
        }

        let duration_seconds = pending.frame_count as f64 * self.config.hop_duration;
        let duration_beats = round_to_quarter_beat(duration_seconds / 60.0 * self.config.tempo_bpm);

        self.sequence.push(Note::new(
            frequency_quantizer::to_symbol(pending.frequency),
            pending.frequency,
            duration_beats,
            pending.start_time,
        ));
        Some(pending.start_time + duration_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const HOP: f64 = 0.01;

    fn segmenter(tempo: f64) -> NoteSegmenter {
        NoteSegmenter::new(SegmenterConfig::new(HOP, tempo)).unwrap()
    }

    fn tone(start_index: usize, count: usize, hz: f64) -> Vec<Frame> {
        (start_index..start_index + count)
            .map(|i| Frame::new(i as f64 * HOP, hz, 0.9))
            .collect()
    }

    fn rest(start_index: usize, count: usize) -> Vec<Frame> {
        (start_index..start_index + count)
            .map(|i| Frame::unvoiced(i as f64 * HOP))
            .collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(NoteSegmenter::new(SegmenterConfig::new(0.0, 120.0)).is_err());
        assert!(NoteSegmenter::new(SegmenterConfig::new(HOP, f64::NAN)).is_err());
        assert!(NoteSegmenter::new(SegmenterConfig::new(HOP, 120.0).with_timeout_check_interval(0)).is_err());
    }

    #[test]
    fn test_min_frames_floor() {
        // 1/8 beat at 120 BPM = 62.5ms = 6 frames of 10ms
        assert_eq!(SegmenterConfig::new(HOP, 120.0).min_frames(), 6);
        // Never below one frame
        assert_eq!(SegmenterConfig::new(1.0, 120.0).min_frames(), 1);
    }

    #[test]
    fn test_all_unvoiced_yields_empty_sequence() {
        let outcome = segmenter(120.0).segment(rest(0, 500));
        assert!(outcome.sequence.is_empty());
        assert_eq!(outcome.stats.frames_seen, 500);
        assert_eq!(outcome.stats.voiced_frames, 0);
    }

    #[test]
    fn test_steady_tone_yields_single_note() {
        // 37 frames = 0.37s = 0.74 beats at 120 BPM -> 0.75
        let outcome = segmenter(120.0).segment(tone(0, 37, 440.0));

        assert_eq!(outcome.sequence.len(), 1);
        let note = &outcome.sequence[0];
        assert_eq!(note.key, 'v');
        assert_eq!(note.frequency, 440.0);
        assert_eq!(note.duration, 0.75);
        assert_eq!(note.start_time, 0.0);
    }

    #[test]
    fn test_pitch_change_starts_new_note() {
        let mut frames = tone(0, 50, 440.0);
        frames.extend(tone(50, 50, 392.0));

        let outcome = segmenter(120.0).segment(frames);

        let keys: Vec<char> = outcome.sequence.iter().map(|n| n.key).collect();
        assert_eq!(keys, vec!['v', 'c']);
        assert!((outcome.sequence[1].start_time - 0.5).abs() < 1e-9);
        assert_eq!(outcome.sequence[0].duration, 1.0);
    }

    #[test]
    fn test_detuned_frames_continue_same_note() {
        // All of these quantize to A4
        let frames: Vec<Frame> = (0..40)
            .map(|i| {
                let hz = if i % 2 == 0 { 436.0 } else { 447.0 };
                Frame::new(i as f64 * HOP, hz, 0.9)
            })
            .collect();

        let outcome = segmenter(120.0).segment(frames);
        assert_eq!(outcome.sequence.len(), 1);
        assert_eq!(outcome.sequence[0].frequency, 440.0);
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut frames = tone(0, 3, 440.0);
        frames.extend(rest(3, 20));

        let outcome = segmenter(120.0).segment(frames);
        assert!(outcome.sequence.is_empty());
        assert_eq!(outcome.stats.discarded_notes, 1);
    }

    #[test]
    fn test_low_confidence_frames_end_note() {
        let mut frames = tone(0, 30, 440.0);
        frames.extend((30..60).map(|i| Frame::new(i as f64 * HOP, 440.0, 0.005)));
        frames.extend(tone(60, 30, 440.0));

        let outcome = segmenter(120.0).segment(frames);

        // Two separate A4 notes; the low-confidence stretch is not a note
        assert_eq!(outcome.sequence.len(), 2);
        assert!(outcome.sequence.iter().all(|n| n.key == 'v'));
        assert_eq!(outcome.stats.voiced_frames, 60);
        assert_eq!(outcome.stats.frames_with_frequency, 90);
    }

    #[test]
    fn test_rest_emitted_for_gap_after_note() {
        // Note 0.0-0.5s, next frame arrives at 1.5s: 1s gap = 2 beats
        let mut frames = tone(0, 50, 440.0);
        frames.push(Frame::unvoiced(1.5));

        let outcome = segmenter(120.0).segment(frames);

        assert_eq!(outcome.sequence.len(), 2);
        let rest = &outcome.sequence[1];
        assert!(rest.is_silence());
        assert_eq!(rest.frequency, 0.0);
        assert_eq!(rest.duration, 2.0);
        assert!((rest.start_time - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_contiguous_unvoiced_frame_adds_no_rest() {
        let mut frames = tone(0, 50, 440.0);
        frames.extend(rest(50, 100));

        let outcome = segmenter(120.0).segment(frames);
        assert_eq!(outcome.sequence.len(), 1);
    }

    #[test]
    fn test_final_pending_note_is_flushed() {
        let mut frames = rest(0, 10);
        frames.extend(tone(10, 25, 523.25));

        let outcome = segmenter(120.0).segment(frames);
        assert_eq!(outcome.sequence.len(), 1);
        assert_eq!(outcome.sequence[0].key, 'n');
        assert!((outcome.sequence[0].start_time - 0.1).abs() < 1e-9);
        // 25 frames = 0.25s = 0.5 beats
        assert_eq!(outcome.sequence[0].duration, 0.5);
    }

    #[test]
    fn test_malformed_frames_are_skipped() {
        let mut frames = tone(0, 20, 440.0);
        frames.push(Frame::new(0.2, f64::NAN, 0.9));
        frames.push(Frame::new(f64::INFINITY, 440.0, 0.9));
        // Time going backwards
        frames.push(Frame::new(0.05, 440.0, 0.9));
        frames.extend(tone(20, 20, 440.0));

        let outcome = segmenter(120.0).segment(frames);

        assert_eq!(outcome.stats.frame_errors, 3);
        // The bad frames neither ended nor extended the note
        assert_eq!(outcome.sequence.len(), 1);
        // 40 good frames = 0.4s = 0.8 beats -> 0.75
        assert_eq!(outcome.sequence[0].duration, 0.75);
        assert_eq!(outcome.stats.frames_seen, 43);
    }

    #[test]
    fn test_zero_timeout_returns_immediately() {
        let config = SegmenterConfig::new(HOP, 120.0).with_timeout(Duration::ZERO);
        let outcome = NoteSegmenter::new(config).unwrap().segment(tone(0, 1000, 440.0));

        assert!(outcome.stats.timed_out);
        assert_eq!(outcome.stats.frames_seen, 0);
        assert!(outcome.sequence.is_empty());
    }

    #[test]
    fn test_timeout_returns_partial_sequence_with_pending_note() {
        // Frames arrive slowly after the first 10
        let frames = tone(0, 10_000, 440.0).into_iter().enumerate().map(|(i, f)| {
            if i >= 10 {
                thread::sleep(Duration::from_millis(2));
            }
            f
        });

        let config = SegmenterConfig::new(HOP, 120.0)
            .with_timeout(Duration::from_millis(40))
            .with_timeout_check_interval(1);
        let outcome = NoteSegmenter::new(config).unwrap().segment(frames);

        assert!(outcome.stats.timed_out);
        assert!(outcome.stats.frames_seen < 10_000);
        assert!(outcome.stats.frames_seen >= 10);
        // Pending note was flushed rather than lost
        assert_eq!(outcome.sequence.len(), 1);
        assert_eq!(outcome.sequence[0].key, 'v');
    }

    #[test]
    fn test_stalled_stream_times_out_between_interval_checks() {
        // The frame-count check never fires again after frame 0; only the
        // stall check can notice the timeout
        let frames = tone(0, 10_000, 440.0).into_iter().enumerate().map(|(i, f)| {
            if i >= 10 {
                thread::sleep(Duration::from_millis(2));
            }
            f
        });

        let config = SegmenterConfig::new(HOP, 120.0)
            .with_timeout(Duration::from_millis(60))
            .with_timeout_check_interval(1_000_000)
            .with_stall_check(Duration::from_millis(5));
        let outcome = NoteSegmenter::new(config).unwrap().segment(frames);

        assert!(outcome.stats.timed_out);
        assert!(outcome.stats.frames_seen >= 10);
        assert!(outcome.stats.frames_seen < 10_000);
        assert_eq!(outcome.sequence.len(), 1);
        assert_eq!(outcome.sequence[0].key, 'v');
    }

    #[test]
    fn test_progress_reported_at_interval() {
        let config = SegmenterConfig::new(HOP, 120.0).with_progress_interval(100);
        let segmenter = NoteSegmenter::new(config).unwrap();

        let mut reports = Vec::new();
        segmenter.segment_with_progress(tone(0, 450, 440.0), |p| reports.push(p));

        let seen: Vec<usize> = reports.iter().map(|p| p.frames_seen).collect();
        assert_eq!(seen, vec![100, 200, 300, 400]);
        assert_eq!(reports[0].frames_total, Some(450));
        assert!((reports[1].fraction().unwrap() - 200.0 / 450.0).abs() < 1e-12);
    }

    #[test]
    fn test_reference_tone_at_120_bpm() {
        // 0.5s of A4 at hop 128/44100, then silence
        let hop = 128.0 / 44100.0;
        let frames: Vec<Frame> = (0..400)
            .map(|i| {
                let t = i as f64 * hop;
                if t < 0.5 {
                    Frame::new(t, 440.0, 1.0)
                } else {
                    Frame::unvoiced(t)
                }
            })
            .collect();

        let outcome = NoteSegmenter::new(SegmenterConfig::new(hop, 120.0))
            .unwrap()
            .segment(frames);

        assert_eq!(outcome.sequence.len(), 1);
        let note = &outcome.sequence[0];
        assert_eq!(note.frequency, 440.0);
        assert_eq!(note.key, 'v');
        assert_eq!(note.duration, 1.0);
    }
}
