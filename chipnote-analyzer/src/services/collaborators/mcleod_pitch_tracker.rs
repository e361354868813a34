//! Framewise f0 tracking with the McLeod pitch method
//!
//! Frame `i` starts at sample `i * hop_length` and is stamped at that time.
//! The window runs forward and is zero-padded past the end of the signal.
//! Detections outside the configured range are reported unvoiced, and the
//! frequency track gets a 3-tap median filter to remove single-frame
//! octave jumps.

use anyhow::{ensure, Result};
use async_trait::async_trait;
use pitch_detection::detector::mcleod::McLeodDetector;
use pitch_detection::detector::PitchDetector;
use tracing::debug;

use super::{run_blocking, CollaboratorError, MonoSignal, PitchTrack, PitchTracker};
use crate::models::Frame;

/// Analysis window in samples
pub const DEFAULT_WINDOW: usize = 2048;

/// Minimum window energy (sum of squares) for a detection
const POWER_THRESHOLD: f32 = 0.1;

/// Detections with clarity at or below this are discarded
const CLARITY_THRESHOLD: f32 = 0.5;

/// McLeod-based [`PitchTracker`]
#[derive(Debug, Clone)]
pub struct McLeodPitchTracker {
    hop_length: usize,
    window: usize,
    frequency_range: [f64; 2],
}

impl McLeodPitchTracker {
    pub fn new(hop_length: usize, frequency_range: [f64; 2]) -> Self {
        Self {
            hop_length,
            window: DEFAULT_WINDOW,
            frequency_range,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    fn track_blocking(&self, signal: &MonoSignal) -> Result<PitchTrack> {
        ensure!(self.hop_length > 0, "hop length must be positive");
        ensure!(self.window >= 4, "pitch window too small: {}", self.window);
        ensure!(signal.sample_rate > 0, "signal has no sample rate");

        let sample_rate = signal.sample_rate as usize;
        let mut detector = McLeodDetector::<f32>::new(self.window, self.window / 2);
        let mut buffer = vec![0.0f32; self.window];

        let frame_count = signal.samples.len().div_ceil(self.hop_length);
        let mut frames = Vec::with_capacity(frame_count);

        for i in 0..frame_count {
            let start = i * self.hop_length;
            let end = (start + self.window).min(signal.samples.len());
            let available = end - start;
            buffer[..available].copy_from_slice(&signal.samples[start..end]);
            buffer[available..].iter_mut().for_each(|s| *s = 0.0);

            let time = start as f64 / signal.sample_rate as f64;
            let frame = detector
                .get_pitch(&buffer, sample_rate, POWER_THRESHOLD, CLARITY_THRESHOLD)
                .map(|p| (p.frequency as f64, p.clarity as f64))
                .filter(|(hz, _)| {
                    hz.is_finite() && *hz >= self.frequency_range[0] && *hz <= self.frequency_range[1]
                })
                .map(|(hz, clarity)| Frame::new(time, hz, clarity.clamp(0.0, 1.0)))
                .unwrap_or_else(|| Frame::unvoiced(time));
            frames.push(frame);
        }

        median_filter_frequencies(&mut frames);

        let track = PitchTrack {
            frames,
            hop_length: self.hop_length,
            sample_rate: signal.sample_rate,
        };
        debug!(
            frames = track.frames.len(),
            voiced = track.voiced_count(),
            "Pitch tracking complete"
        );
        Ok(track)
    }
}

#[async_trait]
impl PitchTracker for McLeodPitchTracker {
    async fn track(&self, signal: &MonoSignal) -> Result<PitchTrack, CollaboratorError> {
        let tracker = self.clone();
        let signal = signal.clone();
        run_blocking(move || tracker.track_blocking(&signal)).await
    }
}

/// 3-tap median over the frequency track; endpoints are left as-is
fn median_filter_frequencies(frames: &mut [Frame]) {
    if frames.len() < 3 {
        return;
    }
    let original: Vec<f64> = frames.iter().map(|f| f.frequency).collect();
    for i in 1..frames.len() - 1 {
        let mut window = [original[i - 1], original[i], original[i + 1]];
        window.sort_by(|a, b| a.total_cmp(b));
        frames[i].frequency = window[1];
        if window[1] == 0.0 {
            frames[i].confidence = 0.0;
        }
    }
}
