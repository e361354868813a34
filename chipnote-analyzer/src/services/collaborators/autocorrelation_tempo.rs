//! Tempo estimation from onset-envelope autocorrelation
//!
//! 1. Frame RMS on a short hop, converted to log energy
//! 2. Onset strength = positive first difference (half-wave rectified flux)
//! 3. Autocorrelate the envelope over lags for 30-300 BPM
//! 4. Weight each lag by a log-normal prior centred on 120 BPM (one octave
//!    wide) so the beat level wins over its half- and double-time aliases
//!
//! The estimator reports whatever it finds; range checks and fallback to the
//! user's hint happen in the pipeline.

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{run_blocking, CollaboratorError, MonoSignal, TempoEstimator};

const MIN_SEARCH_BPM: f64 = 30.0;
const MAX_SEARCH_BPM: f64 = 300.0;
const PRIOR_CENTER_BPM: f64 = 120.0;

/// Log floor for silent frames
const ENERGY_FLOOR: f64 = 1e-6;

/// Autocorrelation-based [`TempoEstimator`]
#[derive(Debug, Clone)]
pub struct AutocorrelationTempoEstimator {
    pub frame_length: usize,
    pub hop: usize,
}

impl Default for AutocorrelationTempoEstimator {
    fn default() -> Self {
        Self {
            frame_length: 512,
            hop: 256,
        }
    }
}

#[async_trait]
impl TempoEstimator for AutocorrelationTempoEstimator {
    async fn estimate(&self, signal: &MonoSignal) -> Result<f64, CollaboratorError> {
        let estimator = self.clone();
        let signal = signal.clone();
        run_blocking(move || estimator.estimate_blocking(&signal)).await
    }
}

impl AutocorrelationTempoEstimator {
    fn estimate_blocking(&self, signal: &MonoSignal) -> Result<f64> {
        if signal.sample_rate == 0 || self.hop == 0 {
            bail!("invalid analysis parameters");
        }
        let envelope = self.onset_envelope(&signal.samples);
        let frame_rate = signal.sample_rate as f64 / self.hop as f64;

        let min_lag = ((60.0 * frame_rate / MAX_SEARCH_BPM).floor() as usize).max(1);
        let max_lag = (60.0 * frame_rate / MIN_SEARCH_BPM).ceil() as usize;
        if envelope.len() <= min_lag * 2 {
            bail!("audio too short for beat tracking");
        }
        if envelope.iter().all(|&v| v <= 0.0) {
            bail!("no onsets detected");
        }

        let max_lag = max_lag.min(envelope.len() - 1);
        let mut best_lag = 0;
        let mut best_score = 0.0;
        for lag in min_lag..=max_lag {
            let pairs = envelope.len() - lag;
            let sum: f64 = envelope[..pairs]
                .iter()
                .zip(&envelope[lag..])
                .map(|(a, b)| a * b)
                .sum();
            let bpm = 60.0 * frame_rate / lag as f64;
            let score = sum / pairs as f64 * tempo_prior(bpm);
            if score > best_score {
                best_score = score;
                best_lag = lag;
            }
        }

        if best_lag == 0 {
            bail!("no periodicity found in onset envelope");
        }

        let bpm = 60.0 * frame_rate / best_lag as f64;
        debug!(bpm = format!("{:.1}", bpm), lag = best_lag, "Tempo estimated");
        Ok(bpm)
    }

    /// Half-wave rectified log-RMS flux
    fn onset_envelope(&self, samples: &[f32]) -> Vec<f64> {
        if samples.len() < self.frame_length || self.frame_length == 0 {
            return Vec::new();
        }
        let frames = 1 + (samples.len() - self.frame_length) / self.hop;
        let log_energy: Vec<f64> = (0..frames)
            .map(|i| {
                let frame = &samples[i * self.hop..i * self.hop + self.frame_length];
                let mean_square =
                    frame.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / frame.len() as f64;
                (mean_square.sqrt() + ENERGY_FLOOR).ln()
            })
            .collect();

        let mut envelope = Vec::with_capacity(frames);
        envelope.push(0.0);
        envelope.extend(log_energy.windows(2).map(|w| (w[1] - w[0]).max(0.0)));
        envelope
    }
}

/// Log-normal weight, one octave standard deviation
fn tempo_prior(bpm: f64) -> f64 {
    let octaves = (bpm / PRIOR_CENTER_BPM).log2();
    (-0.5 * octaves * octaves).exp()
}
