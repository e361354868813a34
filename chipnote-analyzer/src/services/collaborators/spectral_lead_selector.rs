//! Lead stem heuristic
//!
//! Scores each stem by how "lead-like" its spectrum is: peak short-time
//! energy in the 2-5 kHz presence band times the variance of the spectral
//! centroid over time. Near-silent stems are skipped.

use anyhow::Result;
use async_trait::async_trait;
use realfft::RealFftPlanner;
use tracing::debug;

use super::{run_blocking, CollaboratorError, LeadSelection, LeadSelector, MonoSignal, Stem};

/// Stems whose peak amplitude is below this are ignored
pub const SILENT_PEAK: f32 = 0.001;

/// Spectral lead selector
#[derive(Debug, Clone)]
pub struct SpectralLeadSelector {
    pub n_fft: usize,
    pub hop: usize,
    /// Presence band in Hz, `(low, high)`
    pub band: (f32, f32),
}

impl Default for SpectralLeadSelector {
    fn default() -> Self {
        Self {
            n_fft: 1024,
            hop: 256,
            band: (2000.0, 5000.0),
        }
    }
}

#[async_trait]
impl LeadSelector for SpectralLeadSelector {
    async fn select_lead(&self, stems: Vec<Stem>) -> Result<LeadSelection, CollaboratorError> {
        let selector = self.clone();
        run_blocking(move || selector.select(stems)).await
    }
}

impl SpectralLeadSelector {
    fn select(&self, stems: Vec<Stem>) -> Result<LeadSelection> {
        let mut best: Option<LeadSelection> = None;

        for stem in stems {
            let mono = stem.signal.to_mono();
            let peak = mono.peak();
            if peak < SILENT_PEAK {
                debug!(stem = %stem.name, peak, "Skipping near-silent stem");
                continue;
            }

            let score = self.score(&mono);
            debug!(stem = %stem.name, peak, score, "Scored stem");

            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(LeadSelection {
                    stem_name: stem.name,
                    signal: mono,
                    score,
                });
            }
        }

        best.ok_or_else(|| anyhow::anyhow!("Could not identify lead stem"))
    }

    /// `max(band energy) × var(spectral centroid)` over STFT frames
    pub fn score(&self, signal: &MonoSignal) -> f64 {
        let frames = self.stft_magnitudes(&signal.samples);
        if frames.is_empty() {
            return 0.0;
        }

        let bin_width = signal.sample_rate as f32 / self.n_fft as f32;
        let mut max_band_energy = 0.0f64;
        let mut centroids = Vec::with_capacity(frames.len());

        for spectrum in &frames {
            let mut band_energy = 0.0f64;
            let mut weighted = 0.0f64;
            let mut total = 0.0f64;
            for (bin, &magnitude) in spectrum.iter().enumerate() {
                let freq = bin as f32 * bin_width;
                if freq >= self.band.0 && freq <= self.band.1 {
                    band_energy += (magnitude * magnitude) as f64;
                }
                weighted += (freq * magnitude) as f64;
                total += magnitude as f64;
            }
            max_band_energy = max_band_energy.max(band_energy);
            centroids.push(if total > 0.0 { weighted / total } else { 0.0 });
        }

        max_band_energy * variance(&centroids)
    }

    /// Hann-windowed magnitude spectra; short input is zero-padded to one frame
    fn stft_magnitudes(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        if samples.is_empty() || self.n_fft == 0 || self.hop == 0 {
            return Vec::new();
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(self.n_fft);
        let window = hann_window(self.n_fft);
        let mut input = fft.make_input_vec();
        let mut output = fft.make_output_vec();

        let frame_count = if samples.len() <= self.n_fft {
            1
        } else {
            1 + (samples.len() - self.n_fft) / self.hop
        };

        let mut spectra = Vec::with_capacity(frame_count);
        for frame in 0..frame_count {
            let start = frame * self.hop;
            input.iter_mut().for_each(|x| *x = 0.0);
            for (i, (slot, &w)) in input.iter_mut().zip(&window).enumerate() {
                if let Some(&s) = samples.get(start + i) {
                    *slot = s * w;
                }
            }
            // Buffers come from the plan, so lengths always match
            if fft.process(&mut input, &mut output).is_err() {
                continue;
            }
            spectra.push(output.iter().map(|c| c.norm()).collect());
        }
        spectra
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos()))
        .collect()
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}
