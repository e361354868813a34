//! Audio Test Fixture Generator
//!
//! WAV tones for end-to-end runs and multipart bodies for upload requests

use std::path::{Path, PathBuf};

/// Multipart boundary used by [`multipart_body`]
pub const BOUNDARY: &str = "chipnote-test-boundary";

/// Configuration for a generated tone
#[derive(Debug, Clone)]
pub struct ToneConfig {
    pub frequency: f32,
    pub duration_seconds: f32,
    pub sample_rate: u32,
    pub amplitude: f32,
    /// Trailing silence after the tone
    pub silence_seconds: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency: 440.0,
            duration_seconds: 0.5,
            sample_rate: 44100,
            amplitude: 0.5,
            silence_seconds: 0.0,
        }
    }
}

/// Write a 16-bit stereo sine tone
pub fn generate_test_wav(path: &Path, config: &ToneConfig) -> anyhow::Result<PathBuf> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    let tone_samples = (config.duration_seconds * config.sample_rate as f32) as usize;
    let silence_samples = (config.silence_seconds * config.sample_rate as f32) as usize;

    for i in 0..tone_samples + silence_samples {
        let value = if i < tone_samples {
            let t = i as f32 / config.sample_rate as f32;
            config.amplitude * (2.0 * std::f32::consts::PI * config.frequency * t).sin()
        } else {
            0.0
        };
        let sample = (value * i16::MAX as f32) as i16;
        writer.write_sample(sample)?;
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(path.to_path_buf())
}

/// Build a multipart/form-data body with an optional file part and an
/// optional `bpm_hint` part
pub fn multipart_body(file: Option<(&str, &[u8])>, bpm_hint: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();

    if let Some((filename, data)) = file {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }

    if let Some(hint) = bpm_hint {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"bpm_hint\"\r\n\r\n");
        body.extend_from_slice(hint.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
