//! Audio file decoding
//!
//! Decodes any container/codec symphonia supports into a stereo f32 signal
//! at the file's native sample rate. Mono files are duplicated to both
//! channels; files with more than two channels keep the first two.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::{run_blocking, AudioLoader, CollaboratorError, StereoSignal};

/// Symphonia-backed [`AudioLoader`]
#[derive(Debug, Clone, Default)]
pub struct SymphoniaLoader;

impl SymphoniaLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioLoader for SymphoniaLoader {
    async fn load(&self, path: &Path) -> Result<StereoSignal, CollaboratorError> {
        let path: PathBuf = path.to_path_buf();
        run_blocking(move || decode_stereo(&path)).await
    }
}

/// Decode a file to a stereo signal
pub fn decode_stereo(file_path: &Path) -> Result<StereoSignal> {
    debug!(path = %file_path.display(), "Decoding audio file");

    let file = std::fs::File::open(file_path)
        .with_context(|| format!("Failed to open audio file: {}", file_path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = file_path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("Failed to probe audio file: {}", file_path.display()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found in file")?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.context("Sample rate unknown")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .with_context(|| format!("Failed to create decoder for: {}", file_path.display()))?;

    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => bail!("Error reading packet: {}", e),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt packet; skip it and keep going
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(path = %file_path.display(), error = %e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to decode packet in: {}", file_path.display()))
            }
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let needed = decoded.capacity() * channels;
        if sample_buf.as_ref().is_some_and(|b| b.capacity() < needed) {
            sample_buf = None;
        }
        let buf = sample_buf
            .get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, spec));
        buf.copy_interleaved_ref(decoded);

        split_interleaved(buf.samples(), channels, &mut left, &mut right);
    }

    if left.is_empty() {
        bail!("No audio samples decoded from {}", file_path.display());
    }

    let signal = StereoSignal {
        left,
        right,
        sample_rate,
    };
    debug!(
        path = %file_path.display(),
        sample_rate,
        frames = signal.len(),
        duration_seconds = format!("{:.2}", signal.duration_seconds()),
        "Audio decoding complete"
    );
    Ok(signal)
}

/// Append interleaved frames to per-channel buffers
fn split_interleaved(samples: &[f32], channels: usize, left: &mut Vec<f32>, right: &mut Vec<f32>) {
    if channels == 0 {
        return;
    }
    for frame in samples.chunks_exact(channels) {
        left.push(frame[0]);
        right.push(if channels > 1 { frame[1] } else { frame[0] });
    }
}
