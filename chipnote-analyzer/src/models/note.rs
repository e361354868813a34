//! Pitch frames and quantized notes

use serde::{Deserialize, Serialize};

/// Key used for rests
pub const SILENCE_KEY: char = ' ';

/// One sample of the pitch track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame time in seconds
    pub time: f64,
    /// Fundamental frequency in Hz (0 when unvoiced)
    pub frequency: f64,
    /// Voicing confidence (0.0 - 1.0)
    pub confidence: f64,
}

impl Frame {
    pub fn new(time: f64, frequency: f64, confidence: f64) -> Self {
        Self {
            time,
            frequency,
            confidence,
        }
    }

    /// Unvoiced frame at `time`
    pub fn unvoiced(time: f64) -> Self {
        Self::new(time, 0.0, 0.0)
    }
}

/// A quantized note or rest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Alphabet symbol, or [`SILENCE_KEY`] for a rest
    pub key: char,
    /// Quantized frequency in Hz (0 for a rest)
    pub frequency: f64,
    /// Duration in beats
    pub duration: f64,
    /// Onset in seconds
    pub start_time: f64,
}

impl Note {
    pub fn new(key: char, frequency: f64, duration: f64, start_time: f64) -> Self {
        Self {
            key,
            frequency,
            duration,
            start_time,
        }
    }

    pub fn silence(duration: f64, start_time: f64) -> Self {
        Self::new(SILENCE_KEY, 0.0, duration, start_time)
    }

    pub fn is_silence(&self) -> bool {
        self.key == SILENCE_KEY
    }

    /// End of the note in seconds at the given tempo
    pub fn end_time(&self, tempo_bpm: f64) -> f64 {
        self.start_time + self.duration * 60.0 / tempo_bpm
    }
}

/// Notes in temporal order
pub type Sequence = Vec<Note>;
