//! Frequency quantization to the sequencer's key alphabet
//!
//! Frequencies are snapped in two steps, both by minimum semitone distance:
//! first to the C major pentatonic scale, then to the key alphabet. Every
//! pentatonic tone is also an alphabet entry, so the output is always one of
//! the 13 pentatonic tones and quantizing twice gives the same value.

use thiserror::Error;

use crate::models::SILENCE_KEY;

/// Key alphabet: (symbol, frequency Hz), ascending
pub const FREQUENCY_ALPHABET: [(char, f64); 24] = [
    ('1', 65.41),
    ('2', 73.42),
    ('3', 82.41),
    ('4', 87.31),
    ('5', 98.00),
    ('6', 110.00),
    ('7', 123.47),
    ('a', 130.81),
    ('s', 146.83),
    ('d', 164.81),
    ('f', 174.61),
    ('g', 196.00),
    ('h', 220.00),
    ('j', 246.94),
    ('k', 261.63),
    ('l', 293.66),
    ('z', 329.63),
    ('x', 349.23),
    ('c', 392.00),
    ('v', 440.00),
    ('b', 493.88),
    ('n', 523.25),
    ('m', 587.33),
    ('p', 659.25),
];

/// C major pentatonic (C D E G A) over octaves 3-5, ascending
pub const PENTATONIC_SCALE: [f64; 13] = [
    130.81, 146.83, 164.81, 196.00, 220.00, // octave 3
    261.63, 293.66, 329.63, 392.00, 440.00, // octave 4
    523.25, 587.33, 659.25, // octave 5
];

/// Reference tuning (A4)
const TUNING_HZ: f64 = 440.0;

/// MIDI note number of the reference tuning
const TUNING_SEMITONE: f64 = 69.0;

/// Input clamp range; keeps the log well away from zero
const MIN_INPUT_HZ: f64 = 20.0;
const MAX_INPUT_HZ: f64 = 8000.0;

/// Frequency outside the logarithmic pitch domain
#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum QuantizeError {
    #[error("frequency is not finite: {0}")]
    NonFinite(f64),

    #[error("frequency must be positive: {0}")]
    NonPositive(f64),
}

/// Frequency in Hz to semitones (12 per octave, A4 = 69)
pub fn hz_to_semitones(hz: f64) -> Result<f64, QuantizeError> {
    if !hz.is_finite() {
        return Err(QuantizeError::NonFinite(hz));
    }
    if hz <= 0.0 {
        return Err(QuantizeError::NonPositive(hz));
    }
    Ok(12.0 * (hz / TUNING_HZ).log2() + TUNING_SEMITONE)
}

/// Absolute pitch distance between two frequencies, in semitones
pub fn semitone_distance(a_hz: f64, b_hz: f64) -> Result<f64, QuantizeError> {
    Ok((hz_to_semitones(a_hz)? - hz_to_semitones(b_hz)?).abs())
}

/// Snap a frequency to the key alphabet
///
/// Returns 0.0 for non-positive or non-finite input.
pub fn quantize(hz: f64) -> f64 {
    if !hz.is_finite() || hz <= 0.0 {
        return 0.0;
    }
    let clamped = hz.clamp(MIN_INPUT_HZ, MAX_INPUT_HZ);

    let pentatonic = nearest(PENTATONIC_SCALE.iter().copied(), clamped);
    nearest(FREQUENCY_ALPHABET.iter().map(|&(_, f)| f), pentatonic)
}

/// Alphabet symbol for an already-quantized frequency
///
/// Exact lookup; anything that is not an alphabet frequency (including 0)
/// maps to the silence key.
pub fn to_symbol(hz: f64) -> char {
    if !hz.is_finite() || hz <= 0.0 {
        return SILENCE_KEY;
    }
    FREQUENCY_ALPHABET
        .iter()
        .find(|&&(_, f)| f == hz)
        .map(|&(symbol, _)| symbol)
        .unwrap_or(SILENCE_KEY)
}

/// Candidate closest to `target_hz` in semitones; ties go to the first
/// candidate in iteration order.
fn nearest(candidates: impl Iterator<Item = f64>, target_hz: f64) -> f64 {
    // target is clamped to a positive finite range by the caller
    let target = 12.0 * (target_hz / TUNING_HZ).log2();

    let mut best = 0.0;
    let mut best_distance = f64::INFINITY;
    for candidate in candidates {
        let distance = (12.0 * (candidate / TUNING_HZ).log2() - target).abs();
        if distance < best_distance {
            best = candidate;
            best_distance = distance;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep() -> impl Iterator<Item = f64> {
        // 20 Hz .. 8 kHz in quarter-semitone steps, plus a few outliers
        (0..=415)
            .map(|i| 20.0 * 2f64.powf(i as f64 / 48.0))
            .chain([0.5, 1.0, 9000.0, 20000.0])
    }

    #[test]
    fn test_alphabet_is_strictly_increasing() {
        for pair in FREQUENCY_ALPHABET.windows(2) {
            assert!(pair[0].1 < pair[1].1);
        }
        for pair in PENTATONIC_SCALE.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_pentatonic_tones_are_alphabet_entries() {
        for tone in PENTATONIC_SCALE {
            assert_ne!(to_symbol(tone), SILENCE_KEY, "{tone} missing from alphabet");
        }
    }

    #[test]
    fn test_output_is_alphabet_member() {
        for hz in sweep() {
            let q = quantize(hz);
            assert_ne!(to_symbol(q), SILENCE_KEY, "quantize({hz}) = {q} not in alphabet");
        }
    }

    #[test]
    fn test_quantize_is_idempotent() {
        for hz in sweep() {
            let once = quantize(hz);
            assert_eq!(quantize(once), once, "not idempotent at {hz}");
        }
        for (_, hz) in FREQUENCY_ALPHABET {
            let once = quantize(hz);
            assert_eq!(quantize(once), once);
        }
    }

    #[test]
    fn test_invalid_input_maps_to_zero_and_space() {
        for hz in [0.0, -1.0, -440.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(quantize(hz), 0.0);
            assert_eq!(to_symbol(hz), ' ');
        }
    }

    #[test]
    fn test_known_values() {
        assert_eq!(quantize(440.0), 440.0);
        assert_eq!(to_symbol(440.0), 'v');

        // Slightly sharp A4 stays on A4
        assert_eq!(quantize(452.0), 440.0);

        // F4 is not pentatonic; nearer to E4 (1 semitone) than G4 (2)
        assert_eq!(quantize(349.23), 329.63);
        assert_eq!(to_symbol(329.63), 'z');

        // Below the scale snaps to its lowest tone
        assert_eq!(quantize(65.41), 130.81);
        // Above the scale snaps to its highest tone
        assert_eq!(quantize(5000.0), 659.25);
    }

    #[test]
    fn test_symbol_lookup_is_exact() {
        assert_eq!(to_symbol(440.0), 'v');
        assert_eq!(to_symbol(440.01), ' ');
    }

    #[test]
    fn test_semitone_distance() {
        let octave = semitone_distance(220.0, 440.0).unwrap();
        assert!((octave - 12.0).abs() < 1e-9);

        assert_eq!(
            semitone_distance(0.0, 440.0),
            Err(QuantizeError::NonPositive(0.0))
        );
        assert!(matches!(
            semitone_distance(440.0, f64::NAN),
            Err(QuantizeError::NonFinite(_))
        ));
    }
}
