//! Periodicity-based pitch estimation.

use crate::audio::spectrum::autocorrelation;

/// Fundamental frequency of `frame` in Hz, or `None` when the frame is not
/// voiced strongly enough.
///
/// Uses the normalised, unbiased autocorrelation and takes the shortest lag
/// whose correlation is within 10 % of the best one, which keeps sub-octave
/// lags from winning on strongly periodic material.
pub fn estimate_pitch(
    frame: &[f32],
    sample_rate: u32,
    min_hz: f32,
    max_hz: f32,
    voicing_threshold: f32,
) -> Option<f32> {
    let n = frame.len();
    if n < 4 || min_hz <= 0.0 || max_hz <= min_hz {
        return None;
    }
    let min_lag = ((sample_rate as f32 / max_hz).floor() as usize).max(2);
    let max_lag = ((sample_rate as f32 / min_hz).ceil() as usize).min(n - 2);
    if min_lag + 1 >= max_lag {
        return None;
    }

    let mean = frame.iter().sum::<f32>() / n as f32;
    let centred: Vec<f32> = frame.iter().map(|&s| s - mean).collect();
    let ac = autocorrelation(&centred, max_lag + 1);
    if ac[0] <= 1e-9 {
        return None;
    }

    let norm: Vec<f32> = ac
        .iter()
        .enumerate()
        .map(|(lag, &v)| v * n as f32 / (n - lag) as f32 / ac[0])
        .collect();

    let best = (min_lag..=max_lag)
        .map(|lag| norm[lag])
        .fold(f32::MIN, f32::max);
    if best < voicing_threshold {
        return None;
    }

    let lag = (min_lag..=max_lag).find(|&lag| {
        norm[lag] >= 0.9 * best && norm[lag] >= norm[lag - 1] && norm[lag] >= norm[lag + 1]
    })?;

    // Parabolic refinement around the chosen lag.
    let (a, b, c) = (norm[lag - 1], norm[lag], norm[lag + 1]);
    let denom = a - 2.0 * b + c;
    let shift = if denom.abs() > 1e-12 {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    Some(sample_rate as f32 / (lag as f32 + shift))
}

/// Nearest equal-tempered MIDI note for `freq_hz`.
pub fn hz_to_midi(freq_hz: f32) -> u8 {
    (69.0 + 12.0 * (freq_hz / 440.0).log2())
        .round()
        .clamp(0.0, 127.0) as u8
}

pub fn midi_to_hz(note: u8) -> f32 {
    440.0 * 2f32.powf((note as f32 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| {
                let t = i as f32 / 44_100.0;
                (2.0 * std::f32::consts::PI * freq * t).sin() * 0.6
                    + (2.0 * std::f32::consts::PI * 2.0 * freq * t).sin() * 0.3
            })
            .collect()
    }

    #[test]
    fn finds_fundamental_of_harmonic_tone() {
        for freq in [82.4_f32, 220.0, 440.0, 987.8] {
            let f = estimate_pitch(&tone(freq, 2048), 44_100, 40.0, 2_000.0, 0.5).unwrap();
            assert!((f - freq).abs() / freq < 0.01, "{freq} -> {f}");
        }
    }

    #[test]
    fn noise_is_unvoiced() {
        let mut state = 7_u32;
        let noise: Vec<f32> = (0..2048)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                ((state >> 16) & 0x7fff) as f32 / 16_384.0 - 1.0
            })
            .collect();
        assert!(estimate_pitch(&noise, 44_100, 40.0, 2_000.0, 0.5).is_none());
    }

    #[test]
    fn silence_is_unvoiced() {
        assert!(estimate_pitch(&[0.0; 2048], 44_100, 40.0, 2_000.0, 0.5).is_none());
    }

    #[test]
    fn midi_conversions() {
        assert_eq!(hz_to_midi(440.0), 69);
        assert_eq!(hz_to_midi(261.63), 60);
        assert!((midi_to_hz(57) - 220.0).abs() < 1e-3);
    }
}
