//! Style-parameterised spectral transformation of stems.
//!
//! Every stem of one job goes through the same three steps with the same
//! parameters, so the stems stay aligned in time and in key:
//!
//! ```text
//! stem ─► phase-vocoder stretch by r/t ─► EQ at post-shift frequency
//!      ─► sinc resample by 1/r ─► exact length round(len / t)
//!
//! r = 2^(semitones / 12)     t = tempo_ratio
//! ```
//!
//! The path contains no randomness; equal input and parameters give
//! bit-identical output.

pub mod preset;
pub mod vocoder;

use thiserror::Error;

use crate::audio::resample::resample_by_ratio;
use crate::audio::spectrum::{bin_frequency, Stft};
use crate::config::TransformConfig;

pub use preset::{EqCurve, LyricStructure, StylePreset, TransformParams, UnknownPreset};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    #[error("malformed stem: {0}")]
    InvalidAudio(String),

    #[error("resampling failed: {0}")]
    Resample(String),
}

pub struct SpectralTransformer {
    stft: Stft,
}

impl SpectralTransformer {
    pub fn new(config: &TransformConfig) -> Self {
        Self {
            stft: Stft::new(config.fft_size, config.hop_size),
        }
    }

    /// Output length for an input of `len` samples.
    pub fn output_len(len: usize, params: &TransformParams) -> usize {
        (len as f64 / params.tempo_ratio as f64).round() as usize
    }

    pub fn transform_stem(
        &self,
        samples: &[f32],
        sample_rate: u32,
        params: &TransformParams,
    ) -> Result<Vec<f32>, TransformError> {
        if samples.is_empty() {
            return Err(TransformError::InvalidAudio("empty stem".into()));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(TransformError::InvalidAudio(
                "stem contains non-finite samples".into(),
            ));
        }

        let pitch = params.pitch_ratio();
        let stretch = pitch / params.tempo_ratio as f64;
        let target_len = Self::output_len(samples.len(), params);

        // Bin k ends up at f_k * r once the resampler shifts the pitch.
        let n_fft = self.stft.n_fft();
        let gains: Vec<f32> = (0..n_fft / 2 + 1)
            .map(|k| {
                let shifted = bin_frequency(k, n_fft, sample_rate) * pitch as f32;
                params.eq_curve.gain_linear(shifted.max(1.0))
            })
            .collect();

        let stretched = vocoder::time_stretch(&self.stft, samples, stretch, &gains);
        let mut out = resample_by_ratio(&stretched, 1.0 / pitch)
            .map_err(|e| TransformError::Resample(e.to_string()))?;
        out.resize(target_len, 0.0);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::spectrum::spectral_centroid;
    use crate::separation::InstrumentClass;
    use std::collections::BTreeMap;

    const RATE: u32 = 44_100;

    fn sine(freq: f32, secs: f32) -> Vec<f32> {
        let n = (secs * RATE as f32) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32).sin() * 0.5)
            .collect()
    }

    fn transformer() -> SpectralTransformer {
        SpectralTransformer::new(&TransformConfig::default())
    }

    #[test]
    fn trap_stretches_four_seconds_to_about_4_21() {
        let input = sine(440.0, 4.0);
        let params = StylePreset::Trap.transform_params();
        let out = transformer().transform_stem(&input, RATE, &params).unwrap();

        assert_eq!(out.len(), (176_400.0_f64 / 0.95).round() as usize);
        let secs = out.len() as f64 / RATE as f64;
        assert!((secs - 4.21).abs() < 0.01, "duration {secs}");
    }

    #[test]
    fn trap_lowers_centroid_by_two_semitones() {
        let input = sine(440.0, 4.0);
        let params = StylePreset::Trap.transform_params();
        let out = transformer().transform_stem(&input, RATE, &params).unwrap();

        let ratio = spectral_centroid(&out, RATE) / spectral_centroid(&input, RATE);
        let expected = 2f32.powf(-2.0 / 12.0);
        assert!((ratio - expected).abs() < 0.03, "ratio {ratio}, expected {expected}");
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let input: Vec<f32> = sine(220.0, 1.0)
            .iter()
            .zip(sine(1_250.0, 1.0))
            .map(|(a, b)| a + b * 0.3)
            .collect();
        let params = StylePreset::LoFi.transform_params();
        let t = transformer();
        let a = t.transform_stem(&input, RATE, &params).unwrap();
        let b = t.transform_stem(&input, RATE, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn all_stems_share_one_output_length() {
        let mut tracks = BTreeMap::new();
        tracks.insert(InstrumentClass::Bass, sine(80.0, 1.0));
        tracks.insert(InstrumentClass::Melody, sine(660.0, 1.0));

        let params = StylePreset::BoomBap.transform_params();
        let t = transformer();
        let expected = SpectralTransformer::output_len(RATE as usize, &params);
        for samples in tracks.values() {
            let out = t.transform_stem(samples, RATE, &params).unwrap();
            assert_eq!(out.len(), expected);
        }
    }

    #[test]
    fn malformed_stem_rejected() {
        let params = StylePreset::Drill.transform_params();
        let err = transformer()
            .transform_stem(&[0.0, f32::INFINITY], RATE, &params)
            .unwrap_err();
        assert!(matches!(err, TransformError::InvalidAudio(_)));
        assert!(transformer().transform_stem(&[], RATE, &params).is_err());
    }
}
