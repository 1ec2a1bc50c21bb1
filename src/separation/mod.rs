//! Stem separation: splits a mono mix into per-instrument-class stems.
//!
//! # Strategy
//!
//! ```text
//!            ┌─ median over time  ──► H (harmonic)
//! |STFT| ────┤
//!            └─ median over freq  ──► P (percussive)
//!
//! p = P² / (H² + P²)        h = 1 − p
//!
//! drums  = ISTFT(X · p)
//! bass   = ISTFT(X · h · low(f))               below the bass crossover
//! melody = ISTFT(X · h · (1 − low(f)) · band(f)) up to the melody cutoff
//! other  = x − drums − bass − melody            (time-domain remainder)
//! ```
//!
//! Because `other` is the exact remainder, the stems always sum back to the
//! input; the residual is still measured and checked against the configured
//! bound before a [`Stems`] is returned.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::audio::spectrum::{bin_frequency, energy, Stft};
use crate::audio::AudioAsset;
use crate::config::SeparationConfig;

// ---------------------------------------------------------------------------
// InstrumentClass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
    Drums,
    Bass,
    Melody,
    Other,
}

impl InstrumentClass {
    pub const ALL: [InstrumentClass; 4] = [Self::Drums, Self::Bass, Self::Melody, Self::Other];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Drums => "drums",
            Self::Bass => "bass",
            Self::Melody => "melody",
            Self::Other => "other",
        }
    }

    /// Whether the stem carries pitched material worth pitch-tracking.
    pub fn is_pitched(&self) -> bool {
        matches!(self, Self::Bass | Self::Melody)
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Stems / StemSet
// ---------------------------------------------------------------------------

/// In-memory separation output.
#[derive(Debug, Clone)]
pub struct Stems {
    pub sample_rate: u32,
    pub tracks: BTreeMap<InstrumentClass, Vec<f32>>,
    /// Energy of `input − Σ stems` relative to the input, in dB.
    pub residual_db: f32,
}

impl Stems {
    pub fn len(&self) -> usize {
        self.tracks.values().next().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample-wise sum of every stem.
    pub fn sum(&self) -> Vec<f32> {
        let mut out = vec![0.0_f32; self.len()];
        for track in self.tracks.values() {
            for (o, &s) in out.iter_mut().zip(track) {
                *o += s;
            }
        }
        out
    }
}

/// Persisted stems of one successful separation. Immutable; a retried
/// transform reuses it instead of separating again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemSet {
    pub id: Uuid,
    pub stems: BTreeMap<InstrumentClass, AudioAsset>,
    pub created_at: DateTime<Utc>,
}

impl StemSet {
    pub fn new(stems: BTreeMap<InstrumentClass, AudioAsset>) -> Self {
        Self {
            id: Uuid::new_v4(),
            stems,
            created_at: Utc::now(),
        }
    }

    pub fn get(&self, class: InstrumentClass) -> Option<&AudioAsset> {
        self.stems.get(&class)
    }
}

// ---------------------------------------------------------------------------
// SeparationError
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SeparationError {
    #[error("invalid audio for separation: {0}")]
    InvalidAudio(String),

    #[error("input of {duration_secs:.1}s exceeds the separation ceiling of {limit_secs:.1}s")]
    ProcessingTimeout { duration_secs: f32, limit_secs: f32 },

    #[error("stems do not reconstruct the input: residual {residual_db:.1} dB (bound {bound_db:.1} dB)")]
    ResidualTooHigh { residual_db: f32, bound_db: f32 },
}

// ---------------------------------------------------------------------------
// StemSeparator
// ---------------------------------------------------------------------------

pub struct StemSeparator {
    config: SeparationConfig,
    stft: Stft,
}

impl StemSeparator {
    pub fn new(config: SeparationConfig) -> Self {
        let stft = Stft::new(config.fft_size, config.hop_size);
        Self { config, stft }
    }

    pub fn separate(&self, samples: &[f32], sample_rate: u32) -> Result<Stems, SeparationError> {
        if samples.is_empty() || sample_rate == 0 {
            return Err(SeparationError::InvalidAudio("empty input".into()));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(SeparationError::InvalidAudio(
                "input contains non-finite samples".into(),
            ));
        }

        let duration_secs = samples.len() as f32 / sample_rate as f32;
        if duration_secs > self.config.max_duration_secs {
            return Err(SeparationError::ProcessingTimeout {
                duration_secs,
                limit_secs: self.config.max_duration_secs,
            });
        }

        let spec = self.stft.analyze(samples);
        let mags = spec.magnitudes();
        let harmonic = median_across_time(&mags, self.config.harmonic_kernel);
        let percussive = median_across_freq(&mags, self.config.percussive_kernel);

        let n_bins = spec.n_bins();
        let low: Vec<f32> = (0..n_bins)
            .map(|k| {
                let f = bin_frequency(k, spec.n_fft, sample_rate);
                1.0 - rising_edge(f, self.config.bass_cutoff_hz)
            })
            .collect();
        let band: Vec<f32> = (0..n_bins)
            .map(|k| {
                let f = bin_frequency(k, spec.n_fft, sample_rate);
                1.0 - rising_edge(f, self.config.melody_cutoff_hz)
            })
            .collect();

        let mut drums = spec.clone();
        let mut bass = spec.clone();
        let mut melody = spec.clone();

        for t in 0..spec.n_frames() {
            for k in 0..n_bins {
                let h2 = harmonic[t][k] * harmonic[t][k];
                let p2 = percussive[t][k] * percussive[t][k];
                let p = if h2 + p2 > 1e-20 { p2 / (h2 + p2) } else { 0.5 };
                let h = 1.0 - p;
                let x = spec.frames[t][k];

                drums.frames[t][k] = x * p;
                bass.frames[t][k] = x * (h * low[k]);
                melody.frames[t][k] = x * (h * (1.0 - low[k]) * band[k]);
            }
        }

        let len = samples.len();
        let drums = self.stft.synthesize(&drums, len);
        let bass = self.stft.synthesize(&bass, len);
        let melody = self.stft.synthesize(&melody, len);
        let other: Vec<f32> = (0..len)
            .map(|i| samples[i] - drums[i] - bass[i] - melody[i])
            .collect();

        let mut tracks = BTreeMap::new();
        tracks.insert(InstrumentClass::Drums, drums);
        tracks.insert(InstrumentClass::Bass, bass);
        tracks.insert(InstrumentClass::Melody, melody);
        tracks.insert(InstrumentClass::Other, other);

        let mut stems = Stems {
            sample_rate,
            tracks,
            residual_db: f32::NEG_INFINITY,
        };
        stems.residual_db = residual_db(samples, &stems.sum());

        if stems.residual_db > self.config.max_residual_db {
            return Err(SeparationError::ResidualTooHigh {
                residual_db: stems.residual_db,
                bound_db: self.config.max_residual_db,
            });
        }

        log::debug!(
            "separation: {:.2}s, {} frames, residual {:.1} dB",
            duration_secs,
            spec.n_frames(),
            stems.residual_db
        );

        Ok(stems)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Energy of `original − reconstructed` relative to `original`, in dB.
pub fn residual_db(original: &[f32], reconstructed: &[f32]) -> f32 {
    let reference = energy(original);
    let diff: Vec<f32> = original
        .iter()
        .zip(reconstructed)
        .map(|(a, b)| a - b)
        .collect();
    let err = energy(&diff);
    if err <= 0.0 {
        return f32::NEG_INFINITY;
    }
    if reference <= 0.0 {
        return f32::INFINITY;
    }
    (10.0 * (err / reference).log10()) as f32
}

/// 0 well below `cutoff`, 1 well above, raised-cosine in `[0.75, 1.25] × cutoff`.
fn rising_edge(freq: f32, cutoff: f32) -> f32 {
    let lo = cutoff * 0.75;
    let hi = cutoff * 1.25;
    if freq <= lo {
        0.0
    } else if freq >= hi {
        1.0
    } else {
        let x = (freq - lo) / (hi - lo);
        0.5 - 0.5 * (std::f32::consts::PI * x).cos()
    }
}

fn median(buf: &mut [f32]) -> f32 {
    if buf.is_empty() {
        return 0.0;
    }
    let mid = buf.len() / 2;
    let (_, m, _) = buf.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

fn median_across_time(mags: &[Vec<f32>], kernel: usize) -> Vec<Vec<f32>> {
    let half = kernel / 2;
    let n_frames = mags.len();
    let n_bins = mags.first().map_or(0, Vec::len);
    let mut buf = Vec::with_capacity(kernel.max(1));

    let mut out = vec![vec![0.0_f32; n_bins]; n_frames];
    for t in 0..n_frames {
        let lo = t.saturating_sub(half);
        let hi = (t + half + 1).min(n_frames);
        for k in 0..n_bins {
            buf.clear();
            buf.extend(mags[lo..hi].iter().map(|frame| frame[k]));
            out[t][k] = median(&mut buf);
        }
    }
    out
}

fn median_across_freq(mags: &[Vec<f32>], kernel: usize) -> Vec<Vec<f32>> {
    let half = kernel / 2;
    let mut buf = Vec::with_capacity(kernel.max(1));

    mags.iter()
        .map(|frame| {
            let n_bins = frame.len();
            (0..n_bins)
                .map(|k| {
                    let lo = k.saturating_sub(half);
                    let hi = (k + half + 1).min(n_bins);
                    buf.clear();
                    buf.extend_from_slice(&frame[lo..hi]);
                    median(&mut buf)
                })
                .collect()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 22_050;

    fn sine(freq: f32, secs: f32, amp: f32) -> Vec<f32> {
        let n = (secs * RATE as f32) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32).sin() * amp)
            .collect()
    }

    /// Short decaying noise bursts every `period_secs`.
    fn clicks(secs: f32, period_secs: f32, amp: f32) -> Vec<f32> {
        let n = (secs * RATE as f32) as usize;
        let period = (period_secs * RATE as f32) as usize;
        let mut state = 0x1234_5678_u32;
        (0..n)
            .map(|i| {
                let pos = i % period;
                if pos < 400 {
                    state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                    let noise = (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0;
                    noise * amp * (-(pos as f32) / 80.0).exp()
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn separator() -> StemSeparator {
        StemSeparator::new(SeparationConfig::default())
    }

    fn share(stems: &Stems, class: InstrumentClass) -> f64 {
        let total: f64 = stems.tracks.values().map(|t| energy(t)).sum();
        energy(&stems.tracks[&class]) / total
    }

    #[test]
    fn stems_sum_back_to_input() {
        let a = sine(80.0, 2.0, 0.3);
        let b = sine(660.0, 2.0, 0.2);
        let c = clicks(2.0, 0.5, 0.6);
        let mix: Vec<f32> = (0..a.len()).map(|i| a[i] + b[i] + c[i]).collect();

        let stems = separator().separate(&mix, RATE).unwrap();
        assert_eq!(stems.tracks.len(), 4);
        assert!(stems.residual_db <= -40.0, "residual {}", stems.residual_db);
        assert!(residual_db(&mix, &stems.sum()) <= -40.0);
        assert!(stems.tracks.values().all(|t| t.len() == mix.len()));
    }

    #[test]
    fn low_sine_lands_in_bass() {
        let stems = separator().separate(&sine(70.0, 2.0, 0.5), RATE).unwrap();
        assert!(share(&stems, InstrumentClass::Bass) > 0.6);
    }

    #[test]
    fn mid_sine_lands_in_melody() {
        let stems = separator().separate(&sine(880.0, 2.0, 0.5), RATE).unwrap();
        assert!(share(&stems, InstrumentClass::Melody) > 0.6);
    }

    #[test]
    fn clicks_land_in_drums() {
        let stems = separator().separate(&clicks(2.0, 0.5, 0.8), RATE).unwrap();
        assert!(share(&stems, InstrumentClass::Drums) > 0.5);
    }

    #[test]
    fn long_input_exceeds_ceiling() {
        let mut config = SeparationConfig::default();
        config.max_duration_secs = 1.0;
        let err = StemSeparator::new(config)
            .separate(&sine(100.0, 1.5, 0.5), RATE)
            .unwrap_err();
        assert!(
            matches!(err, SeparationError::ProcessingTimeout { .. }),
            "{err}"
        );
    }

    #[test]
    fn malformed_input_is_invalid() {
        assert!(matches!(
            separator().separate(&[], RATE),
            Err(SeparationError::InvalidAudio(_))
        ));
        let mut bad = sine(100.0, 0.5, 0.5);
        bad[10] = f32::NAN;
        assert!(matches!(
            separator().separate(&bad, RATE),
            Err(SeparationError::InvalidAudio(_))
        ));
    }

    #[test]
    fn rising_edge_is_smooth_and_bounded() {
        assert_eq!(rising_edge(100.0, 200.0), 0.0);
        assert_eq!(rising_edge(300.0, 200.0), 1.0);
        assert!((rising_edge(200.0, 200.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn class_names_are_stable() {
        let names: Vec<_> = InstrumentClass::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["drums", "bass", "melody", "other"]);
        assert!(InstrumentClass::Melody.is_pitched());
        assert!(!InstrumentClass::Drums.is_pitched());
    }
}
