//! Tempo estimation and rhythmic grid quantisation.

use serde::{Deserialize, Serialize};

use crate::audio::spectrum::autocorrelation;

/// A beat grid: `subdivision` steps per beat, anchored at `offset_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoGrid {
    pub bpm: f32,
    pub subdivision: u32,
    pub offset_secs: f64,
}

impl TempoGrid {
    pub fn new(bpm: f32, subdivision: u32, offset_secs: f64) -> Self {
        let mut grid = Self {
            bpm,
            subdivision: subdivision.max(1),
            offset_secs: 0.0,
        };
        // Keep the anchor within the first step so snapping never lands
        // before the start of the signal more than necessary.
        grid.offset_secs = offset_secs.rem_euclid(grid.step_secs());
        grid
    }

    /// Length of one grid step in seconds.
    pub fn step_secs(&self) -> f64 {
        60.0 / self.bpm as f64 / self.subdivision as f64
    }

    /// Nearest grid position to `time_secs`, never negative.
    ///
    /// ```
    /// use lyrics_beats::reconstruct::TempoGrid;
    ///
    /// let grid = TempoGrid::new(120.0, 4, 0.0); // 125 ms steps
    /// assert!((grid.snap(0.30) - 0.25).abs() < 1e-9);
    /// assert!((grid.snap(0.32) - 0.375).abs() < 1e-9);
    /// ```
    pub fn snap(&self, time_secs: f64) -> f64 {
        let step = self.step_secs();
        let k = ((time_secs - self.offset_secs) / step).round();
        let snapped = self.offset_secs + k * step;
        if snapped < 0.0 {
            snapped + step
        } else {
            snapped
        }
    }
}

/// Tempo in BPM from the periodicity of an onset novelty curve.
///
/// Searches lags for `[min_bpm, max_bpm]` and falls back to `fallback_bpm`
/// when the curve carries no clear pulse.
pub fn estimate_tempo(
    novelty: &[f32],
    hop: usize,
    sample_rate: u32,
    min_bpm: f32,
    max_bpm: f32,
    fallback_bpm: f32,
) -> f32 {
    const MIN_PULSE_CLARITY: f32 = 0.1;

    let frames_per_sec = sample_rate as f32 / hop as f32;
    let min_lag = (60.0 * frames_per_sec / max_bpm).floor().max(1.0) as usize;
    let max_lag = (60.0 * frames_per_sec / min_bpm).ceil() as usize;
    if novelty.len() <= max_lag + 1 {
        return fallback_bpm;
    }

    let mean = novelty.iter().sum::<f32>() / novelty.len() as f32;
    let centred: Vec<f32> = novelty.iter().map(|&v| v - mean).collect();
    let ac = autocorrelation(&centred, max_lag + 1);
    if ac[0] <= 1e-9 {
        return fallback_bpm;
    }

    let (lag, value) = (min_lag..=max_lag)
        .map(|lag| (lag, ac[lag]))
        .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
    if lag == 0 || value / ac[0] < MIN_PULSE_CLARITY {
        return fallback_bpm;
    }

    let (a, b, c) = (ac[lag - 1], ac[lag], ac[lag + 1]);
    let denom = a - 2.0 * b + c;
    let shift = if denom.abs() > 1e-12 {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    let bpm = 60.0 * frames_per_sec / (lag as f32 + shift);
    bpm.clamp(min_bpm, max_bpm)
}
