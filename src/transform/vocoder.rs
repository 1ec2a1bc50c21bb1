//! Phase-vocoder time stretching with a per-bin gain.
//!
//! Output frames are read at fractional analysis positions `t = s / stretch`;
//! magnitudes are interpolated between neighbouring frames and phases are
//! accumulated from the measured per-bin phase advance, so partials keep
//! their frequency while the timeline is rescaled.

use std::f32::consts::PI;

use rustfft::num_complex::Complex32;

use crate::audio::spectrum::{Spectrogram, Stft};

/// Stretch `samples` to `round(len * stretch)` samples without changing
/// pitch, scaling bin `k` by `bin_gains[k]`.
pub fn time_stretch(stft: &Stft, samples: &[f32], stretch: f64, bin_gains: &[f32]) -> Vec<f32> {
    let out_len = (samples.len() as f64 * stretch).round() as usize;
    if samples.is_empty() || out_len == 0 {
        return vec![0.0; out_len];
    }

    let analysis = stft.analyze(samples);
    let n_bins = analysis.n_bins();
    let hop = analysis.hop as f32;
    let n_fft = analysis.n_fft as f32;

    let expected_advance: Vec<f32> = (0..n_bins)
        .map(|k| 2.0 * PI * k as f32 * hop / n_fft)
        .collect();

    let zero = vec![Complex32::new(0.0, 0.0); n_bins];

    let n_out_frames = stft.frame_count(out_len);
    let rate = 1.0 / stretch;
    let mut phase: Vec<f32> = analysis.frames[0].iter().map(|c| c.arg()).collect();
    let mut frames = Vec::with_capacity(n_out_frames);

    for s in 0..n_out_frames {
        let t = s as f64 * rate;
        let i = t.floor() as usize;
        let frac = (t - i as f64) as f32;
        let c0 = column(&analysis.frames, &zero, i);
        let c1 = column(&analysis.frames, &zero, i + 1);

        let mut frame = Vec::with_capacity(n_bins);
        for k in 0..n_bins {
            let mag = (1.0 - frac) * c0[k].norm() + frac * c1[k].norm();
            let gain = bin_gains.get(k).copied().unwrap_or(1.0);
            frame.push(Complex32::from_polar(mag * gain, phase[k]));

            let delta = c1[k].arg() - c0[k].arg() - expected_advance[k];
            phase[k] += expected_advance[k] + wrap_phase(delta);
        }
        frames.push(frame);
    }

    let stretched = Spectrogram {
        frames,
        n_fft: analysis.n_fft,
        hop: analysis.hop,
    };
    stft.synthesize(&stretched, out_len)
}

fn column<'a>(frames: &'a [Vec<Complex32>], zero: &'a [Complex32], i: usize) -> &'a [Complex32] {
    frames.get(i).map_or(zero, Vec::as_slice)
}

/// Map an angle into `[-π, π]`.
fn wrap_phase(x: f32) -> f32 {
    x - 2.0 * PI * (x / (2.0 * PI)).round()
}
