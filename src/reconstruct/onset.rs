//! Energy-based onset detection.
//!
//! Frame `t` covers the `frame` samples ending at `(t + 1) * hop` (zero
//! padded before the start), so a jump in frame energy is attributed to the
//! newest hop, starting at sample `t * hop`.

/// Frame log-energies in dB.
pub fn frame_energy_db(samples: &[f32], frame: usize, hop: usize) -> Vec<f32> {
    if samples.is_empty() || hop == 0 || frame == 0 {
        return Vec::new();
    }
    let mut prefix = Vec::with_capacity(samples.len() + 1);
    prefix.push(0.0_f64);
    let mut acc = 0.0_f64;
    for &s in samples {
        acc += (s as f64) * (s as f64);
        prefix.push(acc);
    }

    let n_frames = samples.len().div_ceil(hop);
    (0..n_frames)
        .map(|t| {
            let end = ((t + 1) * hop).min(samples.len());
            let start = ((t + 1) * hop).saturating_sub(frame).min(end);
            let mean = (prefix[end] - prefix[start]) / frame as f64;
            (10.0 * (mean + 1e-10).log10()) as f32
        })
        .collect()
}

/// Half-wave rectified first difference of the log-energy, scaled to a
/// maximum of 1. Energies are floored `floor_db` below the loudest frame and
/// the frame before the signal counts as sitting on that floor.
pub fn novelty(energy_db: &[f32], floor_db: f32) -> Vec<f32> {
    let loudest = energy_db.iter().copied().fold(f32::MIN, f32::max);
    let gate = loudest + floor_db;
    let mut prev = gate;
    let mut out: Vec<f32> = energy_db
        .iter()
        .map(|&e| {
            let e = e.max(gate);
            let d = (e - prev).max(0.0);
            prev = e;
            d
        })
        .collect();
    let max = out.iter().copied().fold(0.0_f32, f32::max);
    if max > 0.0 {
        for v in out.iter_mut() {
            *v /= max;
        }
    }
    out
}

/// Result of peak picking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Peaks {
    /// Every local maximum above the adaptive threshold, before spacing.
    pub candidates: usize,
    /// Onset frames after enforcing the minimum spacing.
    pub onsets: Vec<usize>,
}

/// Local maxima of `novelty` that exceed the local mean by `delta`, whose
/// frame is no more than `floor_db` below the loudest frame, kept at least
/// `min_spacing` frames apart (earliest wins).
pub fn pick_peaks(
    novelty: &[f32],
    energy_db: &[f32],
    delta: f32,
    floor_db: f32,
    min_spacing: usize,
) -> Peaks {
    const MEAN_RADIUS: usize = 8;

    let loudest = energy_db.iter().copied().fold(f32::MIN, f32::max);
    let gate = loudest + floor_db;
    let n = novelty.len();

    let mut peaks = Peaks::default();
    let mut last: Option<usize> = None;

    for t in 0..n {
        let v = novelty[t];
        let left = if t > 0 { novelty[t - 1] } else { 0.0 };
        let right = if t + 1 < n { novelty[t + 1] } else { 0.0 };
        if v < left || v <= right {
            continue;
        }

        let lo = t.saturating_sub(MEAN_RADIUS);
        let hi = (t + MEAN_RADIUS + 1).min(n);
        let mean = novelty[lo..hi].iter().sum::<f32>() / (hi - lo) as f32;
        if v <= mean + delta || energy_db[t] < gate {
            continue;
        }

        peaks.candidates += 1;
        if last.map_or(true, |l| t - l >= min_spacing) {
            peaks.onsets.push(t);
            last = Some(t);
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clicks(len: usize, period: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let p = i % period;
                if p < 200 {
                    (1.0 - p as f32 / 200.0) * if p % 2 == 0 { 0.8 } else { -0.8 }
                } else {
                    0.0
                }
            })
            .collect()
    }

    #[test]
    fn click_train_onsets_land_on_clicks() {
        let hop = 512;
        let signal = clicks(44_100, 11_025);
        let energy = frame_energy_db(&signal, 2048, hop);
        let peaks = pick_peaks(&novelty(&energy, -50.0), &energy, 0.3, -50.0, 4);

        assert_eq!(peaks.onsets.len(), 4, "{:?}", peaks.onsets);
        for (i, &t) in peaks.onsets.iter().enumerate() {
            let sample = t * hop;
            let expected = i * 11_025;
            assert!(
                sample.abs_diff(expected) <= hop,
                "onset {i}: {sample} vs {expected}"
            );
        }
    }

    #[test]
    fn silence_has_no_onsets() {
        let energy = frame_energy_db(&vec![0.0; 10_000], 2048, 512);
        let peaks = pick_peaks(&novelty(&energy, -50.0), &energy, 0.3, -50.0, 4);
        assert!(peaks.onsets.is_empty());
    }

    #[test]
    fn spacing_suppresses_close_peaks() {
        let novelty = vec![0.0, 1.0, 0.0, 0.9, 0.0, 0.0, 0.0, 0.0, 0.0, 0.95, 0.0];
        let energy = vec![0.0; novelty.len()];
        let peaks = pick_peaks(&novelty, &energy, 0.1, -50.0, 4);
        assert_eq!(peaks.candidates, 3);
        assert_eq!(peaks.onsets, vec![1, 9]);
    }

    #[test]
    fn novelty_is_normalised() {
        let n = novelty(&[-100.0, -20.0, -20.0, -10.0, -30.0], -50.0);
        assert_eq!(n[0], 0.0);
        assert_eq!(n[1], 1.0);
        assert_eq!(n[4], 0.0);
        assert!((n[3] - 0.25).abs() < 1e-6);
    }
}
