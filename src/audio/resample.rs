//! Sample-rate conversion and channel mixing.
//!
//! Processing runs on **mono `f32`** audio at a single configured rate. This
//! module provides the two conversion steps:
//!
//! 1. [`downmix_to_mono`]: average any number of interleaved channels.
//! 2. [`resample_by_ratio`] / [`resample_to_rate`]: band-limited sinc
//!    resampling via `rubato` (`SincFixedIn` + `BlackmanHarris2` window).
//!
//! The resampler's group delay is trimmed so output sample `i` lines up with
//! input time `i / ratio`, and the output length is always
//! `round(len * ratio)`.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;

const CHUNK_FRAMES: usize = 1024;

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("invalid resampling ratio {0}")]
    InvalidRatio(f64),

    #[error("resampler construction failed: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("resampler failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`. A trailing partial frame
/// is dropped.
///
/// ```rust
/// use lyrics_beats::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample from `source_rate` to `target_rate`. Equal rates return a copy.
pub fn resample_to_rate(
    samples: &[f32],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, ResampleError> {
    if source_rate == 0 || target_rate == 0 {
        return Err(ResampleError::InvalidRatio(0.0));
    }
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }
    resample_by_ratio(samples, target_rate as f64 / source_rate as f64)
}

/// Resample by an arbitrary output/input ratio.
///
/// ```rust
/// use lyrics_beats::audio::resample_by_ratio;
///
/// let input = vec![0.0_f32; 4_410];
/// let out = resample_by_ratio(&input, 0.5).unwrap();
/// assert_eq!(out.len(), 2_205);
/// ```
pub fn resample_by_ratio(samples: &[f32], ratio: f64) -> Result<Vec<f32>, ResampleError> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(ResampleError::InvalidRatio(ratio));
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    if (ratio - 1.0).abs() < 1e-12 {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f64>::new(ratio, 1.0, params, CHUNK_FRAMES, 1)?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * ratio).round() as usize;
    let input: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let mut output: Vec<f64> = Vec::with_capacity(expected + delay + CHUNK_FRAMES);

    let mut pos = 0;
    while input.len() - pos >= resampler.input_frames_next() {
        let n = resampler.input_frames_next();
        let block = vec![input[pos..pos + n].to_vec()];
        let out = resampler.process(&block, None)?;
        output.extend_from_slice(&out[0]);
        pos += n;
    }

    if pos < input.len() {
        let block = vec![input[pos..].to_vec()];
        let out = resampler.process_partial(Some(&block), None)?;
        output.extend_from_slice(&out[0]);
    }

    // Flush the filter tail until the delayed signal is fully out.
    while output.len() < expected + delay {
        let out = resampler.process_partial(None::<&[Vec<f64>]>, None)?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    let mut result: Vec<f32> = output
        .iter()
        .skip(delay)
        .take(expected)
        .map(|&s| s as f32)
        .collect();
    result.resize(expected, 0.0);
    Ok(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
