//! Short-time Fourier analysis shared by separation, transformation and
//! reconstruction.
//!
//! ```text
//!  signal ──pad n/2──► frames (hop) ──× hann──► FFT ──► Spectrogram
//!                                                          │ (edit bins)
//!  signal ◄──÷ Σw²── overlap-add ◄──× hann── IFFT ◄────────┘
//! ```
//!
//! Frames are centred: frame `t` is centred on input sample `t * hop`.
//! Synthesis divides by the summed squared window, so an unmodified
//! spectrogram reconstructs its input to floating-point precision.

use std::sync::Arc;

use rustfft::{num_complex::Complex32, Fft, FftPlanner};

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// Periodic Hann window of `size` points.
pub fn hann(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}

// ---------------------------------------------------------------------------
// Spectrogram
// ---------------------------------------------------------------------------

/// Positive-frequency bins (`n_fft / 2 + 1`) for every frame.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub frames: Vec<Vec<Complex32>>,
    pub n_fft: usize,
    pub hop: usize,
}

impl Spectrogram {
    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// Magnitudes laid out `[frame][bin]`.
    pub fn magnitudes(&self) -> Vec<Vec<f32>> {
        self.frames
            .iter()
            .map(|f| f.iter().map(|c| c.norm()).collect())
            .collect()
    }
}

/// Centre frequency of `bin` in Hz.
pub fn bin_frequency(bin: usize, n_fft: usize, sample_rate: u32) -> f32 {
    bin as f32 * sample_rate as f32 / n_fft as f32
}

// ---------------------------------------------------------------------------
// Stft
// ---------------------------------------------------------------------------

/// Planned forward/inverse transforms for one frame size.
pub struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl Stft {
    /// `hop` must not exceed `n_fft / 2` for the overlap to cover every sample.
    pub fn new(n_fft: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            n_fft,
            hop: hop.clamp(1, (n_fft / 2).max(1)),
            window: hann(n_fft),
            forward: planner.plan_fft_forward(n_fft),
            inverse: planner.plan_fft_inverse(n_fft),
        }
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// Number of frames produced for a signal of `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        len / self.hop + 1
    }

    pub fn analyze(&self, signal: &[f32]) -> Spectrogram {
        let half = self.n_fft / 2;
        let n_frames = self.frame_count(signal.len());
        let padded_len = (n_frames - 1) * self.hop + self.n_fft;

        let mut padded = vec![0.0_f32; padded_len];
        padded[half..half + signal.len()].copy_from_slice(signal);

        let frames = (0..n_frames)
            .map(|t| {
                let start = t * self.hop;
                let mut buf: Vec<Complex32> = padded[start..start + self.n_fft]
                    .iter()
                    .zip(&self.window)
                    .map(|(&s, &w)| Complex32::new(s * w, 0.0))
                    .collect();
                self.forward.process(&mut buf);
                buf.truncate(half + 1);
                buf
            })
            .collect();

        Spectrogram {
            frames,
            n_fft: self.n_fft,
            hop: self.hop,
        }
    }

    /// Overlap-add resynthesis to exactly `len` samples.
    pub fn synthesize(&self, spec: &Spectrogram, len: usize) -> Vec<f32> {
        let half = self.n_fft / 2;
        let n_frames = spec.n_frames();
        if n_frames == 0 {
            return vec![0.0; len];
        }
        let padded_len = ((n_frames - 1) * self.hop + self.n_fft).max(len + half);

        let mut out = vec![0.0_f32; padded_len];
        let mut norm = vec![0.0_f32; padded_len];
        let scale = 1.0 / self.n_fft as f32;

        for (t, bins) in spec.frames.iter().enumerate() {
            let frame = self.inverse_frame(bins);
            let start = t * self.hop;
            for (i, (&v, &w)) in frame.iter().zip(&self.window).enumerate() {
                out[start + i] += v * scale * w;
                norm[start + i] += w * w;
            }
        }

        out.iter()
            .zip(&norm)
            .skip(half)
            .take(len)
            .map(|(&v, &n)| if n > 1e-8 { v / n } else { 0.0 })
            .collect()
    }

    /// Inverse FFT of one positive-frequency frame, real part only (unscaled).
    fn inverse_frame(&self, bins: &[Complex32]) -> Vec<f32> {
        let half = self.n_fft / 2;
        let mut buf = vec![Complex32::new(0.0, 0.0); self.n_fft];
        for (k, c) in bins.iter().take(half + 1).enumerate() {
            buf[k] = *c;
        }
        for k in 1..half {
            buf[self.n_fft - k] = buf[k].conj();
        }
        buf[0].im = 0.0;
        buf[half].im = 0.0;
        self.inverse.process(&mut buf);
        buf.iter().map(|c| c.re).collect()
    }
}

// ---------------------------------------------------------------------------
// Measurements
// ---------------------------------------------------------------------------

pub fn energy(samples: &[f32]) -> f64 {
    samples.iter().map(|&s| (s as f64) * (s as f64)).sum()
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (energy(samples) / samples.len() as f64).sqrt() as f32
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max)
}

/// Power-weighted mean frequency across all frames, in Hz.
pub fn spectral_centroid(samples: &[f32], sample_rate: u32) -> f32 {
    if samples.len() < 64 {
        return 0.0;
    }
    let stft = Stft::new(2048, 512);
    let spec = stft.analyze(samples);

    let mut weighted = 0.0_f64;
    let mut total = 0.0_f64;
    for frame in &spec.frames {
        for (k, c) in frame.iter().enumerate() {
            let m = c.norm_sqr() as f64;
            weighted += m * bin_frequency(k, spec.n_fft, sample_rate) as f64;
            total += m;
        }
    }
    if total < 1e-12 {
        0.0
    } else {
        (weighted / total) as f32
    }
}

/// Biased autocorrelation for lags `0..=max_lag`, computed through the FFT.
pub fn autocorrelation(signal: &[f32], max_lag: usize) -> Vec<f32> {
    if signal.is_empty() {
        return vec![0.0; max_lag + 1];
    }
    let size = (2 * signal.len()).next_power_of_two();
    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);

    let mut buf: Vec<Complex32> = signal.iter().map(|&s| Complex32::new(s, 0.0)).collect();
    buf.resize(size, Complex32::new(0.0, 0.0));
    forward.process(&mut buf);
    for c in buf.iter_mut() {
        *c = Complex32::new(c.norm_sqr(), 0.0);
    }
    inverse.process(&mut buf);

    let scale = 1.0 / size as f32;
    (0..=max_lag)
        .map(|lag| if lag < signal.len() { buf[lag].re * scale } else { 0.0 })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
