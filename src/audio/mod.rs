//! Audio primitives: decoding, validation, resampling, spectral analysis.
//!
//! # Ingest path
//!
//! ```text
//! upload bytes ─► AudioFormat::from_content_type ─► decode (symphonia)
//!              ─► IngestValidator::validate ─► downmix_to_mono
//!              ─► resample_to_rate (rubato) ─► NormalizedAudio
//! ```
//!
//! Stems and renders leave the pipeline as WAV through [`wav`]; every random
//! draw comes from a [`rng`] stream so output is reproducible.

pub mod asset;
pub mod decode;
pub mod ingest;
pub mod resample;
pub mod rng;
pub mod spectrum;
pub mod wav;

pub use asset::{AudioAsset, AudioFormat};
pub use decode::{decode, DecodedAudio};
pub use ingest::{AudioError, IngestValidator, NormalizedAudio, SourceInfo};
pub use resample::{downmix_to_mono, resample_by_ratio, resample_to_rate, ResampleError};
pub use spectrum::{spectral_centroid, Spectrogram, Stft};
