//! Upload validation and normalisation.
//!
//! [`IngestValidator`] checks an uploaded file before anything downstream
//! sees it:
//!
//! | Check | Description |
//! |-------|-------------|
//! | Format | MIME type must be one of the accepted audio types |
//! | Decode | The container must decode to at least one frame |
//! | Finite | No NaN / infinite samples |
//! | Duration | Clip must be within `[min_duration_secs, max_duration_secs]` |
//! | Silence | Peak amplitude must exceed the silence threshold |
//!
//! [`IngestValidator::ingest`] additionally downmixes to mono and resamples
//! to the configured processing rate.
//!
//! Every failure here is user-fixable, so the orchestrator never retries an
//! [`AudioError`].

use thiserror::Error;

use super::asset::AudioFormat;
use super::decode::{decode, DecodedAudio};
use super::resample::{downmix_to_mono, resample_to_rate};
use crate::config::IngestConfig;

// ---------------------------------------------------------------------------
// AudioError
// ---------------------------------------------------------------------------

/// Reason an upload failed validation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AudioError {
    #[error("unsupported content type '{0}'")]
    UnsupportedFormat(String),

    #[error("could not decode audio: {0}")]
    Decode(String),

    #[error("audio contains non-finite samples")]
    NonFinite,

    #[error("recording too short: {got_secs:.2}s (minimum {min_secs:.2}s)")]
    TooShort { min_secs: f32, got_secs: f32 },

    #[error("recording too long: {got_secs:.2}s (maximum {max_secs:.2}s)")]
    TooLong { max_secs: f32, got_secs: f32 },

    #[error("audio too quiet: max amplitude {amplitude:.4} (threshold {threshold:.4})")]
    TooQuiet { amplitude: f32, threshold: f32 },

    #[error("resampling failed: {0}")]
    Resample(String),
}

// ---------------------------------------------------------------------------
// SourceInfo / NormalizedAudio
// ---------------------------------------------------------------------------

/// What the upload looked like before normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
}

/// Mono `f32` PCM at the processing rate.
#[derive(Debug, Clone)]
pub struct NormalizedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub source: SourceInfo,
}

// ---------------------------------------------------------------------------
// IngestValidator
// ---------------------------------------------------------------------------

pub struct IngestValidator {
    config: IngestConfig,
}

impl IngestValidator {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Resolve and allow-list the upload's content type.
    pub fn check_content_type(&self, content_type: &str) -> Result<AudioFormat, AudioError> {
        let accepted = self
            .config
            .accepted_content_types
            .iter()
            .any(|t| content_type.to_ascii_lowercase().starts_with(t.as_str()));
        match AudioFormat::from_content_type(content_type) {
            Some(format) if accepted => Ok(format),
            _ => Err(AudioError::UnsupportedFormat(content_type.to_string())),
        }
    }

    /// Decode and validate without normalising. Used at upload time to build
    /// the asset descriptor.
    pub fn inspect(&self, bytes: &[u8], content_type: &str) -> Result<SourceInfo, AudioError> {
        let format = self.check_content_type(content_type)?;
        let decoded = decode(bytes, format)?;
        self.validate(&decoded)?;
        Ok(Self::source_info(format, &decoded))
    }

    /// Decode, validate, downmix and resample.
    pub fn ingest(&self, bytes: &[u8], content_type: &str) -> Result<NormalizedAudio, AudioError> {
        let format = self.check_content_type(content_type)?;
        let decoded = decode(bytes, format)?;
        self.validate(&decoded)?;

        let source = Self::source_info(format, &decoded);
        let mono = downmix_to_mono(&decoded.samples, decoded.channels);
        let samples = resample_to_rate(&mono, decoded.sample_rate, self.config.target_sample_rate)
            .map_err(|e| AudioError::Resample(e.to_string()))?;

        log::debug!(
            "ingest: {:?} {}Hz x{} {:.2}s -> mono {}Hz ({} samples)",
            format,
            decoded.sample_rate,
            decoded.channels,
            source.duration_secs,
            self.config.target_sample_rate,
            samples.len()
        );

        Ok(NormalizedAudio {
            samples,
            sample_rate: self.config.target_sample_rate,
            source,
        })
    }

    /// Checks are run in this order:
    /// 1. Finite samples
    /// 2. Duration (too short → too long)
    /// 3. Silence
    pub fn validate(&self, audio: &DecodedAudio) -> Result<(), AudioError> {
        if audio.samples.iter().any(|s| !s.is_finite()) {
            return Err(AudioError::NonFinite);
        }

        let duration_secs = audio.duration_secs() as f32;

        if duration_secs < self.config.min_duration_secs {
            return Err(AudioError::TooShort {
                min_secs: self.config.min_duration_secs,
                got_secs: duration_secs,
            });
        }

        if duration_secs > self.config.max_duration_secs {
            return Err(AudioError::TooLong {
                max_secs: self.config.max_duration_secs,
                got_secs: duration_secs,
            });
        }

        let max_amplitude = audio
            .samples
            .iter()
            .map(|s| s.abs())
            .fold(0.0_f32, f32::max);

        if max_amplitude < self.config.silence_threshold {
            return Err(AudioError::TooQuiet {
                amplitude: max_amplitude,
                threshold: self.config.silence_threshold,
            });
        }

        Ok(())
    }

    fn source_info(format: AudioFormat, decoded: &DecodedAudio) -> SourceInfo {
        SourceInfo {
            format,
            sample_rate: decoded.sample_rate,
            channels: decoded.channels,
            duration_secs: decoded.duration_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav;

    fn sine(secs: f32, rate: u32, amplitude: f32) -> Vec<f32> {
        let n = (secs * rate as f32) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / rate as f32).sin() * amplitude)
            .collect()
    }

    fn validator() -> IngestValidator {
        IngestValidator::new(IngestConfig::default())
    }

    #[test]
    fn valid_wav_is_normalised_to_target_rate() {
        let bytes = wav::encode_f32(&sine(1.0, 22_050, 0.5), 22_050).unwrap();
        let out = validator().ingest(&bytes, "audio/wav").unwrap();

        assert_eq!(out.sample_rate, 44_100);
        assert_eq!(out.source.sample_rate, 22_050);
        assert!(out.samples.len().abs_diff(44_100) <= 2, "{}", out.samples.len());
    }

    #[test]
    fn stereo_upload_is_downmixed() {
        let mono = sine(1.0, 44_100, 0.4);
        let stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, s]).collect();
        let bytes = wav::encode_interleaved_f32(&stereo, 44_100, 2).unwrap();

        let out = validator().ingest(&bytes, "audio/x-wav").unwrap();
        assert_eq!(out.source.channels, 2);
        assert_eq!(out.samples.len(), mono.len());
        assert!((out.samples[500] - mono[500]).abs() < 1e-5);
    }

    #[test]
    fn unknown_content_type_rejected() {
        let err = validator().inspect(b"", "video/mp4").unwrap_err();
        assert!(matches!(err, AudioError::UnsupportedFormat(_)), "{err}");
    }

    #[test]
    fn too_short_rejected() {
        let bytes = wav::encode_f32(&sine(0.1, 44_100, 0.5), 44_100).unwrap();
        let err = validator().inspect(&bytes, "audio/wav").unwrap_err();
        assert!(matches!(err, AudioError::TooShort { .. }), "{err}");
    }

    #[test]
    fn too_long_rejected() {
        let mut config = IngestConfig::default();
        config.max_duration_secs = 1.0;
        let bytes = wav::encode_f32(&sine(1.5, 8_000, 0.5), 8_000).unwrap();
        let err = IngestValidator::new(config)
            .inspect(&bytes, "audio/wav")
            .unwrap_err();
        assert!(matches!(err, AudioError::TooLong { .. }), "{err}");
    }

    #[test]
    fn silent_audio_rejected() {
        let bytes = wav::encode_f32(&vec![0.0; 44_100], 44_100).unwrap();
        let err = validator().inspect(&bytes, "audio/wav").unwrap_err();
        assert!(matches!(err, AudioError::TooQuiet { .. }), "{err}");
    }

    #[test]
    fn inspect_reports_source_shape() {
        let bytes = wav::encode_f32(&sine(2.0, 48_000, 0.3), 48_000).unwrap();
        let info = validator().inspect(&bytes, "audio/wav").unwrap();
        assert_eq!(info.format, AudioFormat::Wav);
        assert_eq!(info.sample_rate, 48_000);
        assert_eq!(info.channels, 1);
        assert!((info.duration_secs - 2.0).abs() < 1e-3);
    }

    #[test]
    fn error_display_is_informative() {
        let err = AudioError::TooShort {
            min_secs: 0.5,
            got_secs: 0.1,
        };
        let msg = err.to_string();
        assert!(msg.contains("0.10"), "message: {msg}");
        assert!(msg.contains("0.50"), "message: {msg}");
    }
}
