//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::retry::RetryConfig;

// ---------------------------------------------------------------------------
// IngestConfig
// ---------------------------------------------------------------------------

/// Upload validation and normalisation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Every accepted upload is resampled to this rate before processing.
    pub target_sample_rate: u32,
    /// Shortest accepted upload, in seconds.
    pub min_duration_secs: f32,
    /// Longest accepted upload, in seconds.
    pub max_duration_secs: f32,
    /// Peak amplitude below which an upload is rejected as silent.
    pub silence_threshold: f32,
    /// MIME types accepted by `upload`.
    pub accepted_content_types: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 44_100,
            min_duration_secs: 0.5,
            max_duration_secs: 1_200.0,
            silence_threshold: 0.001,
            accepted_content_types: [
                "audio/wav",
                "audio/x-wav",
                "audio/wave",
                "audio/mpeg",
                "audio/mp3",
                "audio/flac",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// SeparationConfig
// ---------------------------------------------------------------------------

/// Stem separation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationConfig {
    pub fft_size: usize,
    pub hop_size: usize,
    /// Median filter length across time (harmonic enhancement), in frames.
    pub harmonic_kernel: usize,
    /// Median filter length across frequency (percussive enhancement), in bins.
    pub percussive_kernel: usize,
    /// Harmonic content below this frequency is routed to the bass stem.
    pub bass_cutoff_hz: f32,
    /// Harmonic content between `bass_cutoff_hz` and this frequency is
    /// routed to the melody stem.
    pub melody_cutoff_hz: f32,
    /// Maximum allowed energy of `original - sum(stems)` relative to the
    /// original, in dB.
    pub max_residual_db: f32,
    /// Inputs longer than this exceed the separation complexity ceiling.
    pub max_duration_secs: f32,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_size: 512,
            harmonic_kernel: 17,
            percussive_kernel: 17,
            bass_cutoff_hz: 200.0,
            melody_cutoff_hz: 5_000.0,
            max_residual_db: -40.0,
            max_duration_secs: 600.0,
        }
    }
}

// ---------------------------------------------------------------------------
// TransformConfig
// ---------------------------------------------------------------------------

/// Spectral transformation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub fft_size: usize,
    pub hop_size: usize,
    /// Mixed into every job seed so deployments can decorrelate output.
    pub base_seed: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_size: 512,
            base_seed: 0x5EED_BEA7,
        }
    }
}

// ---------------------------------------------------------------------------
// ReconstructionConfig
// ---------------------------------------------------------------------------

/// Onset / pitch / quantisation settings for MIDI-style reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Analysis frame length in samples.
    pub frame_size: usize,
    /// Analysis hop in samples.
    pub hop_size: usize,
    /// Two onsets closer than this are merged into one.
    pub min_onset_spacing_ms: f32,
    /// Novelty must exceed the local mean by this much to count as an onset.
    pub onset_delta: f32,
    /// Frames quieter than this (dB below the stem peak) never start onsets.
    pub onset_floor_db: f32,
    pub min_pitch_hz: f32,
    pub max_pitch_hz: f32,
    /// Normalised autocorrelation required for a frame to count as voiced.
    pub voicing_threshold: f32,
    /// Grid subdivisions per beat (4 = sixteenth notes).
    pub grid_subdivision: u32,
    pub min_tempo_bpm: f32,
    pub max_tempo_bpm: f32,
    /// Used when the material carries no usable pulse.
    pub fallback_tempo_bpm: f32,
    /// More onsets per second than this exceeds the polyphonic density bound.
    pub max_events_per_sec: f32,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            hop_size: 512,
            min_onset_spacing_ms: 50.0,
            onset_delta: 0.3,
            onset_floor_db: -50.0,
            min_pitch_hz: 40.0,
            max_pitch_hz: 2_000.0,
            voicing_threshold: 0.5,
            grid_subdivision: 4,
            min_tempo_bpm: 70.0,
            max_tempo_bpm: 180.0,
            fallback_tempo_bpm: 120.0,
            max_events_per_sec: 24.0,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Orchestrator timeouts and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub ingest_timeout_secs: u64,
    pub separation_timeout_secs: u64,
    pub transform_timeout_secs: u64,
    pub reconstruction_timeout_secs: u64,
    /// Backoff applied when a stage raises `ProcessingTimeout`.
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingest_timeout_secs: 60,
            separation_timeout_secs: 300,
            transform_timeout_secs: 300,
            reconstruction_timeout_secs: 300,
            retry: RetryConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// LlmConfig
// ---------------------------------------------------------------------------

/// Settings for the generative-text backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API endpoint.
    ///
    /// - Ollama default: `http://localhost:11434`
    /// - OpenAI: `https://api.openai.com`
    pub base_url: String,
    /// API key: `None` for local providers.
    pub api_key: Option<String>,
    /// Model identifier sent to the API (e.g. `"gpt-4o"`).
    pub model: String,
    /// Sampling temperature (0.0 – 1.0).
    pub temperature: f32,
    /// Maximum seconds to wait for a single response.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            api_key: None,
            model: "qwen2.5:7b".into(),
            temperature: 0.9,
            timeout_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// LyricsConfig
// ---------------------------------------------------------------------------

/// Lyrics generation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsConfig {
    /// Maximum characters of free-text topic.
    pub max_topic_chars: usize,
    /// Maximum characters of a user style description.
    pub max_description_chars: usize,
    /// Maximum characters of user sample lyrics embedded as few-shot input.
    pub max_sample_chars: usize,
    /// `max_tokens` passed to the generative-text backend.
    pub max_tokens: u32,
    /// Generations attempted while the output structure does not match.
    pub structure_attempts: u32,
    /// Backoff for rate-limit / timeout failures of the backend.
    pub retry: RetryConfig,
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            max_topic_chars: 280,
            max_description_chars: 600,
            max_sample_chars: 4_000,
            max_tokens: 900,
            structure_attempts: 3,
            retry: RetryConfig {
                max_attempts: 4,
                base_delay_ms: 500,
                max_delay_ms: 8_000,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

/// Where blobs are kept when the filesystem store is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Overrides the platform data directory for stored assets.
    pub assets_dir: Option<std::path::PathBuf>,
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use lyrics_beats::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub separation: SeparationConfig,
    pub transform: TransformConfig,
    pub reconstruction: ReconstructionConfig,
    pub pipeline: PipelineConfig,
    pub llm: LlmConfig,
    pub lyrics: LyricsConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolved directory for the filesystem blob store.
    pub fn assets_dir(&self) -> std::path::PathBuf {
        self.storage
            .assets_dir
            .clone()
            .unwrap_or_else(|| AppPaths::new().assets_dir)
    }
}

impl PipelineConfig {
    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest_timeout_secs)
    }

    pub fn separation_timeout(&self) -> Duration {
        Duration::from_secs(self.separation_timeout_secs)
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs(self.transform_timeout_secs)
    }

    pub fn reconstruction_timeout(&self) -> Duration {
        Duration::from_secs(self.reconstruction_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(
            original.ingest.target_sample_rate,
            loaded.ingest.target_sample_rate
        );
        assert_eq!(
            original.ingest.accepted_content_types,
            loaded.ingest.accepted_content_types
        );
        assert_eq!(original.separation.fft_size, loaded.separation.fft_size);
        assert_eq!(
            original.separation.max_residual_db,
            loaded.separation.max_residual_db
        );
        assert_eq!(original.transform.base_seed, loaded.transform.base_seed);
        assert_eq!(
            original.reconstruction.grid_subdivision,
            loaded.reconstruction.grid_subdivision
        );
        assert_eq!(original.pipeline.retry, loaded.pipeline.retry);
        assert_eq!(original.llm.base_url, loaded.llm.base_url);
        assert_eq!(original.llm.api_key, loaded.llm.api_key);
        assert_eq!(original.lyrics.max_tokens, loaded.lyrics.max_tokens);
        assert_eq!(original.lyrics.retry, loaded.lyrics.retry);
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        let default = AppConfig::default();

        assert_eq!(config.llm.model, default.llm.model);
        assert_eq!(
            config.ingest.target_sample_rate,
            default.ingest.target_sample_rate
        );
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.ingest.target_sample_rate, 44_100);
        assert!(cfg
            .ingest
            .accepted_content_types
            .iter()
            .any(|t| t == "audio/mpeg"));
        assert_eq!(cfg.separation.max_residual_db, -40.0);
        assert_eq!(cfg.reconstruction.grid_subdivision, 4);
        assert_eq!(cfg.reconstruction.min_onset_spacing_ms, 50.0);
        assert_eq!(cfg.lyrics.structure_attempts, 3);
        assert!(cfg.llm.api_key.is_none());
        assert!(cfg.storage.assets_dir.is_none());
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.llm.base_url = "https://api.openai.com".into();
        cfg.llm.api_key = Some("sk-test".into());
        cfg.llm.model = "gpt-4o".into();
        cfg.pipeline.separation_timeout_secs = 42;
        cfg.storage.assets_dir = Some(dir.path().join("assets"));

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.llm.base_url, "https://api.openai.com");
        assert_eq!(loaded.llm.api_key, Some("sk-test".into()));
        assert_eq!(loaded.llm.model, "gpt-4o");
        assert_eq!(
            loaded.pipeline.separation_timeout(),
            Duration::from_secs(42)
        );
        assert_eq!(loaded.assets_dir(), dir.path().join("assets"));
    }
}
