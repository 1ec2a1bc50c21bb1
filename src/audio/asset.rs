//! Immutable audio asset descriptors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::AssetRef;

// ---------------------------------------------------------------------------
// AudioFormat
// ---------------------------------------------------------------------------

/// Container formats the ingest path understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Flac,
}

impl AudioFormat {
    /// Map an upload MIME type to a format.
    ///
    /// ```
    /// use lyrics_beats::audio::AudioFormat;
    ///
    /// assert_eq!(AudioFormat::from_content_type("audio/x-wav"), Some(AudioFormat::Wav));
    /// assert_eq!(AudioFormat::from_content_type("audio/mpeg"), Some(AudioFormat::Mp3));
    /// assert_eq!(AudioFormat::from_content_type("video/mp4"), None);
    /// ```
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => Some(Self::Wav),
            "audio/mpeg" | "audio/mp3" => Some(Self::Mp3),
            "audio/flac" | "audio/x-flac" => Some(Self::Flac),
            _ => None,
        }
    }

    /// File extension used as a probe hint.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::Flac => "audio/flac",
        }
    }
}

// ---------------------------------------------------------------------------
// AudioAsset
// ---------------------------------------------------------------------------

/// A stored piece of audio. Never mutated after creation; a new version is a
/// new asset with a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioAsset {
    pub id: Uuid,
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
    /// Opaque handle into the blob store.
    pub storage_ref: AssetRef,
}

impl AudioAsset {
    pub fn new(
        format: AudioFormat,
        sample_rate: u32,
        channels: u16,
        duration_secs: f64,
        storage_ref: AssetRef,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            format,
            sample_rate,
            channels,
            duration_secs,
            storage_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_parameters_are_ignored() {
        assert_eq!(
            AudioFormat::from_content_type("Audio/WAV; codecs=1"),
            Some(AudioFormat::Wav)
        );
    }

    #[test]
    fn flac_round_trips_through_content_type() {
        let f = AudioFormat::Flac;
        assert_eq!(AudioFormat::from_content_type(f.content_type()), Some(f));
        assert_eq!(f.extension(), "flac");
    }
}
