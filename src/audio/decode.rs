//! Compressed / container audio decoding via `symphonia`.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::asset::AudioFormat;
use super::ingest::AudioError;

/// Interleaved PCM straight out of the decoder.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }
}

/// Decode a complete in-memory file.
///
/// Packets that fail to decode are skipped (the usual player behaviour for
/// a damaged frame); a file that yields no audio at all is an error.
pub fn decode(bytes: &[u8], format: AudioFormat) -> Result<DecodedAudio, AudioError> {
    let source = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.extension());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::Decode(format!("unrecognised container: {e}")))?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::Decode("no audio track".into()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::Decode(format!("unsupported codec: {e}")))?;

    let mut samples = Vec::new();
    let mut skipped = 0usize;

    loop {
        let packet = match reader.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                skipped += 1;
                log::debug!("decode: skipping damaged packet: {msg}");
            }
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        }
    }

    if skipped > 0 {
        log::warn!("decode: skipped {skipped} damaged packet(s)");
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err(AudioError::Decode("file contains no decodable audio".into()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav;

    #[test]
    fn decodes_wav_written_by_hound() {
        let tone: Vec<f32> = (0..4_410)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let bytes = wav::encode_f32(&tone, 44_100).unwrap();

        let decoded = decode(&bytes, AudioFormat::Wav).unwrap();
        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.frames(), tone.len());
        assert!((decoded.samples[100] - tone[100]).abs() < 1e-6);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = decode(b"definitely not audio", AudioFormat::Wav).unwrap_err();
        assert!(matches!(err, AudioError::Decode(_)), "{err}");
    }
}
