//! In-memory WAV encoding and decoding via `hound`.
//!
//! Intermediate stems are stored as 32-bit float so a cached separation
//! reloads bit-exact. Final renders are 16-bit PCM with seeded TPDF dither.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rand::Rng;

use super::rng::create_rng;

/// Encode mono `f32` samples as a 32-bit float WAV.
pub fn encode_f32(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    encode_interleaved_f32(samples, sample_rate, 1)
}

/// Encode interleaved `f32` samples as a 32-bit float WAV.
pub fn encode_interleaved_f32(
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Encode mono samples as 16-bit PCM with triangular dither drawn from a
/// generator seeded by `seed`. Equal input and seed give equal bytes.
pub fn encode_pcm16_dithered(
    samples: &[f32],
    sample_rate: u32,
    seed: u32,
) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut rng = create_rng(seed);
    let scale = i16::MAX as f32;

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            // TPDF: sum of two uniform values, one LSB peak.
            let dither = rng.gen::<f32>() - rng.gen::<f32>();
            let value = (s.clamp(-1.0, 1.0) * scale + dither)
                .round()
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            writer.write_sample(value)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Decode a WAV into mono `f32`, averaging channels when needed.
pub fn decode_mono(bytes: &[u8]) -> Result<(Vec<f32>, u32), hound::Error> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let max = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<_, _>>()?
        }
    };

    Ok((
        super::resample::downmix_to_mono(&interleaved, spec.channels),
        spec.sample_rate,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_wav_reloads_exactly() {
        let samples: Vec<f32> = (0..1_000).map(|i| (i as f32 * 0.01).sin() * 0.7).collect();
        let bytes = encode_f32(&samples, 44_100).unwrap();
        let (back, rate) = decode_mono(&bytes).unwrap();
        assert_eq!(rate, 44_100);
        assert_eq!(back, samples);
    }

    #[test]
    fn dithered_pcm_is_deterministic_per_seed() {
        let samples: Vec<f32> = (0..2_000).map(|i| (i as f32 * 0.02).sin() * 0.3).collect();
        let a = encode_pcm16_dithered(&samples, 44_100, 7).unwrap();
        let b = encode_pcm16_dithered(&samples, 44_100, 7).unwrap();
        let c = encode_pcm16_dithered(&samples, 44_100, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn dithered_pcm_stays_close_to_source() {
        let samples: Vec<f32> = (0..500).map(|i| (i as f32 * 0.05).cos() * 0.5).collect();
        let bytes = encode_pcm16_dithered(&samples, 22_050, 1).unwrap();
        let (back, rate) = decode_mono(&bytes).unwrap();
        assert_eq!(rate, 22_050);
        assert_eq!(back.len(), samples.len());
        for (a, b) in samples.iter().zip(&back) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn hot_samples_are_clamped() {
        let bytes = encode_pcm16_dithered(&[2.0, -2.0], 8_000, 0).unwrap();
        let (back, _) = decode_mono(&bytes).unwrap();
        assert!(back[0] > 0.99 && back[0] <= 1.0);
        assert!(back[1] < -0.99 && back[1] >= -1.0);
    }
}
