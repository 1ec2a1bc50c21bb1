//! Re-synthesis of quantised note events.

use rand::Rng;
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use super::pitch::midi_to_hz;

/// One quantised event on a stem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub start_secs: f64,
    pub duration_secs: f64,
    /// `None` for unpitched (percussive) events.
    pub midi_note: Option<u8>,
    /// Relative loudness in `(0, 1]`.
    pub velocity: f32,
}

const ATTACK_SECS: f32 = 0.01;
const DECAY_SECS: f32 = 0.08;
const SUSTAIN_LEVEL: f32 = 0.6;
const RELEASE_SECS: f32 = 0.06;
const HARMONICS: [f32; 3] = [1.0, 0.5, 0.25];

/// ADSR amplitude `t` seconds into a note held for `hold` seconds.
fn adsr(t: f32, hold: f32) -> f32 {
    let held = if t < ATTACK_SECS {
        t / ATTACK_SECS
    } else if t < ATTACK_SECS + DECAY_SECS {
        1.0 - (1.0 - SUSTAIN_LEVEL) * (t - ATTACK_SECS) / DECAY_SECS
    } else {
        SUSTAIN_LEVEL
    };
    if t <= hold {
        held
    } else {
        let level_at_release = adsr(hold, hold);
        (level_at_release * (1.0 - (t - hold) / RELEASE_SECS)).max(0.0)
    }
}

/// Render `events` into a buffer of `len` samples.
///
/// Pitched events become additive tones with an ADSR envelope; unpitched
/// events become decaying noise bursts drawn from `rng`, with `noise_decay_secs`
/// as the exponential time constant.
pub fn render_events(
    events: &[NoteEvent],
    len: usize,
    sample_rate: u32,
    noise_decay_secs: f32,
    rng: &mut Pcg32,
) -> Vec<f32> {
    let sr = sample_rate as f32;
    let mut out = vec![0.0_f32; len];

    for event in events {
        let start = (event.start_secs * sample_rate as f64).round() as usize;
        if start >= len {
            continue;
        }
        let hold = event.duration_secs as f32;

        match event.midi_note {
            Some(note) => {
                let f0 = midi_to_hz(note);
                let nyquist = sr / 2.0;
                let end = (start + ((hold + RELEASE_SECS) * sr) as usize).min(len);
                for (i, o) in out[start..end].iter_mut().enumerate() {
                    let t = i as f32 / sr;
                    let mut v = 0.0;
                    for (h, &amp) in HARMONICS.iter().enumerate() {
                        let f = f0 * (h + 1) as f32;
                        if f < nyquist {
                            v += amp * (2.0 * std::f32::consts::PI * f * t).sin();
                        }
                    }
                    *o += v * adsr(t, hold) * event.velocity;
                }
            }
            None => {
                let burst = hold.min(noise_decay_secs * 6.0);
                let end = (start + (burst * sr) as usize).min(len);
                for (i, o) in out[start..end].iter_mut().enumerate() {
                    let t = i as f32 / sr;
                    let noise: f32 = rng.gen_range(-1.0..1.0);
                    *o += noise * (-t / noise_decay_secs).exp() * event.velocity;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::rng::create_rng;

    fn hit(start: f64, note: Option<u8>) -> NoteEvent {
        NoteEvent {
            start_secs: start,
            duration_secs: 0.25,
            midi_note: note,
            velocity: 1.0,
        }
    }

    #[test]
    fn envelope_shape() {
        assert_eq!(adsr(0.0, 1.0), 0.0);
        assert!((adsr(ATTACK_SECS, 1.0) - 1.0).abs() < 1e-6);
        assert!((adsr(0.5, 1.0) - SUSTAIN_LEVEL).abs() < 1e-6);
        assert_eq!(adsr(1.0 + RELEASE_SECS + 0.01, 1.0), 0.0);
    }

    #[test]
    fn noise_is_seeded() {
        let events = vec![hit(0.0, None), hit(0.5, None)];
        let a = render_events(&events, 22_050, 22_050, 0.05, &mut create_rng(1));
        let b = render_events(&events, 22_050, 22_050, 0.05, &mut create_rng(1));
        let c = render_events(&events, 22_050, 22_050, 0.05, &mut create_rng(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn tone_starts_at_event_and_stays_in_buffer() {
        let events = vec![hit(0.5, Some(69)), hit(5.0, Some(69))];
        let out = render_events(&events, 22_050, 22_050, 0.05, &mut create_rng(0));
        assert_eq!(out.len(), 22_050);
        assert!(out[..11_025].iter().all(|&s| s == 0.0));
        assert!(out[11_025..].iter().any(|&s| s.abs() > 0.1));
    }
}
