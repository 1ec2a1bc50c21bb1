//! MIDI-style reconstruction: onsets and pitches are detected per stem,
//! quantised to a shared tempo grid and re-rendered.
//!
//! # Flow per job
//!
//! ```text
//! transformed stems ──mix──► novelty ──► estimate_tempo ──► TempoGrid
//!                                                             │
//! each stem (parallel):                                       ▼
//!   frame_energy_db ─► novelty ─► pick_peaks ─► estimate_pitch ─► snap
//!   ─► render_events ─► gain-match to source RMS
//!                                                             │
//! join ──► mix (sum + peak normalise) ◄───────────────────────┘
//! ```
//!
//! Snapping to the grid is what moves the output away from the source's
//! micro-timing.

pub mod grid;
pub mod onset;
pub mod pitch;
pub mod render;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::audio::rng::create_rng;
use crate::audio::spectrum::{peak, rms};
use crate::config::ReconstructionConfig;
use crate::separation::InstrumentClass;

pub use grid::{estimate_tempo, TempoGrid};
pub use render::NoteEvent;

/// Stems quieter than this RMS carry no events.
const SILENT_RMS: f32 = 1e-4;
/// Peak level of the final mix.
const MIX_PEAK: f32 = 0.9;
/// Longest note a single event may hold.
const MAX_NOTE_SECS: f64 = 2.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReconstructError {
    #[error("malformed stem: {0}")]
    InvalidAudio(String),

    #[error("{events_per_sec:.1} events/s on {stem} exceeds the density bound of {limit:.1}/s")]
    ProcessingTimeout {
        stem: InstrumentClass,
        events_per_sec: f32,
        limit: f32,
    },
}

pub struct MidiReconstructor {
    config: ReconstructionConfig,
}

impl MidiReconstructor {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self { config }
    }

    fn min_spacing_frames(&self, sample_rate: u32) -> usize {
        let frames = self.config.min_onset_spacing_ms / 1_000.0 * sample_rate as f32
            / self.config.hop_size as f32;
        (frames.ceil() as usize).max(1)
    }

    /// Tempo grid shared by every stem of a job, estimated on their mix.
    pub fn estimate_grid(&self, stems: &BTreeMap<InstrumentClass, Vec<f32>>, sample_rate: u32) -> TempoGrid {
        let len = stems.values().map(Vec::len).max().unwrap_or(0);
        let mut mix = vec![0.0_f32; len];
        for track in stems.values() {
            for (m, &s) in mix.iter_mut().zip(track) {
                *m += s;
            }
        }

        let c = &self.config;
        let energy = onset::frame_energy_db(&mix, c.frame_size, c.hop_size);
        let novelty = onset::novelty(&energy, c.onset_floor_db);
        let bpm = estimate_tempo(
            &novelty,
            c.hop_size,
            sample_rate,
            c.min_tempo_bpm,
            c.max_tempo_bpm,
            c.fallback_tempo_bpm,
        );
        let peaks = onset::pick_peaks(
            &novelty,
            &energy,
            c.onset_delta,
            c.onset_floor_db,
            self.min_spacing_frames(sample_rate),
        );
        let offset = peaks
            .onsets
            .first()
            .map_or(0.0, |&t| (t * c.hop_size) as f64 / sample_rate as f64);

        let grid = TempoGrid::new(bpm, c.grid_subdivision, offset);
        log::debug!(
            "reconstruct: tempo {:.1} BPM, step {:.3}s, offset {:.3}s",
            grid.bpm,
            grid.step_secs(),
            grid.offset_secs
        );
        grid
    }

    /// Detect, pitch-track and quantise the events of one stem.
    pub fn detect(
        &self,
        class: InstrumentClass,
        samples: &[f32],
        sample_rate: u32,
        grid: &TempoGrid,
    ) -> Result<Vec<NoteEvent>, ReconstructError> {
        if sample_rate == 0 {
            return Err(ReconstructError::InvalidAudio("zero sample rate".into()));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(ReconstructError::InvalidAudio(
                "stem contains non-finite samples".into(),
            ));
        }
        if samples.is_empty() || rms(samples) < SILENT_RMS {
            return Ok(Vec::new());
        }

        let c = &self.config;
        let energy = onset::frame_energy_db(samples, c.frame_size, c.hop_size);
        let novelty = onset::novelty(&energy, c.onset_floor_db);
        let peaks = onset::pick_peaks(
            &novelty,
            &energy,
            c.onset_delta,
            c.onset_floor_db,
            self.min_spacing_frames(sample_rate),
        );

        let duration = samples.len() as f32 / sample_rate as f32;
        let density = peaks.candidates as f32 / duration.max(1e-3);
        if density > c.max_events_per_sec {
            return Err(ReconstructError::ProcessingTimeout {
                stem: class,
                events_per_sec: density,
                limit: c.max_events_per_sec,
            });
        }

        // Raw (start, pitch, loudness) per onset.
        let mut raw: Vec<(f64, Option<u8>, f32)> = Vec::with_capacity(peaks.onsets.len());
        for &t in &peaks.onsets {
            let start = t * c.hop_size;
            let end = (start + c.frame_size).min(samples.len());
            let loudness = rms(&samples[start..end]);

            let midi_note = if class == InstrumentClass::Drums {
                None
            } else {
                let window = pitch_window(samples, start + c.hop_size, c.frame_size);
                pitch::estimate_pitch(
                    window,
                    sample_rate,
                    c.min_pitch_hz,
                    c.max_pitch_hz,
                    c.voicing_threshold,
                )
                .map(pitch::hz_to_midi)
            };

            raw.push((grid.snap(start as f64 / sample_rate as f64), midi_note, loudness));
        }

        // Merge events that snapped to the same slot, keeping the loudest.
        let mut merged: Vec<(f64, Option<u8>, f32)> = Vec::with_capacity(raw.len());
        for ev in raw {
            match merged.last_mut() {
                Some(last) if (last.0 - ev.0).abs() < 1e-9 => {
                    if ev.2 > last.2 {
                        *last = ev;
                    }
                }
                _ => merged.push(ev),
            }
        }

        let loudest = merged.iter().map(|e| e.2).fold(0.0_f32, f32::max);
        let total = samples.len() as f64 / sample_rate as f64;
        let step = grid.step_secs();

        let events = merged
            .iter()
            .enumerate()
            .map(|(i, &(start, midi_note, loudness))| {
                let next = merged.get(i + 1).map_or(total, |e| e.0);
                let duration = (next - start).clamp(step.min(MAX_NOTE_SECS), MAX_NOTE_SECS);
                NoteEvent {
                    start_secs: start,
                    duration_secs: duration,
                    midi_note,
                    velocity: if loudest > 0.0 {
                        (loudness / loudest).clamp(0.05, 1.0)
                    } else {
                        1.0
                    },
                }
            })
            .collect::<Vec<_>>();

        log::debug!(
            "reconstruct: {class}: {} onsets -> {} events ({} pitched)",
            peaks.onsets.len(),
            events.len(),
            events.iter().filter(|e| e.midi_note.is_some()).count()
        );
        Ok(events)
    }

    /// Render events for one stem and match the loudness of `source`.
    pub fn render(
        &self,
        class: InstrumentClass,
        events: &[NoteEvent],
        source: &[f32],
        sample_rate: u32,
        seed: u32,
    ) -> Vec<f32> {
        let decay = if class == InstrumentClass::Drums { 0.05 } else { 0.12 };
        let mut rng = create_rng(seed);
        let mut out = render::render_events(events, source.len(), sample_rate, decay, &mut rng);

        let target = rms(source);
        let current = rms(&out);
        if current > 1e-9 {
            let gain = target / current;
            for s in out.iter_mut() {
                *s *= gain;
            }
        }
        out
    }

    /// Detect and render one stem.
    pub fn reconstruct_stem(
        &self,
        class: InstrumentClass,
        samples: &[f32],
        sample_rate: u32,
        grid: &TempoGrid,
        seed: u32,
    ) -> Result<Vec<f32>, ReconstructError> {
        let events = self.detect(class, samples, sample_rate, grid)?;
        Ok(self.render(class, &events, samples, sample_rate, seed))
    }
}

/// Sum rendered stems and normalise the peak.
pub fn mix(stems: &BTreeMap<InstrumentClass, Vec<f32>>) -> Vec<f32> {
    let len = stems.values().map(Vec::len).max().unwrap_or(0);
    let mut out = vec![0.0_f32; len];
    for track in stems.values() {
        for (o, &s) in out.iter_mut().zip(track) {
            *o += s;
        }
    }
    let p = peak(&out);
    if p > 1e-9 {
        let gain = MIX_PEAK / p;
        for s in out.iter_mut() {
            *s *= gain;
        }
    }
    out
}

/// `frame` samples starting at `start`, shifted back to fit when the stem
/// ends first.
fn pitch_window(samples: &[f32], start: usize, frame: usize) -> &[f32] {
    if samples.len() <= frame {
        return samples;
    }
    let start = start.min(samples.len() - frame);
    &samples[start..start + frame]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 44_100;

    /// Notes of `freq` Hz starting every `period_secs` (with optional jitter).
    fn notes(freq: f32, secs: f32, period_secs: f32, jitter_secs: f32) -> Vec<f32> {
        let n = (secs * RATE as f32) as usize;
        let period = (period_secs * RATE as f32) as usize;
        let jitter = (jitter_secs * RATE as f32) as usize;
        let mut out = vec![0.0_f32; n];
        let mut k = 0;
        loop {
            let start = k * period + if k % 2 == 1 { jitter } else { 0 };
            if start >= n {
                break;
            }
            let end = (start + period / 2).min(n);
            for (i, o) in out[start..end].iter_mut().enumerate() {
                let t = i as f32 / RATE as f32;
                *o = (2.0 * std::f32::consts::PI * freq * t).sin() * 0.5 * (-t * 4.0).exp();
            }
            k += 1;
        }
        out
    }

    fn clicks(secs: f32, period_secs: f32) -> Vec<f32> {
        let n = (secs * RATE as f32) as usize;
        let period = (period_secs * RATE as f32) as usize;
        (0..n)
            .map(|i| if i % period < 200 { 0.8 * (1.0 - (i % period) as f32 / 200.0) } else { 0.0 })
            .collect()
    }

    fn reconstructor() -> MidiReconstructor {
        MidiReconstructor::new(ReconstructionConfig::default())
    }

    #[test]
    fn grid_follows_note_rate() {
        let mut stems = BTreeMap::new();
        stems.insert(InstrumentClass::Melody, notes(440.0, 6.0, 0.5, 0.0));
        let grid = reconstructor().estimate_grid(&stems, RATE);
        assert!((grid.bpm - 120.0).abs() < 3.0, "bpm {}", grid.bpm);
        assert_eq!(grid.subdivision, 4);
    }

    #[test]
    fn events_are_snapped_and_pitched() {
        let melody = notes(220.0, 4.0, 0.5, 0.03);
        let grid = TempoGrid::new(120.0, 4, 0.0);
        let events = reconstructor()
            .detect(InstrumentClass::Melody, &melody, RATE, &grid)
            .unwrap();

        assert_eq!(events.len(), 8, "{events:?}");
        let step = grid.step_secs();
        for e in &events {
            let slots = e.start_secs / step;
            assert!((slots - slots.round()).abs() < 1e-6, "{} not on grid", e.start_secs);
            assert_eq!(e.midi_note, Some(57));
            assert!(e.velocity > 0.0 && e.velocity <= 1.0);
        }
    }

    #[test]
    fn drums_stay_unpitched() {
        let drums = notes(220.0, 2.0, 0.5, 0.0);
        let grid = TempoGrid::new(120.0, 4, 0.0);
        let events = reconstructor()
            .detect(InstrumentClass::Drums, &drums, RATE, &grid)
            .unwrap();
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| e.midi_note.is_none()));
    }

    #[test]
    fn dense_material_exceeds_bound() {
        let mut config = ReconstructionConfig::default();
        config.max_events_per_sec = 2.0;
        let dense = clicks(2.0, 0.1);
        let grid = TempoGrid::new(120.0, 4, 0.0);
        let err = MidiReconstructor::new(config)
            .detect(InstrumentClass::Melody, &dense, RATE, &grid)
            .unwrap_err();
        assert!(matches!(err, ReconstructError::ProcessingTimeout { .. }), "{err}");
    }

    #[test]
    fn silent_stem_renders_silence() {
        let grid = TempoGrid::new(120.0, 4, 0.0);
        let out = reconstructor()
            .reconstruct_stem(InstrumentClass::Other, &vec![0.0; 4_410], RATE, &grid, 3)
            .unwrap();
        assert_eq!(out.len(), 4_410);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn render_matches_source_loudness_and_is_seeded() {
        let source = notes(110.0, 2.0, 0.5, 0.0);
        let grid = TempoGrid::new(120.0, 4, 0.0);
        let r = reconstructor();
        let a = r
            .reconstruct_stem(InstrumentClass::Drums, &source, RATE, &grid, 11)
            .unwrap();
        let b = r
            .reconstruct_stem(InstrumentClass::Drums, &source, RATE, &grid, 11)
            .unwrap();
        assert_eq!(a, b);
        assert!((rms(&a) - rms(&source)).abs() / rms(&source) < 1e-3);
    }

    #[test]
    fn mix_normalises_peak() {
        let mut stems = BTreeMap::new();
        stems.insert(InstrumentClass::Bass, vec![0.5, -2.0, 0.1]);
        stems.insert(InstrumentClass::Melody, vec![0.5, 0.0]);
        let out = mix(&stems);
        assert_eq!(out.len(), 3);
        assert!((peak(&out) - MIX_PEAK).abs() < 1e-6);
    }
}
