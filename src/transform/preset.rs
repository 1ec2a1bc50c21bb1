//! Named beat styles and the parameters each one resolves to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// EqCurve
// ---------------------------------------------------------------------------

/// Piecewise gain curve, interpolated linearly in log-frequency.
///
/// Outside the first/last point the end gains are held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqCurve {
    /// `(frequency_hz, gain_db)`, strictly increasing in frequency.
    pub points: Vec<(f32, f32)>,
}

impl EqCurve {
    pub fn flat() -> Self {
        Self { points: Vec::new() }
    }

    pub fn new(points: &[(f32, f32)]) -> Self {
        Self {
            points: points.to_vec(),
        }
    }

    /// ```
    /// use lyrics_beats::transform::EqCurve;
    ///
    /// let eq = EqCurve::new(&[(100.0, 0.0), (1_000.0, 6.0)]);
    /// assert_eq!(eq.gain_db(50.0), 0.0);
    /// assert!((eq.gain_db(316.23) - 3.0).abs() < 0.01);
    /// assert_eq!(eq.gain_db(5_000.0), 6.0);
    /// ```
    pub fn gain_db(&self, freq_hz: f32) -> f32 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return 0.0,
        };
        if freq_hz <= first.0 {
            return first.1;
        }
        if freq_hz >= last.0 {
            return last.1;
        }
        for pair in self.points.windows(2) {
            let (f0, g0) = pair[0];
            let (f1, g1) = pair[1];
            if freq_hz <= f1 {
                let x = (freq_hz.ln() - f0.ln()) / (f1.ln() - f0.ln());
                return g0 + (g1 - g0) * x;
            }
        }
        last.1
    }

    pub fn gain_linear(&self, freq_hz: f32) -> f32 {
        10f32.powf(self.gain_db(freq_hz) / 20.0)
    }

    fn is_valid(&self) -> bool {
        self.points
            .iter()
            .all(|&(f, g)| f > 0.0 && f.is_finite() && g.is_finite() && g.abs() <= 24.0)
            && self.points.windows(2).all(|w| w[0].0 < w[1].0)
    }
}

// ---------------------------------------------------------------------------
// TransformParams
// ---------------------------------------------------------------------------

/// The uniform contract every style resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    pub pitch_shift_semitones: f32,
    /// Playback speed: `< 1` slows down (longer output).
    pub tempo_ratio: f32,
    pub eq_curve: EqCurve,
}

impl TransformParams {
    /// Frequency multiplier for the pitch shift.
    pub fn pitch_ratio(&self) -> f64 {
        2f64.powf(self.pitch_shift_semitones as f64 / 12.0)
    }

    pub fn is_valid(&self) -> bool {
        self.pitch_shift_semitones.abs() <= 12.0
            && self.tempo_ratio >= 0.5
            && self.tempo_ratio <= 2.0
            && self.eq_curve.is_valid()
    }
}

// ---------------------------------------------------------------------------
// LyricStructure
// ---------------------------------------------------------------------------

/// Expected number of verse and hook sections in generated lyrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricStructure {
    pub verses: u32,
    pub hooks: u32,
}

impl LyricStructure {
    pub fn sections(&self) -> u32 {
        self.verses + self.hooks
    }
}

// ---------------------------------------------------------------------------
// StylePreset
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown style preset '{0}' (expected one of: trap, drill, boom_bap, conscious, lofi)")]
pub struct UnknownPreset(pub String);

/// Closed set of beat/lyric styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StylePreset {
    #[serde(rename = "trap")]
    Trap,
    #[serde(rename = "drill")]
    Drill,
    #[serde(rename = "boom_bap")]
    BoomBap,
    #[serde(rename = "conscious")]
    Conscious,
    #[serde(rename = "lofi")]
    LoFi,
}

impl StylePreset {
    pub const ALL: [StylePreset; 5] = [
        Self::Trap,
        Self::Drill,
        Self::BoomBap,
        Self::Conscious,
        Self::LoFi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Trap => "trap",
            Self::Drill => "drill",
            Self::BoomBap => "boom_bap",
            Self::Conscious => "conscious",
            Self::LoFi => "lofi",
        }
    }

    pub fn transform_params(&self) -> TransformParams {
        let (pitch, tempo, eq): (f32, f32, &[(f32, f32)]) = match self {
            Self::Trap => (
                -2.0,
                0.95,
                &[(60.0, 3.0), (250.0, 0.0), (4_000.0, -1.0), (10_000.0, 2.0)],
            ),
            Self::Drill => (
                -1.0,
                1.03,
                &[(50.0, 4.0), (120.0, 2.0), (2_500.0, -2.0), (8_000.0, 1.0)],
            ),
            Self::BoomBap => (1.0, 0.92, &[(80.0, 2.0), (1_000.0, 1.0), (6_000.0, -3.0)]),
            Self::Conscious => (0.0, 0.97, &[(100.0, 1.0), (2_000.0, 1.5), (8_000.0, 0.0)]),
            Self::LoFi => (-3.0, 0.90, &[(100.0, 2.0), (3_000.0, -4.0), (8_000.0, -9.0)]),
        };
        TransformParams {
            pitch_shift_semitones: pitch,
            tempo_ratio: tempo,
            eq_curve: EqCurve::new(eq),
        }
    }

    pub fn lyric_structure(&self) -> LyricStructure {
        let (verses, hooks) = match self {
            Self::Trap => (2, 3),
            Self::Drill => (2, 2),
            Self::BoomBap => (3, 2),
            Self::Conscious => (3, 1),
            Self::LoFi => (2, 2),
        };
        LyricStructure { verses, hooks }
    }

    /// One-line flavour text used when prompting for lyrics.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Trap => {
                "Southern trap: rolling hi-hat flows, repetitive chant-like hooks, \
                 flexing and grind imagery, ad-libs in parentheses"
            }
            Self::Drill => {
                "UK/NY drill: dark sliding-808 cadence, clipped triplet flows, \
                 gritty street narrative, menacing but measured delivery"
            }
            Self::BoomBap => {
                "90s boom bap: dense multisyllabic rhymes, punchlines, \
                 storytelling over head-nod drums"
            }
            Self::Conscious => {
                "Conscious rap: reflective, socially aware verses with vivid \
                 imagery and a sincere, uplifting hook"
            }
            Self::LoFi => {
                "Lo-fi: laid-back, introspective bars, late-night mood, \
                 soft conversational delivery"
            }
        }
    }
}

impl fmt::Display for StylePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StylePreset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase().replace('-', "_").replace(' ', "_");
        match normalised.as_str() {
            "trap" => Ok(Self::Trap),
            "drill" => Ok(Self::Drill),
            "boom_bap" | "boombap" => Ok(Self::BoomBap),
            "conscious" => Ok(Self::Conscious),
            "lofi" | "lo_fi" => Ok(Self::LoFi),
            _ => Err(UnknownPreset(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_is_valid() {
        for preset in StylePreset::ALL {
            let params = preset.transform_params();
            assert!(params.is_valid(), "{preset} has invalid params");
            assert!(preset.lyric_structure().verses >= 1);
            assert!(preset.lyric_structure().hooks >= 1);
            assert!(!preset.description().is_empty());
        }
    }

    #[test]
    fn names_round_trip() {
        for preset in StylePreset::ALL {
            assert_eq!(preset.name().parse::<StylePreset>().unwrap(), preset);
            let json = serde_json::to_string(&preset).unwrap();
            assert_eq!(json, format!("\"{}\"", preset.name()));
        }
        assert_eq!("Boom Bap".parse::<StylePreset>().unwrap(), StylePreset::BoomBap);
        assert!("polka".parse::<StylePreset>().is_err());
    }

    #[test]
    fn trap_matches_published_values() {
        let p = StylePreset::Trap.transform_params();
        assert_eq!(p.pitch_shift_semitones, -2.0);
        assert_eq!(p.tempo_ratio, 0.95);
        assert!((p.pitch_ratio() - 0.890_899_5).abs() < 1e-6);
    }

    #[test]
    fn flat_curve_is_unity() {
        let eq = EqCurve::flat();
        assert_eq!(eq.gain_db(1_000.0), 0.0);
        assert_eq!(eq.gain_linear(1_000.0), 1.0);
    }

    #[test]
    fn unsorted_curve_is_invalid() {
        let params = TransformParams {
            pitch_shift_semitones: 0.0,
            tempo_ratio: 1.0,
            eq_curve: EqCurve::new(&[(1_000.0, 0.0), (100.0, 0.0)]),
        };
        assert!(!params.is_valid());
    }
}
