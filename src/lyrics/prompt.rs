//! Prompt builder for rap lyric generation.
//!
//! [`LyricsPromptBuilder`] produces a chat [`Prompt`]: the system message
//! fixes the output format (labelled sections, exact counts), the user
//! message carries the style (preset description, or a user description
//! with few-shot samples) and the optional topic.

use super::generator::Prompt;
use super::style::ResolvedStyle;
use crate::transform::LyricStructure;

// ---------------------------------------------------------------------------
// System instruction
// ---------------------------------------------------------------------------

const SYSTEM_INSTRUCTION: &str = "\
You are a professional rap lyricist writing for an instrumental beat.

Rules:
1. Label every section on its own line, exactly as [Verse N] or [Hook].
2. Write exactly the number of verses and hooks requested.
3. Keep lines rhythmic and ready to perform over the beat.
4. Reply with ONLY the lyrics: no titles, notes or explanations.";

// ---------------------------------------------------------------------------
// LyricsPromptBuilder
// ---------------------------------------------------------------------------

/// Builds lyric prompts for one resolved style.
///
/// ```rust
/// use lyrics_beats::lyrics::{LyricsPromptBuilder, ResolvedStyle};
/// use lyrics_beats::transform::StylePreset;
///
/// let style = ResolvedStyle::Preset(StylePreset::Drill);
/// let prompt = LyricsPromptBuilder::new(&style).build(Some("street hustle"));
/// assert!(prompt.user.contains("street hustle"));
/// ```
pub struct LyricsPromptBuilder<'a> {
    style: &'a ResolvedStyle,
}

impl<'a> LyricsPromptBuilder<'a> {
    pub fn new(style: &'a ResolvedStyle) -> Self {
        Self { style }
    }

    /// Structure (in order): style, few-shot samples (user styles only),
    /// requested structure, topic.
    pub fn build(&self, topic: Option<&str>) -> Prompt {
        let mut user = String::with_capacity(1024);

        match self.style {
            ResolvedStyle::Preset(preset) => {
                user.push_str(&format!(
                    "Style: {}\n{}\n",
                    preset.name(),
                    preset.description()
                ));
            }
            ResolvedStyle::User(style) => {
                user.push_str(&format!("Style: {}\n{}\n", style.name, style.description.trim()));
                let samples: Vec<&str> = style
                    .samples
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .collect();
                if !samples.is_empty() {
                    user.push_str("\nMatch the voice and flow of these examples:\n");
                    for (i, sample) in samples.iter().enumerate() {
                        user.push_str(&format!("\nExample {}:\n{}\n", i + 1, sample));
                    }
                }
            }
        }

        user.push('\n');
        user.push_str(&structure_line(self.style.expected_structure()));

        if let Some(topic) = topic.map(str::trim).filter(|t| !t.is_empty()) {
            user.push_str(&format!("\nTopic: {topic}\n"));
        }
        user.push_str("\nLyrics:\n");

        Prompt {
            system: SYSTEM_INSTRUCTION.to_string(),
            user,
        }
    }
}

fn structure_line(s: LyricStructure) -> String {
    let plural = |n: u32, word: &str| {
        if n == 1 {
            format!("{n} {word}")
        } else {
            format!("{n} {word}s")
        }
    };
    format!(
        "Structure: exactly {} and {}.\n",
        plural(s.verses, "verse"),
        plural(s.hooks, "hook")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lyrics::style::UserStyle;
    use crate::transform::StylePreset;

    #[test]
    fn preset_prompt_carries_description_and_structure() {
        let style = ResolvedStyle::Preset(StylePreset::Trap);
        let prompt = LyricsPromptBuilder::new(&style).build(None);
        assert!(prompt.system.contains("[Verse N]"));
        assert!(prompt.user.contains("Style: trap"));
        assert!(prompt.user.contains(StylePreset::Trap.description()));
        assert!(prompt.user.contains("exactly 2 verses and 3 hooks"));
        assert!(!prompt.user.contains("Topic:"));
    }

    #[test]
    fn user_style_adds_few_shot_examples() {
        let style = ResolvedStyle::User(UserStyle::new(
            "Night Shift",
            "moody, slow, introspective",
            vec!["first sample bars".into(), "   ".into(), "second sample bars".into()],
        ));
        let prompt = LyricsPromptBuilder::new(&style).build(Some("  late trains  "));
        assert!(prompt.user.contains("moody, slow, introspective"));
        assert!(prompt.user.contains("Example 1:\nfirst sample bars"));
        assert!(prompt.user.contains("Example 2:\nsecond sample bars"));
        assert!(!prompt.user.contains("Example 3"));
        assert!(prompt.user.contains("exactly 3 verses and 1 hook."));
        assert!(prompt.user.contains("Topic: late trains\n"));
    }

    #[test]
    fn blank_topic_is_omitted() {
        let style = ResolvedStyle::Preset(StylePreset::LoFi);
        let prompt = LyricsPromptBuilder::new(&style).build(Some("   "));
        assert!(!prompt.user.contains("Topic:"));
    }
}
