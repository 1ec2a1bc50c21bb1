//! Lyrics generation adapter.
//!
//! ```text
//! ResolvedStyle + topic ──► caps ──► LyricsPromptBuilder ──► TextGenerator
//!                                                             │   ▲
//!                           transient error (429 / timeout) ──┘   │ backoff
//!                                                                 │
//!                           structure mismatch ──► regenerate ────┘ (bounded)
//! ```
//!
//! The adapter never touches project state; the orchestrator records the
//! outcome.

pub mod generator;
pub mod prompt;
pub mod structure;
pub mod style;

pub use generator::{ApiTextGenerator, Prompt, TextGenError, TextGenerator};
pub use prompt::LyricsPromptBuilder;
pub use structure::{count_sections, header_kind, structure_distance, SectionKind};
pub use style::{ResolvedStyle, StyleSpec, UserStyle, USER_STYLE_STRUCTURE};

use std::sync::Arc;

use thiserror::Error;

use crate::config::LyricsConfig;
use crate::retry::Backoff;
use crate::transform::LyricStructure;

// ---------------------------------------------------------------------------
// LyricsError
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LyricsError {
    /// An input exceeded its character cap; nothing was sent upstream.
    #[error("{field} is too long ({got} characters, max {max})")]
    InputTooLong {
        field: &'static str,
        max: usize,
        got: usize,
    },

    /// Transient upstream failures persisted through every retry.
    #[error("generation failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: TextGenError },

    /// The backend rejected the request outright.
    #[error("generation rejected: {0}")]
    Rejected(TextGenError),

    /// Every structural attempt came back blank.
    #[error("generation produced no lyrics")]
    Empty,
}

// ---------------------------------------------------------------------------
// GeneratedLyrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedLyrics {
    pub text: String,
    pub expected: LyricStructure,
    pub found: LyricStructure,
    /// Structural attempts used, including the accepted one.
    pub attempts: u32,
}

impl GeneratedLyrics {
    pub fn structure_matches(&self) -> bool {
        self.expected == self.found
    }
}

// ---------------------------------------------------------------------------
// LyricsGenerator
// ---------------------------------------------------------------------------

pub struct LyricsGenerator {
    config: LyricsConfig,
    backend: Arc<dyn TextGenerator>,
}

impl LyricsGenerator {
    pub fn new(config: LyricsConfig, backend: Arc<dyn TextGenerator>) -> Self {
        Self { config, backend }
    }

    /// Reject a user style whose description or samples exceed the caps.
    pub fn validate_style(&self, style: &UserStyle) -> Result<(), LyricsError> {
        check_cap(
            "style description",
            style.description.chars().count(),
            self.config.max_description_chars,
        )?;
        check_cap(
            "style samples",
            style.sample_chars(),
            self.config.max_sample_chars,
        )
    }

    /// Apply every input cap without calling the backend.
    pub fn validate_request(
        &self,
        style: &ResolvedStyle,
        topic: Option<&str>,
    ) -> Result<(), LyricsError> {
        if let Some(topic) = topic {
            check_cap("topic", topic.chars().count(), self.config.max_topic_chars)?;
        }
        match style {
            ResolvedStyle::User(user) => self.validate_style(user),
            ResolvedStyle::Preset(_) => Ok(()),
        }
    }

    /// Generate lyrics for `style` about `topic`.
    ///
    /// Output whose section counts differ from the style's structure is
    /// regenerated up to `structure_attempts` times; after that the closest
    /// result (earliest on ties) is accepted.
    pub async fn generate(
        &self,
        style: &ResolvedStyle,
        topic: Option<&str>,
    ) -> Result<GeneratedLyrics, LyricsError> {
        self.validate_request(style, topic)?;

        let expected = style.expected_structure();
        let prompt = LyricsPromptBuilder::new(style).build(topic);
        let attempts = self.config.structure_attempts.max(1);
        let mut best: Option<(u32, GeneratedLyrics)> = None;

        for attempt in 1..=attempts {
            let raw = self.call_with_backoff(&prompt).await?;
            let text = raw.trim();
            if text.is_empty() {
                log::warn!("lyrics: attempt {attempt}/{attempts} came back blank");
                continue;
            }

            let found = count_sections(text);
            let distance = structure_distance(expected, found);
            let candidate = GeneratedLyrics {
                text: text.to_string(),
                expected,
                found,
                attempts: attempt,
            };
            if distance == 0 {
                log::info!(
                    "lyrics: {} generated on attempt {attempt} ({} chars)",
                    style.label(),
                    candidate.text.len()
                );
                return Ok(candidate);
            }

            log::warn!(
                "lyrics: attempt {attempt}/{attempts} has {}v/{}h, expected {}v/{}h",
                found.verses,
                found.hooks,
                expected.verses,
                expected.hooks
            );
            if best.as_ref().map_or(true, |(d, _)| distance < *d) {
                best = Some((distance, candidate));
            }
        }

        match best {
            Some((_, mut lyrics)) => {
                lyrics.attempts = attempts;
                log::info!(
                    "lyrics: accepting closest structure for {} after {attempts} attempts",
                    style.label()
                );
                Ok(lyrics)
            }
            None => Err(LyricsError::Empty),
        }
    }

    async fn call_with_backoff(&self, prompt: &Prompt) -> Result<String, LyricsError> {
        let mut backoff = Backoff::new(self.config.retry);
        loop {
            match self.backend.generate(prompt, self.config.max_tokens).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        log::warn!(
                            "lyrics: {err} (attempt {}), retrying in {delay:?}",
                            backoff.attempt() - 1
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        log::error!("lyrics: giving up after {} attempts: {err}", backoff.attempt());
                        return Err(LyricsError::Exhausted {
                            attempts: backoff.attempt(),
                            last: err,
                        });
                    }
                },
                Err(err) => {
                    log::error!("lyrics: backend rejected request: {err}");
                    return Err(LyricsError::Rejected(err));
                }
            }
        }
    }
}

fn check_cap(field: &'static str, got: usize, max: usize) -> Result<(), LyricsError> {
    if got > max {
        Err(LyricsError::InputTooLong { field, max, got })
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
