//! Section counting for generated lyrics.
//!
//! A header line names a verse or a hook, optionally decorated the way
//! chat models tend to write them:
//!
//! ```text
//! [Verse 1]      **Hook**      ## Chorus:      Verse 2:      Refrain
//! ```

use crate::transform::LyricStructure;

const MAX_HEADER_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Verse,
    Hook,
}

/// Classify one line as a section header.
pub fn header_kind(line: &str) -> Option<SectionKind> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_HEADER_CHARS {
        return None;
    }
    let decorated = trimmed.starts_with(|c: char| matches!(c, '[' | '#' | '*' | '('))
        || trimmed.ends_with(|c: char| matches!(c, ':' | ']' | ')'));

    let inner = trimmed
        .trim_matches(|c: char| matches!(c, '[' | ']' | '(' | ')' | '*' | '#' | ':') || c.is_whitespace())
        .to_lowercase();

    let (kind, rest) = if let Some(rest) = inner.strip_prefix("verse") {
        (SectionKind::Verse, rest)
    } else if let Some(rest) = inner.strip_prefix("hook") {
        (SectionKind::Hook, rest)
    } else if let Some(rest) = inner.strip_prefix("chorus") {
        (SectionKind::Hook, rest)
    } else if let Some(rest) = inner.strip_prefix("refrain") {
        (SectionKind::Hook, rest)
    } else {
        return None;
    };

    // "Verse 2", "Hook - x2" are headers; "Hook me up with the cash" is a lyric.
    if rest.starts_with(|c: char| c.is_alphabetic()) {
        return None;
    }
    let bare = rest
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_whitespace());
    if decorated || bare {
        Some(kind)
    } else {
        None
    }
}

/// Count verse and hook headers in `text`.
pub fn count_sections(text: &str) -> LyricStructure {
    let mut found = LyricStructure {
        verses: 0,
        hooks: 0,
    };
    for kind in text.lines().filter_map(header_kind) {
        match kind {
            SectionKind::Verse => found.verses += 1,
            SectionKind::Hook => found.hooks += 1,
        }
    }
    found
}

/// Distance between two structures; 0 means an exact match.
pub fn structure_distance(a: LyricStructure, b: LyricStructure) -> u32 {
    a.verses.abs_diff(b.verses) + a.hooks.abs_diff(b.hooks)
}
