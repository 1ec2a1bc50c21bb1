//! Bounded exponential backoff.
//!
//! Used by the orchestrator for `ProcessingTimeout` stages and by the lyrics
//! generator for rate-limited / timed-out backend calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy shared by the pipeline and the lyrics generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

/// Iterator-like backoff state for one operation.
///
/// ```
/// use std::time::Duration;
/// use lyrics_beats::retry::{Backoff, RetryConfig};
///
/// let mut backoff = Backoff::new(RetryConfig { max_attempts: 3, base_delay_ms: 100, max_delay_ms: 1_000 });
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
/// assert_eq!(backoff.next_delay(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 1 }
    }

    /// The 1-based number of the attempt currently running.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, or `None` when attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        let exp = self.attempt.saturating_sub(1).min(20);
        let delay = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.max_delay_ms);
        self.attempt += 1;
        Some(Duration::from_millis(delay))
    }
}
