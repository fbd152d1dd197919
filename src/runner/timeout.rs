//! Prompt-based estimate of how long a command may run.

use std::time::Duration;

/// Estimates above this are handed to the long-running task delegate.
pub const LONG_RUNNING_THRESHOLD: Duration = Duration::from_secs(300);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const SIMPLE_TIMEOUT: Duration = Duration::from_secs(120);
const MEDIUM_TIMEOUT: Duration = Duration::from_secs(180);
const COMPLEX_TIMEOUT: Duration = Duration::from_secs(300);
const VERY_COMPLEX_TIMEOUT: Duration = Duration::from_secs(600);

const COMPLEX_KEYWORDS: &[&str] = &[
    "review", "analyze", "refactor", "debug", "audit", "test", "document",
];

const VERY_COMPLEX_KEYWORDS: &[&str] = &[
    "comprehensive",
    "expert",
    "thorough",
    "entire project",
    "complete",
    "full",
];

/// Estimates the ceiling timeout for a prompt.
pub trait TimeoutEstimator: Send + Sync {
    fn timeout_for(&self, prompt: &str) -> Duration;
}

/// Tiered estimate by prompt length and complexity keywords.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptTimeoutEstimator;

impl TimeoutEstimator for PromptTimeoutEstimator {
    fn timeout_for(&self, prompt: &str) -> Duration {
        calculate_timeout_for_command(prompt)
    }
}

/// Compute the ceiling timeout for a prompt.
///
/// Very-complex keywords win over everything else; complex keywords and
/// long prompts share the next tier.
#[must_use]
pub fn calculate_timeout_for_command(prompt: &str) -> Duration {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return DEFAULT_TIMEOUT;
    }

    let lower = trimmed.to_lowercase();
    let length = trimmed.chars().count();

    if VERY_COMPLEX_KEYWORDS.iter().any(|k| lower.contains(k)) {
        VERY_COMPLEX_TIMEOUT
    } else if length > 200 || COMPLEX_KEYWORDS.iter().any(|k| lower.contains(k)) {
        COMPLEX_TIMEOUT
    } else if length > 50 {
        MEDIUM_TIMEOUT
    } else {
        SIMPLE_TIMEOUT
    }
}
