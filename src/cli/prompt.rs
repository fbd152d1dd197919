//! Detection of permission prompts in CLI output.

use std::sync::LazyLock;

use regex::Regex;

/// Prompt returned when no specific line could be identified.
pub const GENERIC_PERMISSION_PROMPT: &str = "Permission required to proceed";

/// Replies that count as approval.
const APPROVAL_TOKENS: &[&str] = &[
    "y", "yes", "approve", "allow", "accept", "ok", "proceed", "continue",
];

static PROMPT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\(y/n\)",
        r"\[y/n\]",
        r"\ballow\b",
        r"do you want to (continue|proceed)",
        r"should i (proceed|continue)",
    ]
    .into_iter()
    .filter_map(|pattern| match Regex::new(&format!("(?i){pattern}")) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(error = %e, pattern, "Failed to compile permission prompt pattern");
            None
        }
    })
    .collect()
});

fn matches_any(text: &str) -> bool {
    PROMPT_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Returns true if the text looks like the CLI asking for approval.
#[must_use]
pub fn is_permission_prompt(text: &str) -> bool {
    matches_any(text)
}

/// Pick the line of `text` that carries the permission question.
#[must_use]
pub fn extract_permission_prompt(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && matches_any(line))
        .map_or_else(|| GENERIC_PERMISSION_PROMPT.to_string(), str::to_string)
}

/// Returns true if a user reply approves the pending prompt.
#[must_use]
pub fn contains_approval_response(text: &str) -> bool {
    let reply = text.trim().to_lowercase();
    APPROVAL_TOKENS.contains(&reply.as_str())
}
