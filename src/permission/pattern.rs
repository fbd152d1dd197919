//! Auto-approve / auto-deny patterns.

use regex::Regex;

/// Error type for pattern parsing.
#[derive(thiserror::Error, Debug)]
pub enum PatternError {
    /// Invalid regex pattern.
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// An operation pattern: either a plain substring or a regular expression.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches when the operation contains this text.
    Substring(String),
    /// Matches when the regex finds a match anywhere in the operation.
    Regex(Regex),
}

impl Pattern {
    /// Parse a pattern from configuration text.
    ///
    /// `/expr/` and `re:expr` are compiled as regular expressions; anything
    /// else is a substring.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::InvalidRegex` if a regex form fails to compile.
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        if let Some(expr) = text.strip_prefix("re:") {
            return Ok(Self::Regex(Regex::new(expr)?));
        }
        if text.len() >= 2 && text.starts_with('/') && text.ends_with('/') {
            return Ok(Self::Regex(Regex::new(&text[1..text.len() - 1])?));
        }
        Ok(Self::Substring(text.to_string()))
    }

    /// Check if the text matches this pattern.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Substring(s) => text.contains(s.as_str()),
            Self::Regex(re) => re.is_match(text),
        }
    }

    /// Get the pattern source (for debugging/display).
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Substring(s) => s,
            Self::Regex(re) => re.as_str(),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Self::Substring(s.to_string())
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Self::Substring(s)
    }
}

impl From<Regex> for Pattern {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

/// Match `text` against an optional pattern. A missing pattern never matches.
#[must_use]
pub fn matches_pattern(text: &str, pattern: Option<&Pattern>) -> bool {
    pattern.is_some_and(|p| p.matches(text))
}
