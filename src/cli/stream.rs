//! Stream parser for Claude Code stdout.
//!
//! The CLI writes one JSON value per line, but in practice lines can carry
//! several concatenated values, partial writes, or non-JSON noise. The
//! functions here recover every complete value and drop the rest.

use serde_json::Value;

use crate::cli::{classify_message, ParsedMessage};

/// Error type for output resolution.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The process produced no output at all.
    #[error("AI CLI returned empty output")]
    EmptyOutput,
    /// The output contained no parseable JSON value.
    #[error("No valid JSON objects found in AI CLI output")]
    NoValidJson,
}

/// Scanner state shared by the extractor and the completeness check.
#[derive(Debug, Default)]
struct Scanner {
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    /// Feed one character. Returns `Some(true)` when an opening bracket
    /// starts a new top-level value and `Some(false)` when a closing bracket
    /// completes one.
    fn step(&mut self, c: char) -> Option<bool> {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            return None;
        }

        match c {
            '"' if self.depth > 0 => {
                self.in_string = true;
                None
            }
            '{' | '[' => {
                self.depth += 1;
                (self.depth == 1).then_some(true)
            }
            '}' | ']' if self.depth > 0 => {
                self.depth -= 1;
                (self.depth == 0).then_some(false)
            }
            _ => None,
        }
    }
}

/// Extract every complete JSON object or array from a single line.
///
/// Quoted braces and escaped quotes do not affect nesting. A slice that
/// balances but fails to parse is discarded and scanning continues after it.
#[must_use]
pub fn extract_complete_objects_from_line(line: &str) -> Vec<Value> {
    let mut values = Vec::new();
    let mut scanner = Scanner::default();
    let mut start = None;

    for (i, c) in line.char_indices() {
        match scanner.step(c) {
            Some(true) => start = Some(i),
            Some(false) => {
                if let Some(s) = start.take() {
                    let slice = &line[s..=i];
                    match serde_json::from_str::<Value>(slice) {
                        Ok(value) => values.push(value),
                        Err(e) => {
                            tracing::trace!(error = %e, len = slice.len(), "Dropping malformed JSON fragment");
                        }
                    }
                }
            }
            None => {}
        }
    }

    values
}

/// Parse the full stream-json output of a command, preserving input order.
#[must_use]
pub fn parse_stream_json_output(text: &str) -> Vec<Value> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .flat_map(extract_complete_objects_from_line)
        .collect()
}

/// Structural check that a buffered line holds one complete JSON value.
///
/// Used to decide whether an unterminated line can be parsed now or must
/// wait for more bytes.
#[must_use]
pub fn is_valid_complete_json(s: &str) -> bool {
    let trimmed = s.trim();
    let (Some(first), Some(last)) = (trimmed.chars().next(), trimmed.chars().last()) else {
        return false;
    };

    let expected_close = match first {
        '{' => '}',
        '[' => ']',
        _ => return false,
    };
    if last != expected_close {
        return false;
    }

    let body = trimmed[..trimmed.len() - last.len_utf8()].trim_end();
    if body.ends_with(',') || body.ends_with(':') {
        return false;
    }

    let mut scanner = Scanner::default();
    let mut closed_at = None;
    for (i, c) in trimmed.char_indices() {
        if scanner.step(c) == Some(false) {
            closed_at = Some(i);
            break;
        }
    }

    !scanner.in_string && closed_at == Some(trimmed.len() - last.len_utf8())
}

/// Resolve the final outcome of a command from its accumulated stdout.
///
/// Every parsed message is classified and handed to `on_message`, the last
/// one flagged with `is_last = true`. The last parsed value is returned;
/// by convention that is the terminal `result` message.
///
/// # Errors
///
/// Returns [`StreamError::EmptyOutput`] for empty or whitespace-only input
/// and [`StreamError::NoValidJson`] if nothing could be parsed.
pub fn process_output<F>(stdout: &str, mut on_message: F) -> Result<Value, StreamError>
where
    F: FnMut(&ParsedMessage, bool),
{
    if stdout.trim().is_empty() {
        return Err(StreamError::EmptyOutput);
    }

    let mut values = parse_stream_json_output(stdout);
    if values.is_empty() {
        return Err(StreamError::NoValidJson);
    }

    let last_index = values.len() - 1;
    for (i, value) in values.iter().enumerate() {
        on_message(&classify_message(value), i == last_index);
    }

    tracing::debug!(messages = values.len(), "Resolved AI CLI output");
    Ok(values.swap_remove(last_index))
}

/// Incremental line accumulator for a live stdout pipe.
///
/// Bytes are buffered until a newline arrives. The unterminated tail is
/// parsed early only when it already looks like a complete JSON value.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    pending: Vec<u8>,
}

impl StreamBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every value it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.pending.extend_from_slice(chunk);
        let mut values = Vec::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if !line.trim().is_empty() {
                values.extend(extract_complete_objects_from_line(&line));
            }
        }

        if let Ok(tail) = std::str::from_utf8(&self.pending) {
            if is_valid_complete_json(tail) {
                values.extend(extract_complete_objects_from_line(tail));
                self.pending.clear();
            }
        }

        values
    }

    /// Flush whatever remains once the stream has ended.
    pub fn finish(&mut self) -> Vec<Value> {
        let tail = std::mem::take(&mut self.pending);
        extract_complete_objects_from_line(&String::from_utf8_lossy(&tail))
    }

    /// Number of buffered bytes not yet consumed.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
