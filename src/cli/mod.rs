//! Stream-json protocol handling for Claude Code output.
//!
//! Pure functions only: recovering JSON values from raw stdout, classifying
//! them, and spotting permission prompts. No I/O happens here.

mod events;
mod prompt;
mod stream;

pub use events::*;
pub use prompt::*;
pub use stream::*;
