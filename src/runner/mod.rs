//! AI CLI process runner.
//!
//! Builds command lines, spawns the CLI, pumps its output through the
//! stream parser, and resolves each command to its final result.

mod args;
mod error;
mod events;
mod executor;
mod health;
mod interactive;
mod process;
mod session;
mod timeout;

pub use args::*;
pub use error::*;
pub use events::*;
pub use executor::{AiCliRunner, LongRunningDelegate, TestKind};
pub use health::*;
pub use interactive::*;
pub use process::*;
pub use session::*;
pub use timeout::*;
