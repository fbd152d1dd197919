//! Error types for the process runner.

use std::time::Duration;

use crate::cli::StreamError;

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("AI CLI binary not found")]
    NotFound,
    /// Permission denied when spawning.
    #[error("Permission denied")]
    PermissionDenied,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    #[must_use]
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Error type for a command run through the AI CLI.
///
/// Every variant settles the in-flight call; none is retried here.
#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    /// The process could not be started.
    #[error("Failed to start AI CLI: {0}")]
    Spawn(#[from] SpawnError),
    /// The process started but reported no process id.
    #[error("AI CLI process started without a process id")]
    MissingPid,
    /// Runtime error from the process or its pipes.
    #[error("AI CLI process error: {0}")]
    Process(String),
    /// The process exited unsuccessfully. `code` is -1 when killed by a signal.
    #[error("AI CLI exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    /// No output arrived within the activity window.
    #[error("AI CLI timed out after {}s without output", .idle.as_secs())]
    ActivityTimeout { idle: Duration },
    /// The overall time limit for the command elapsed.
    #[error("AI CLI exceeded its {}s time limit", .limit.as_secs())]
    CeilingTimeout { limit: Duration },
    /// The process exited but its output held no usable result.
    #[error(transparent)]
    Output(#[from] StreamError),
    /// Invalid diagnostic request.
    #[error("Unknown test type: {0}")]
    UnknownTestType(String),
    /// Writing to the process stdin failed.
    #[error("Failed to write to AI CLI stdin: {0}")]
    StdinWrite(std::io::Error),
    /// An interactive session's output ended before the awaited message.
    #[error("Interactive session closed")]
    SessionClosed,
    /// The long-running task delegate failed.
    #[error("Long-running task failed: {0}")]
    Delegate(String),
}

impl RunnerError {
    /// Returns true for either timeout variant.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ActivityTimeout { .. } | Self::CeilingTimeout { .. }
        )
    }

    /// Returns true if the process never started.
    #[must_use]
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, Self::Spawn(_) | Self::MissingPid)
    }
}
