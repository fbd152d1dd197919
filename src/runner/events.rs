//! Fire-and-forget notifications produced while commands run.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::cli::ParsedMessage;
use crate::permission::PermissionOutcome;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// What a spawned process is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Command,
    Interactive,
    Test,
}

/// Events emitted by the runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum RunnerEvent {
    ProcessStart {
        session_id: String,
        pid: u32,
        #[serde(rename = "type")]
        kind: ProcessKind,
    },
    ProcessStderr {
        session_id: String,
        data: String,
    },
    ProcessExit {
        session_id: String,
        code: Option<i32>,
        pid: Option<u32>,
    },
    /// A message recovered from stdout while the process is running.
    StreamChunk {
        session_id: String,
        message: ParsedMessage,
    },
    /// A message of the final output, replayed once the process exited 0.
    AicliResponse {
        session_id: String,
        response: ParsedMessage,
        is_last: bool,
    },
    /// Output looked like the CLI asking for approval.
    PermissionRequired {
        session_id: String,
        prompt: String,
    },
    /// The permission manager settled a forwarded prompt.
    PermissionResolved {
        session_id: String,
        prompt: String,
        outcome: PermissionOutcome,
    },
}

impl RunnerEvent {
    /// Session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::ProcessStart { session_id, .. }
            | Self::ProcessStderr { session_id, .. }
            | Self::ProcessExit { session_id, .. }
            | Self::StreamChunk { session_id, .. }
            | Self::AicliResponse { session_id, .. }
            | Self::PermissionRequired { session_id, .. }
            | Self::PermissionResolved { session_id, .. } => session_id,
        }
    }
}

/// Broadcast channel for [`RunnerEvent`]s. Emitting never blocks.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunnerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: RunnerEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`. Lagged receivers yield an error item.
    #[must_use]
    pub fn stream(&self) -> BroadcastStream<RunnerEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }
}
