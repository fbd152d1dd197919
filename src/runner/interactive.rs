//! Long-lived interactive AI CLI sessions.
//!
//! The process stays up between turns: each message is written to stdin as
//! one line and the turn completes when the CLI emits its next final result.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::cli::{EventType, ParsedMessage, StreamBuffer};
use crate::permission::PermissionManager;
use crate::runner::executor::{dispatch_message, read_chunk};
use crate::runner::{
    build_interactive_args, AiCliRunner, EventBus, ProcessControl, ProcessKind, ProcessReader,
    ProcessWriter, RunnerError, RunnerEvent, SpawnOptions,
};

/// A running interactive AI CLI process bound to one conversation.
pub struct InteractiveSession {
    session_id: String,
    pid: u32,
    working_directory: PathBuf,
    stdin: Mutex<Option<ProcessWriter>>,
    messages: Mutex<mpsc::UnboundedReceiver<ParsedMessage>>,
    closed: AtomicBool,
    control: Mutex<Box<dyn ProcessControl>>,
    reader: JoinHandle<()>,
    events: EventBus,
    terminate_grace: Duration,
}

impl std::fmt::Debug for InteractiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveSession")
            .field("session_id", &self.session_id)
            .field("pid", &self.pid)
            .field("working_directory", &self.working_directory)
            .finish_non_exhaustive()
    }
}

impl InteractiveSession {
    /// Session id reported by the CLI at startup.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Returns true once the session has been closed or has timed out.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close stdin and terminate the process. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Process` if the process could not be terminated.
    pub async fn close(&self) -> Result<(), RunnerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }

        let result = self
            .control
            .lock()
            .await
            .terminate(self.terminate_grace)
            .await
            .map_err(|e| RunnerError::Process(e.to_string()));
        self.reader.abort();

        info!(session_id = %self.session_id, pid = self.pid, "Interactive session closed");
        self.events.emit(RunnerEvent::ProcessExit {
            session_id: self.session_id.clone(),
            code: None,
            pid: Some(self.pid),
        });
        result
    }
}

impl Drop for InteractiveSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl AiCliRunner {
    /// Start an interactive process in `working_directory` and wait for it
    /// to report its session id.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError` if the process fails to start, closes its
    /// output before initializing, or does not initialize within the
    /// startup timeout.
    pub async fn create_interactive_session(
        &self,
        working_directory: impl Into<PathBuf>,
    ) -> Result<InteractiveSession, RunnerError> {
        let working_directory = working_directory.into();
        let args = build_interactive_args(&self.permission_settings());
        let options = SpawnOptions::in_dir(&working_directory);
        let grace = self.config().terminate_grace();

        let mut handle = self
            .spawner()
            .spawn(&self.config().cli_command, &args, &options)?;

        let Some(pid) = handle.pid() else {
            warn!("Interactive AI CLI process has no pid");
            let _ = handle.control().terminate(grace).await;
            return Err(RunnerError::MissingPid);
        };

        let label = format!("interactive-{pid}");
        self.events().emit(RunnerEvent::ProcessStart {
            session_id: label.clone(),
            pid,
            kind: ProcessKind::Interactive,
        });

        let stdin = handle.take_stdin();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(
            read_interactive_output(
                handle.take_stdout(),
                handle.take_stderr(),
                label,
                self.events().clone(),
                self.permission_manager().cloned(),
                tx,
            )
            .instrument(info_span!("interactive_reader", pid)),
        );
        let mut control = handle.into_control();

        let startup = self.config().interactive_startup_timeout();
        let waited = tokio::time::timeout(startup, async {
            while let Some(message) = rx.recv().await {
                if message.event_type == EventType::SystemInit {
                    if let Some(id) = message.session_id() {
                        return Some(id.to_string());
                    }
                }
            }
            None
        })
        .await;

        let session_id = match waited {
            Ok(Some(id)) => id,
            Ok(None) => {
                reader.abort();
                let _ = control.terminate(grace).await;
                return Err(RunnerError::SessionClosed);
            }
            Err(_) => {
                warn!(pid, timeout_secs = startup.as_secs(), "Interactive session did not initialize");
                reader.abort();
                let _ = control.terminate(grace).await;
                return Err(RunnerError::ActivityTimeout { idle: startup });
            }
        };

        info!(session_id, pid, "Interactive session started");
        Ok(InteractiveSession {
            session_id,
            pid,
            working_directory,
            stdin: Mutex::new(stdin),
            messages: Mutex::new(rx),
            closed: AtomicBool::new(false),
            control: Mutex::new(control),
            reader,
            events: self.events().clone(),
            terminate_grace: grace,
        })
    }

    /// Write `message` as one line to the session and wait for the turn's
    /// final result.
    ///
    /// Turns on the same session are serialized. A turn that goes silent
    /// past the activity timeout closes the session, so a late result can
    /// never be returned to the next turn.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::StdinWrite` if the line cannot be written,
    /// `RunnerError::ActivityTimeout` if the CLI goes silent, and
    /// `RunnerError::SessionClosed` if the session was closed or its output
    /// ends first.
    pub async fn send_to_interactive_session(
        &self,
        session: &InteractiveSession,
        message: &str,
    ) -> Result<ParsedMessage, RunnerError> {
        let mut messages = session.messages.lock().await;
        if session.is_closed() {
            return Err(RunnerError::SessionClosed);
        }
        while let Ok(stale) = messages.try_recv() {
            debug!(
                session_id = %session.session_id,
                event_type = ?stale.event_type,
                "Dropping message from a finished turn"
            );
        }

        {
            let mut stdin = session.stdin.lock().await;
            let Some(writer) = stdin.as_mut() else {
                return Err(RunnerError::SessionClosed);
            };
            let line = format!("{message}\n");
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(RunnerError::StdinWrite)?;
            writer.flush().await.map_err(RunnerError::StdinWrite)?;
        }
        debug!(session_id = %session.session_id, "Sent message to interactive session");

        let idle = self.config().activity_timeout();
        loop {
            match tokio::time::timeout(idle, messages.recv()).await {
                Err(_) => {
                    warn!(
                        session_id = %session.session_id,
                        timeout_secs = idle.as_secs(),
                        "Interactive turn timed out, closing session"
                    );
                    if let Err(e) = session.close().await {
                        warn!(session_id = %session.session_id, error = %e, "Failed to close timed-out session");
                    }
                    return Err(RunnerError::ActivityTimeout { idle });
                }
                Ok(None) => return Err(RunnerError::SessionClosed),
                Ok(Some(parsed))
                    if parsed.is_final_result()
                        && parsed.session_id().is_none_or(|id| id == session.session_id) =>
                {
                    return Ok(parsed);
                }
                Ok(Some(_)) => {}
            }
        }
    }
}

/// Reader task: pumps both pipes, dispatches every recovered message, and
/// queues it for the session. Ends when both pipes close.
async fn read_interactive_output(
    mut stdout: Option<ProcessReader>,
    mut stderr: Option<ProcessReader>,
    mut label: String,
    events: EventBus,
    permissions: Option<PermissionManager>,
    tx: mpsc::UnboundedSender<ParsedMessage>,
) {
    let mut out_buf = vec![0u8; 8 * 1024];
    let mut err_buf = vec![0u8; 8 * 1024];
    let mut stream = StreamBuffer::new();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut out_buf) => match read {
                Ok(0) => stdout = None,
                Ok(n) => {
                    for value in stream.push(&out_buf[..n]) {
                        if !forward(&events, permissions.as_ref(), &mut label, &value, &tx) {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(session_id = %label, error = %e, "Failed to read interactive stdout");
                    stdout = None;
                }
            },
            read = read_chunk(&mut stderr, &mut err_buf) => match read {
                Ok(0) => stderr = None,
                Ok(n) => {
                    events.emit(RunnerEvent::ProcessStderr {
                        session_id: label.clone(),
                        data: String::from_utf8_lossy(&err_buf[..n]).to_string(),
                    });
                }
                Err(e) => {
                    debug!(session_id = %label, error = %e, "Failed to read interactive stderr");
                    stderr = None;
                }
            },
        }
    }

    for value in stream.finish() {
        if !forward(&events, permissions.as_ref(), &mut label, &value, &tx) {
            return;
        }
    }
    debug!(session_id = %label, "Interactive output closed");
}

/// Returns false once the session side has gone away.
fn forward(
    events: &EventBus,
    permissions: Option<&PermissionManager>,
    label: &mut String,
    value: &Value,
    tx: &mpsc::UnboundedSender<ParsedMessage>,
) -> bool {
    let message = dispatch_message(events, permissions, label, value);
    if message.event_type == EventType::SystemInit {
        if let Some(id) = message.session_id() {
            *label = id.to_string();
        }
    }
    tx.send(message).is_ok()
}
