//! Runs AI CLI commands and resolves their structured result.
//!
//! One call to [`AiCliRunner::execute_command`] owns one process: it writes
//! the prompt, pumps stdout/stderr through the stream parser, enforces the
//! activity and ceiling timeouts, and settles exactly once when the process
//! exits, errors, or is killed.

use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::cli::{
    classify_message, extract_permission_prompt, is_permission_prompt, process_output,
    ParsedMessage, StreamBuffer, StreamError,
};
use crate::config::RunnerConfig;
use crate::permission::PermissionManager;
use crate::runner::{
    build_command_args, requests_print, EventBus, HealthMonitor, PermissionSettings,
    ProcessHandle, ProcessKind, ProcessReader, ProcessSpawner, ProcessWriter,
    PromptTimeoutEstimator, RunnerError, RunnerEvent, Session, SpawnOptions, TimeoutEstimator,
    TokioSpawner, LONG_RUNNING_THRESHOLD,
};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Handles prompts predicted to run longer than [`LONG_RUNNING_THRESHOLD`].
#[async_trait]
pub trait LongRunningDelegate: Send + Sync {
    /// Run the task in place of a direct spawn.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError` if the delegated task fails.
    async fn handle_long_running_task(
        &self,
        session: &Session,
        prompt: &str,
        estimated: Duration,
    ) -> Result<Value, RunnerError>;
}

/// Fixed diagnostic checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestKind {
    Version,
    Help,
    Simple,
}

impl FromStr for TestKind {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "version" => Ok(Self::Version),
            "help" => Ok(Self::Help),
            "simple" => Ok(Self::Simple),
            other => Err(RunnerError::UnknownTestType(other.to_string())),
        }
    }
}

impl TestKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Help => "help",
            Self::Simple => "simple",
        }
    }

    fn args_and_input(self) -> (Vec<String>, Option<&'static str>) {
        match self {
            Self::Version => (vec!["--version".to_string()], None),
            Self::Help => (vec!["--help".to_string()], None),
            Self::Simple => (
                ["--print", "--output-format", "stream-json", "--verbose"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                Some("Reply with the single word: ok"),
            ),
        }
    }
}

/// Raw output of a finished process.
#[derive(Debug)]
struct CommandOutput {
    code: Option<i32>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Runs AI CLI processes for any number of concurrent sessions.
pub struct AiCliRunner {
    config: RunnerConfig,
    permissions: RwLock<PermissionSettings>,
    spawner: Arc<dyn ProcessSpawner>,
    estimator: Arc<dyn TimeoutEstimator>,
    permission_manager: Option<PermissionManager>,
    events: EventBus,
}

impl std::fmt::Debug for AiCliRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiCliRunner")
            .field("config", &self.config)
            .field("permissions", &self.permission_settings())
            .finish_non_exhaustive()
    }
}

impl AiCliRunner {
    /// Create a runner that spawns real processes.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        let permissions = PermissionSettings::from_config(&config);
        Self {
            config,
            permissions: RwLock::new(permissions),
            spawner: Arc::new(TokioSpawner),
            estimator: Arc::new(PromptTimeoutEstimator),
            permission_manager: None,
            events: EventBus::default(),
        }
    }

    /// Use a custom process spawner.
    #[must_use]
    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Use a custom timeout estimator.
    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn TimeoutEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Forward detected permission prompts to this manager.
    #[must_use]
    pub fn with_permission_manager(mut self, manager: PermissionManager) -> Self {
        self.permission_manager = Some(manager);
        self
    }

    /// Emit events on an existing bus.
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub(crate) fn permission_manager(&self) -> Option<&PermissionManager> {
        self.permission_manager.as_ref()
    }

    pub(crate) fn spawner(&self) -> &dyn ProcessSpawner {
        self.spawner.as_ref()
    }

    fn write_permissions(&self) -> std::sync::RwLockWriteGuard<'_, PermissionSettings> {
        self.permissions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current permission settings.
    #[must_use]
    pub fn permission_settings(&self) -> PermissionSettings {
        self.permissions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the permission mode; unknown modes are ignored.
    pub fn set_permission_mode(&self, mode: &str) -> bool {
        self.write_permissions().set_permission_mode(mode)
    }

    pub fn set_allowed_tools(&self, tools: Vec<String>) {
        self.write_permissions().set_allowed_tools(tools);
    }

    pub fn set_disallowed_tools(&self, tools: Vec<String>) {
        self.write_permissions().set_disallowed_tools(tools);
    }

    pub fn set_skip_permissions(&self, skip: bool) {
        self.write_permissions().set_skip_permissions(skip);
    }

    /// Append the current permission flags to `args`.
    pub fn add_permission_args(&self, args: &mut Vec<String>) {
        self.permission_settings().add_permission_args(args);
    }

    /// Arguments for a one-shot command in `session`.
    #[must_use]
    pub fn build_args(&self, session: &Session) -> Vec<String> {
        build_command_args(session, &self.permission_settings())
    }

    /// Send `prompt` to the AI CLI within `session` and wait for the result.
    ///
    /// Prompts estimated to exceed [`LONG_RUNNING_THRESHOLD`] are handed to
    /// `long_running` when one is supplied, without spawning anything.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError` if the process fails to start, errors, exits
    /// non-zero, times out, or produces no usable output.
    pub async fn execute_command(
        &self,
        session: &mut Session,
        prompt: &str,
        long_running: Option<&dyn LongRunningDelegate>,
    ) -> Result<Value, RunnerError> {
        let ceiling = self.estimator.timeout_for(prompt);

        if ceiling > LONG_RUNNING_THRESHOLD {
            if let Some(delegate) = long_running {
                info!(
                    session_id = %session.session_id,
                    estimated_secs = ceiling.as_secs(),
                    "Delegating long-running command"
                );
                return delegate
                    .handle_long_running_task(session, prompt, ceiling)
                    .await;
            }
        }

        let args = self.build_args(session);
        let options = SpawnOptions::in_dir(&session.working_directory);
        debug!(session_id = %session.session_id, ?args, "Spawning AI CLI");

        let handle = self
            .spawner
            .spawn(&self.config.cli_command, &args, &options)?;

        let input = session.take_effective_prompt(prompt);
        let stdin_text = requests_print(&args).then_some(input);

        let result = self
            .run_to_completion(
                &session.session_id,
                handle,
                stdin_text,
                ceiling,
                ProcessKind::Command,
            )
            .await
            .and_then(|output| self.resolve_result(&session.session_id, &output))?;

        session.conversation_started = true;
        Ok(result)
    }

    /// Run a fixed diagnostic check and return its stdout.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::UnknownTestType` for anything other than
    /// `version`, `help`, or `simple`, and the usual process errors otherwise.
    pub async fn test_command(&self, kind: &str) -> Result<String, RunnerError> {
        let kind: TestKind = kind.parse()?;
        let (args, input) = kind.args_and_input();
        let label = format!("test-{}", kind.as_str());

        let handle = self
            .spawner
            .spawn(&self.config.cli_command, &args, &SpawnOptions::default())?;

        let output = self
            .run_to_completion(
                &label,
                handle,
                input.map(str::to_string),
                self.config.test_timeout(),
                ProcessKind::Test,
            )
            .await?;

        match output.code {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).trim().to_string()),
            code => Err(non_zero_exit(code, &output.stderr)),
        }
    }

    /// Drive a spawned process until it exits or a timer fires.
    ///
    /// On any error the process is terminated before returning.
    async fn run_to_completion(
        &self,
        session_id: &str,
        mut handle: ProcessHandle,
        stdin_text: Option<String>,
        ceiling: Duration,
        kind: ProcessKind,
    ) -> Result<CommandOutput, RunnerError> {
        let grace = self.config.terminate_grace();

        let Some(pid) = handle.pid() else {
            warn!(session_id, "AI CLI process has no pid");
            let _ = handle.control().terminate(grace).await;
            return Err(RunnerError::MissingPid);
        };

        info!(session_id, pid, ?kind, "AI CLI process started");
        self.events.emit(RunnerEvent::ProcessStart {
            session_id: session_id.to_string(),
            pid,
            kind,
        });

        deliver_stdin(handle.take_stdin(), stdin_text, session_id);

        let health = HealthMonitor::new(
            Some(pid),
            session_id,
            self.config.health_check_interval(),
            self.config.activity_timeout(),
        );
        let result = self.pump(session_id, &mut handle, &health, ceiling).await;
        health.cleanup();

        match result {
            Ok(output) => {
                debug!(session_id, pid, code = ?output.code, "AI CLI process exited");
                self.events.emit(RunnerEvent::ProcessExit {
                    session_id: session_id.to_string(),
                    code: output.code,
                    pid: Some(pid),
                });
                Ok(output)
            }
            Err(e) => {
                warn!(session_id, pid, error = %e, "Terminating AI CLI process");
                if let Err(term_err) = handle.control().terminate(grace).await {
                    warn!(session_id, pid, error = %term_err, "Failed to terminate process");
                }
                self.events.emit(RunnerEvent::ProcessExit {
                    session_id: session_id.to_string(),
                    code: None,
                    pid: Some(pid),
                });
                Err(e)
            }
        }
    }

    /// Pump stdout and stderr until the process has exited and both pipes
    /// are closed.
    async fn pump(
        &self,
        session_id: &str,
        handle: &mut ProcessHandle,
        health: &HealthMonitor,
        ceiling: Duration,
    ) -> Result<CommandOutput, RunnerError> {
        let mut stdout = handle.take_stdout();
        let mut stderr = handle.take_stderr();
        let mut out_buf = vec![0u8; READ_CHUNK_SIZE];
        let mut err_buf = vec![0u8; READ_CHUNK_SIZE];
        let mut raw_stdout = Vec::new();
        let mut raw_stderr = Vec::new();
        let mut stream = StreamBuffer::new();
        let mut exit: Option<Option<i32>> = None;

        let idle = self.config.activity_timeout();
        let activity = tokio::time::sleep(idle);
        let deadline = tokio::time::sleep(ceiling);
        tokio::pin!(activity, deadline);

        while exit.is_none() || stdout.is_some() || stderr.is_some() {
            tokio::select! {
                read = read_chunk(&mut stdout, &mut out_buf) => match read {
                    Ok(0) => stdout = None,
                    Ok(n) => {
                        let chunk = &out_buf[..n];
                        raw_stdout.extend_from_slice(chunk);
                        activity.as_mut().reset(tokio::time::Instant::now() + idle);
                        handle.touch();
                        health.record_activity();
                        for value in stream.push(chunk) {
                            self.dispatch(session_id, &value);
                        }
                    }
                    Err(e) => return Err(RunnerError::Process(format!("stdout: {e}"))),
                },
                read = read_chunk(&mut stderr, &mut err_buf) => match read {
                    Ok(0) => stderr = None,
                    Ok(n) => {
                        let chunk = &err_buf[..n];
                        raw_stderr.extend_from_slice(chunk);
                        activity.as_mut().reset(tokio::time::Instant::now() + idle);
                        handle.touch();
                        health.record_activity();
                        let data = String::from_utf8_lossy(chunk).to_string();
                        debug!(session_id, stderr = %data.trim_end(), "AI CLI stderr");
                        self.events.emit(RunnerEvent::ProcessStderr {
                            session_id: session_id.to_string(),
                            data,
                        });
                    }
                    Err(e) => return Err(RunnerError::Process(format!("stderr: {e}"))),
                },
                status = handle.control().wait(), if exit.is_none() => match status {
                    Ok(code) => exit = Some(code),
                    Err(e) => return Err(RunnerError::Process(e.to_string())),
                },
                () = &mut activity => {
                    return Err(RunnerError::ActivityTimeout { idle });
                }
                () = &mut deadline => {
                    return Err(RunnerError::CeilingTimeout { limit: ceiling });
                }
            }
        }

        for value in stream.finish() {
            self.dispatch(session_id, &value);
        }

        Ok(CommandOutput {
            code: exit.flatten(),
            stdout: raw_stdout,
            stderr: raw_stderr,
        })
    }

    fn dispatch(&self, session_id: &str, value: &Value) {
        dispatch_message(
            &self.events,
            self.permission_manager.as_ref(),
            session_id,
            value,
        );
    }

    /// Turn a finished command's output into its result.
    fn resolve_result(&self, session_id: &str, output: &CommandOutput) -> Result<Value, RunnerError> {
        if output.code != Some(0) {
            return Err(non_zero_exit(output.code, &output.stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            warn!(session_id, "AI CLI exited successfully without output");
            return Err(StreamError::NoValidJson.into());
        }

        let result = process_output(&stdout, |message, is_last| {
            self.events.emit(RunnerEvent::AicliResponse {
                session_id: session_id.to_string(),
                response: message.clone(),
                is_last,
            });
        })?;

        let result_type = result
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        info!(session_id, result_type, "AI CLI command completed");
        Ok(result)
    }
}

fn non_zero_exit(code: Option<i32>, stderr: &[u8]) -> RunnerError {
    RunnerError::NonZeroExit {
        code: code.unwrap_or(-1),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    }
}

/// Read from an optional pipe; a closed pipe never completes.
pub(crate) async fn read_chunk(
    reader: &mut Option<ProcessReader>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Write the prompt (if any) and close stdin, without blocking the caller.
fn deliver_stdin(stdin: Option<ProcessWriter>, text: Option<String>, session_id: &str) {
    let Some(mut stdin) = stdin else {
        return;
    };
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        if let Some(text) = text {
            if let Err(e) = stdin.write_all(text.as_bytes()).await {
                warn!(session_id, error = %e, "Failed to write prompt to stdin");
            }
        }
        if let Err(e) = stdin.shutdown().await {
            debug!(session_id, error = %e, "Failed to close stdin");
        }
    });
}

/// Classify a recovered value, forward permission prompts, and emit it.
pub(crate) fn dispatch_message(
    events: &EventBus,
    permissions: Option<&PermissionManager>,
    session_id: &str,
    value: &Value,
) -> ParsedMessage {
    let message = classify_message(value);

    if let Some(text) = message.text_content() {
        if is_permission_prompt(&text) {
            forward_permission_prompt(events, permissions, session_id, &text, &message);
        }
    }

    events.emit(RunnerEvent::StreamChunk {
        session_id: session_id.to_string(),
        message: message.clone(),
    });
    message
}

fn forward_permission_prompt(
    events: &EventBus,
    permissions: Option<&PermissionManager>,
    session_id: &str,
    text: &str,
    message: &ParsedMessage,
) {
    let prompt = extract_permission_prompt(text);
    info!(session_id, %prompt, "Permission prompt detected");

    events.emit(RunnerEvent::PermissionRequired {
        session_id: session_id.to_string(),
        prompt: prompt.clone(),
    });

    let Some(manager) = permissions.cloned() else {
        return;
    };
    let context = json!({ "sessionId": session_id, "message": message.data });
    let session_id = session_id.to_string();
    let events = events.clone();
    tokio::spawn(async move {
        let outcome = manager.request_permission(&prompt, context).await;
        debug!(
            session_id,
            approved = outcome.approved,
            auto = outcome.auto,
            "Permission prompt settled"
        );
        events.emit(RunnerEvent::PermissionResolved {
            session_id,
            prompt,
            outcome,
        });
    });
}
