//! AI CLI process spawning and control.
//!
//! Spawning goes through the [`ProcessSpawner`] trait so the runner can be
//! driven by a real `tokio::process::Child` or by an in-memory fake.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::runner::SpawnError;

/// Boxed process stdin.
pub type ProcessWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Boxed process stdout or stderr.
pub type ProcessReader = Pin<Box<dyn AsyncRead + Send>>;

/// Lifecycle control over a spawned process.
#[async_trait]
pub trait ProcessControl: Send {
    /// Wait for the process to exit, returning its exit code (`None` when
    /// terminated by a signal).
    ///
    /// Must be cancel safe: the runner polls it inside `tokio::select!`.
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Terminate the process, escalating to a forced kill after `grace`.
    async fn terminate(&mut self, grace: Duration) -> std::io::Result<()>;
}

/// Options applied when spawning.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl SpawnOptions {
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
            env: Vec::new(),
        }
    }
}

/// Spawns AI CLI processes.
pub trait ProcessSpawner: Send + Sync {
    /// Start `command` with `args`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process could not be started.
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: &SpawnOptions,
    ) -> Result<ProcessHandle, SpawnError>;
}

/// A spawned process with its pipes.
///
/// Exclusively owned by one command; pipes are taken out as they are wired up.
pub struct ProcessHandle {
    pid: Option<u32>,
    stdin: Option<ProcessWriter>,
    stdout: Option<ProcessReader>,
    stderr: Option<ProcessReader>,
    control: Box<dyn ProcessControl>,
    spawned_at: Instant,
    last_activity: Instant,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("spawned_at", &self.spawned_at)
            .field("last_activity", &self.last_activity)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Assemble a handle from its parts.
    #[must_use]
    pub fn new(
        pid: Option<u32>,
        stdin: Option<ProcessWriter>,
        stdout: Option<ProcessReader>,
        stderr: Option<ProcessReader>,
        control: Box<dyn ProcessControl>,
    ) -> Self {
        let now = Instant::now();
        Self {
            pid,
            stdin,
            stdout,
            stderr,
            control,
            spawned_at: now,
            last_activity: now,
        }
    }

    /// Get the process ID, if one was reported.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ProcessWriter> {
        self.stdin.take()
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ProcessReader> {
        self.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ProcessReader> {
        self.stderr.take()
    }

    /// Mutable access to the lifecycle control.
    pub fn control(&mut self) -> &mut dyn ProcessControl {
        self.control.as_mut()
    }

    /// Split off the lifecycle control, consuming the handle.
    #[must_use]
    pub fn into_control(self) -> Box<dyn ProcessControl> {
        self.control
    }

    /// When the process was spawned.
    #[must_use]
    pub fn spawned_at(&self) -> Instant {
        self.spawned_at
    }

    /// When output was last observed.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Record output activity.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: &SpawnOptions,
    ) -> Result<ProcessHandle, SpawnError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Apply working directory if set
        if let Some(ref dir) = options.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(SpawnError::from_io)?;
        let pid = child.id();
        let stdin = child.stdin.take().map(|s| Box::pin(s) as ProcessWriter);
        let stdout = child.stdout.take().map(|s| Box::pin(s) as ProcessReader);
        let stderr = child.stderr.take().map(|s| Box::pin(s) as ProcessReader);

        tracing::debug!(command, ?pid, "Spawned AI CLI process");
        Ok(ProcessHandle::new(
            pid,
            stdin,
            stdout,
            stderr,
            Box::new(ChildControl { child }),
        ))
    }
}

/// [`ProcessControl`] over a `tokio::process::Child`.
#[derive(Debug)]
pub struct ChildControl {
    child: Child,
}

#[async_trait]
impl ProcessControl for ChildControl {
    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    /// On Unix, sends SIGTERM first, then SIGKILL after the grace period.
    /// On other platforms, falls back to immediate kill.
    async fn terminate(&mut self, grace: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.terminate_unix(grace).await
        }

        #[cfg(not(unix))]
        {
            let _ = grace;
            self.child.kill().await
        }
    }
}

impl ChildControl {
    #[cfg(unix)]
    async fn terminate_unix(&mut self, grace: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            // Process already exited
            return Ok(());
        };

        let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        let _ = kill(nix_pid, Signal::SIGTERM);

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(pid, "Process ignored SIGTERM, killing");
                self.child.kill().await
            }
        }
    }
}

/// Returns true if a process with this id is still running.
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        i32::try_from(pid).is_ok_and(|raw| kill(Pid::from_raw(raw), None).is_ok())
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}
