//! In-memory process spawner for driving the runner without a real CLI.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aicli_bridge::runner::{
    ProcessControl, ProcessHandle, ProcessReader, ProcessSpawner, ProcessWriter, SpawnError,
    SpawnOptions,
};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::oneshot;

/// What the fake process does once spawned.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Chunks written to stdout, in order.
    pub stdout: Vec<String>,
    /// Written to stderr after stdout.
    pub stderr: String,
    /// Exit code reported once both pipes are closed.
    pub exit_code: Option<i32>,
    /// Report no pid.
    pub no_pid: bool,
    /// Never write, never exit.
    pub hang: bool,
    /// After the scripted stdout, answer each stdin line with a result message.
    pub interactive_session: Option<String>,
    /// Interactive only: wait this long before answering each line.
    pub reply_delay: Option<Duration>,
    /// Interactive only: stop reading stdin once the scripted stdout is written.
    pub close_stdin: bool,
    /// Report an error from `wait` instead of an exit code.
    pub fail_wait: bool,
}

impl Script {
    pub fn output(lines: &[&str]) -> Self {
        Self {
            stdout: lines.iter().map(|l| format!("{l}\n")).collect(),
            exit_code: Some(0),
            ..Self::default()
        }
    }
}

/// Everything a test may want to inspect after a run.
#[derive(Default)]
pub struct Recorded {
    pub calls: Mutex<Vec<(String, Vec<String>, SpawnOptions)>>,
    pub stdin: Mutex<Option<DuplexStream>>,
    pub terminated: AtomicBool,
}

impl Recorded {
    pub fn args(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|(_, args, _)| args.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Read everything the runner wrote to stdin. Only valid for one-shot runs.
    pub async fn stdin_text(&self) -> String {
        let mut stdin = self.stdin.lock().unwrap().take().expect("stdin not captured");
        let mut text = String::new();
        stdin.read_to_string(&mut text).await.unwrap();
        text
    }
}

pub struct FakeSpawner {
    script: Script,
    queued: Mutex<VecDeque<Script>>,
    pub recorded: Arc<Recorded>,
}

impl FakeSpawner {
    pub fn new(script: Script) -> Arc<Self> {
        Self::with_scripts(script, Vec::new())
    }

    /// Spawns take `queued` scripts in order, then fall back to `script`.
    pub fn with_scripts(script: Script, queued: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            script,
            queued: Mutex::new(queued.into()),
            recorded: Arc::new(Recorded::default()),
        })
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: &SpawnOptions,
    ) -> Result<ProcessHandle, SpawnError> {
        self.recorded
            .calls
            .lock()
            .unwrap()
            .push((command.to_string(), args.to_vec(), options.clone()));

        let (stdin_w, stdin_r) = tokio::io::duplex(64 * 1024);
        let (mut out_w, out_r) = tokio::io::duplex(64 * 1024);
        let (mut err_w, err_r) = tokio::io::duplex(64 * 1024);
        let (exit_tx, exit_rx) = oneshot::channel();

        let script = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.script.clone());
        let pid = if script.no_pid { None } else { Some(4242) };
        let fail_wait = script.fail_wait;
        if script.interactive_session.is_none() {
            *self.recorded.stdin.lock().unwrap() = Some(stdin_r);
            tokio::spawn(async move {
                if script.hang {
                    std::future::pending::<()>().await;
                }
                for chunk in &script.stdout {
                    let _ = out_w.write_all(chunk.as_bytes()).await;
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                let _ = err_w.write_all(script.stderr.as_bytes()).await;
                drop(out_w);
                drop(err_w);
                let _ = exit_tx.send(script.exit_code);
            });
        } else {
            tokio::spawn(async move {
                let session_id = script.interactive_session.clone().unwrap_or_default();
                for chunk in &script.stdout {
                    let _ = out_w.write_all(chunk.as_bytes()).await;
                }
                if script.close_stdin {
                    drop(stdin_r);
                    std::future::pending::<()>().await;
                    return;
                }
                let mut lines = BufReader::new(stdin_r).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(delay) = script.reply_delay {
                        tokio::time::sleep(delay).await;
                    }
                    let reply = serde_json::json!({
                        "type": "result",
                        "result": format!("echo: {line}"),
                        "session_id": session_id,
                    });
                    let _ = out_w.write_all(format!("{reply}\n").as_bytes()).await;
                }
                drop(out_w);
                drop(err_w);
                let _ = exit_tx.send(Some(0));
            });
        }

        Ok(ProcessHandle::new(
            pid,
            Some(Box::pin(stdin_w) as ProcessWriter),
            Some(Box::pin(out_r) as ProcessReader),
            Some(Box::pin(err_r) as ProcessReader),
            Box::new(FakeControl {
                exit: Some(exit_rx),
                code: None,
                fail_wait,
                recorded: Arc::clone(&self.recorded),
            }),
        ))
    }
}

struct FakeControl {
    exit: Option<oneshot::Receiver<Option<i32>>>,
    code: Option<Option<i32>>,
    fail_wait: bool,
    recorded: Arc<Recorded>,
}

#[async_trait]
impl ProcessControl for FakeControl {
    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        if let Some(code) = self.code {
            return Ok(code);
        }
        if self.fail_wait {
            return Err(std::io::Error::other("wait failed"));
        }
        let code = match self.exit.as_mut() {
            Some(rx) => rx.await.unwrap_or(None),
            None => None,
        };
        self.exit = None;
        self.code = Some(code);
        Ok(code)
    }

    async fn terminate(&mut self, _grace: Duration) -> std::io::Result<()> {
        self.recorded.terminated.store(true, Ordering::SeqCst);
        self.code.get_or_insert(None);
        Ok(())
    }
}
