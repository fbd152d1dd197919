//! Per-process health monitor.
//!
//! Periodically checks that the process is alive and logs when it has
//! been silent for longer than the stale threshold. Purely observational:
//! killing stalled processes is the activity timer's job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::runner::is_process_alive;

/// Health monitor attached to one spawned process.
///
/// A monitor created without a process id does nothing. `cleanup` may be
/// called any number of times; dropping the monitor also stops it.
#[derive(Debug)]
pub struct HealthMonitor {
    session_id: String,
    started: Instant,
    last_activity_ms: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Start monitoring `pid`. Must be called inside a tokio runtime when
    /// `pid` is `Some`.
    #[must_use]
    pub fn new(
        pid: Option<u32>,
        session_id: impl Into<String>,
        interval: Duration,
        stale_after: Duration,
    ) -> Self {
        let session_id = session_id.into();
        let started = Instant::now();
        let last_activity_ms = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let task = pid.filter(|_| !interval.is_zero()).map(|pid| {
            tokio::spawn(
                Self::run(
                    pid,
                    session_id.clone(),
                    started,
                    Arc::clone(&last_activity_ms),
                    interval,
                    stale_after,
                    cancel.clone(),
                )
                .instrument(info_span!("health_monitor")),
            )
        });

        Self {
            session_id,
            started,
            last_activity_ms,
            cancel,
            task: Mutex::new(task),
        }
    }

    async fn run(
        pid: u32,
        session_id: String,
        started: Instant,
        last_activity_ms: Arc<AtomicU64>,
        interval: Duration,
        stale_after: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        let mut warned = false;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(session_id, pid, "Health monitor stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if !is_process_alive(pid) {
                debug!(session_id, pid, "Process no longer alive");
                return;
            }

            let last = Duration::from_millis(last_activity_ms.load(Ordering::Relaxed));
            let idle = started.elapsed().saturating_sub(last);
            if idle >= stale_after {
                if !warned {
                    warn!(session_id, pid, idle_secs = idle.as_secs(), "Process has produced no output");
                    warned = true;
                }
            } else {
                warned = false;
            }
        }
    }

    /// Record output activity from the process.
    pub fn record_activity(&self) {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since activity was last recorded.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    /// Returns true while a background check task is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stop monitoring. Idempotent.
    pub fn cleanup(&self) {
        self.cancel.cancel();
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            debug!(session_id = %self.session_id, "Health monitor cleaned up");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.cleanup();
    }
}
