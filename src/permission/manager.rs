//! Pending permission requests and their approval policy.
//!
//! Each request moves `pending -> approved | denied | timeout` exactly once.
//! The pending registry and the approval history live behind a single lock,
//! so a manual decision and a firing timeout cannot both settle a request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::PermissionConfig;
use crate::permission::{
    ApprovalHistoryEntry, DefaultAction, HistoryFilter, Pattern, PatternError, PermissionEvent,
    PermissionOutcome, PermissionRequest, PermissionStatus,
};

/// History length that triggers trimming.
pub const HISTORY_CAP: usize = 1000;

/// Number of entries kept after trimming.
pub const HISTORY_TRIM_TO: usize = 500;

/// Consecutive identical decisions that auto-decide an operation.
pub const DEFAULT_HISTORY_STREAK: usize = 5;

/// Default time a request may stay pending.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Receives every newly created pending request.
///
/// Implementations forward the request to connected apps (push
/// notification, WebSocket broadcast, ...). Must not block.
pub trait AppsNotifier: Send + Sync {
    fn notify_apps(&self, request: &PermissionRequest);
}

/// Notifier that only logs the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl AppsNotifier for LogNotifier {
    fn notify_apps(&self, request: &PermissionRequest) {
        tracing::info!(
            id = %request.id,
            operation = %request.operation,
            "Permission request awaiting decision"
        );
    }
}

#[derive(Debug)]
struct Policy {
    auto_approve: Vec<Pattern>,
    auto_deny: Vec<Pattern>,
    default_action: DefaultAction,
    request_timeout: Duration,
    history_streak: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            auto_approve: Vec::new(),
            auto_deny: Vec::new(),
            default_action: DefaultAction::Deny,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            history_streak: DEFAULT_HISTORY_STREAK,
        }
    }
}

struct PendingEntry {
    request: PermissionRequest,
    responder: oneshot::Sender<PermissionOutcome>,
    timeout: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct State {
    pending: HashMap<String, PendingEntry>,
    history: Vec<ApprovalHistoryEntry>,
}

struct Inner {
    policy: RwLock<Policy>,
    state: Mutex<State>,
    notifier: Arc<dyn AppsNotifier>,
    events: broadcast::Sender<PermissionEvent>,
}

/// How a pending request is being settled.
enum Resolution {
    Approved {
        approver: Option<String>,
    },
    Denied {
        reason: Option<String>,
        approver: Option<String>,
    },
    TimedOut {
        approved: bool,
    },
}

/// Tracks pending permission requests and decides them by policy, by
/// history, or by waiting for a human.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone)]
pub struct PermissionManager {
    inner: Arc<Inner>,
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PermissionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("PermissionManager")
            .field("pending", &state.pending.len())
            .field("history", &state.history.len())
            .finish_non_exhaustive()
    }
}

impl PermissionManager {
    /// Create a manager that logs new requests.
    #[must_use]
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(LogNotifier))
    }

    /// Create a manager with a custom apps notifier.
    #[must_use]
    pub fn with_notifier(notifier: Arc<dyn AppsNotifier>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                policy: RwLock::new(Policy::default()),
                state: Mutex::new(State::default()),
                notifier,
                events,
            }),
        }
    }

    /// Create a manager from configuration.
    ///
    /// # Errors
    ///
    /// Returns `PatternError` if a configured regex pattern is invalid.
    pub fn from_config(
        config: &PermissionConfig,
        notifier: Arc<dyn AppsNotifier>,
    ) -> Result<Self, PatternError> {
        let manager = Self::with_notifier(notifier);
        {
            let mut policy = manager.write_policy();
            for pattern in &config.auto_approve {
                policy.auto_approve.push(Pattern::parse(pattern)?);
            }
            for pattern in &config.auto_deny {
                policy.auto_deny.push(Pattern::parse(pattern)?);
            }
            policy.default_action = config.default_action;
            policy.request_timeout = config.request_timeout();
            policy.history_streak = config.history_streak;
        }
        Ok(manager)
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_policy(&self) -> std::sync::RwLockWriteGuard<'_, Policy> {
        self.inner
            .policy
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_policy(&self) -> std::sync::RwLockReadGuard<'_, Policy> {
        self.inner
            .policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to approval notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PermissionEvent> {
        self.inner.events.subscribe()
    }

    /// Add a pattern whose matching operations are approved without asking.
    pub fn add_auto_approve_pattern(&self, pattern: impl Into<Pattern>) {
        self.write_policy().auto_approve.push(pattern.into());
    }

    /// Add a pattern whose matching operations are denied without asking.
    pub fn add_auto_deny_pattern(&self, pattern: impl Into<Pattern>) {
        self.write_policy().auto_deny.push(pattern.into());
    }

    /// Set the action applied when a request times out.
    pub fn set_default_action(&self, action: DefaultAction) {
        self.write_policy().default_action = action;
    }

    /// Set how long new requests may stay pending.
    pub fn set_request_timeout(&self, timeout: Duration) {
        self.write_policy().request_timeout = timeout;
    }

    /// Ask for permission to perform `operation`.
    ///
    /// Auto-deny patterns are checked first, then auto-approve patterns,
    /// then the approval history. Otherwise a pending request is created and
    /// this call waits until it is approved, denied, or times out.
    pub async fn request_permission(&self, operation: &str, context: Value) -> PermissionOutcome {
        if let Some(outcome) = self.auto_decide(operation) {
            return outcome;
        }

        let request = PermissionRequest {
            id: generate_request_id(),
            operation: operation.to_string(),
            context,
            status: PermissionStatus::Pending,
            timestamp: Utc::now(),
        };
        let id = request.id.clone();
        let timeout = self.read_policy().request_timeout;
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.lock_state();
            let handle = self.spawn_timeout(id.clone(), timeout);
            state.pending.insert(
                id.clone(),
                PendingEntry {
                    request: request.clone(),
                    responder: tx,
                    timeout: Some(handle),
                },
            );
        }

        tracing::debug!(%id, operation, timeout_secs = timeout.as_secs(), "Permission request pending");
        self.inner.notifier.notify_apps(&request);
        let _ = self
            .inner
            .events
            .send(PermissionEvent::PermissionRequested { request });

        rx.await.unwrap_or_else(|_| PermissionOutcome {
            approved: false,
            auto: false,
            request_id: Some(id),
            status: PermissionStatus::Denied,
            reason: Some("Permission request dropped".to_string()),
        })
    }

    fn spawn_timeout(&self, id: String, timeout: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                PermissionManager { inner }.handle_timeout(&id);
            }
        })
    }

    fn auto_decide(&self, operation: &str) -> Option<PermissionOutcome> {
        let (pattern_decision, streak) = {
            let policy = self.read_policy();
            let decision = if let Some(p) = policy.auto_deny.iter().find(|p| p.matches(operation)) {
                Some((false, format!("Matched auto-deny pattern '{}'", p.as_str())))
            } else {
                policy
                    .auto_approve
                    .iter()
                    .find(|p| p.matches(operation))
                    .map(|p| (true, format!("Matched auto-approve pattern '{}'", p.as_str())))
            };
            (decision, policy.history_streak)
        };

        let mut state = self.lock_state();
        let (approved, reason) = match pattern_decision {
            Some(decision) => decision,
            None => {
                let approved = history_decision(&state.history, operation, streak)?;
                let verb = if approved { "approved" } else { "denied" };
                (approved, format!("Previously {verb} {streak} times in a row"))
            }
        };

        let id = generate_request_id();
        let status = if approved {
            PermissionStatus::Approved
        } else {
            PermissionStatus::Denied
        };
        push_history(
            &mut state.history,
            ApprovalHistoryEntry {
                id: id.clone(),
                operation: operation.to_string(),
                status,
                timestamp: Utc::now(),
                reason: Some(reason.clone()),
            },
        );
        drop(state);

        tracing::info!(%id, operation, approved, %reason, "Permission decided automatically");
        let event = if approved {
            PermissionEvent::PermissionApproved {
                id: id.clone(),
                operation: operation.to_string(),
                approver: Some("auto".to_string()),
            }
        } else {
            PermissionEvent::PermissionDenied {
                id: id.clone(),
                operation: operation.to_string(),
                reason: Some(reason.clone()),
                approver: Some("auto".to_string()),
            }
        };
        let _ = self.inner.events.send(event);

        Some(PermissionOutcome {
            approved,
            auto: true,
            request_id: Some(id),
            status,
            reason: Some(reason),
        })
    }

    /// Approve a pending request.
    ///
    /// Returns false if the id is unknown or the request is already settled.
    pub fn approve_request(&self, id: &str, approver: Option<&str>) -> bool {
        self.settle(
            id,
            Resolution::Approved {
                approver: approver.map(str::to_string),
            },
        )
    }

    /// Deny a pending request.
    ///
    /// Returns false if the id is unknown or the request is already settled.
    pub fn deny_request(&self, id: &str, reason: Option<&str>, approver: Option<&str>) -> bool {
        self.settle(
            id,
            Resolution::Denied {
                reason: reason.map(str::to_string),
                approver: approver.map(str::to_string),
            },
        )
    }

    /// Apply the default action to a request whose timeout fired.
    ///
    /// No-op (returns false) if the request is missing or already settled.
    pub fn handle_timeout(&self, id: &str) -> bool {
        let approved = self.read_policy().default_action == DefaultAction::Approve;
        self.settle(id, Resolution::TimedOut { approved })
    }

    fn settle(&self, id: &str, resolution: Resolution) -> bool {
        let (status, approved, reason) = match &resolution {
            Resolution::Approved { .. } => (PermissionStatus::Approved, true, None),
            Resolution::Denied { reason, .. } => (PermissionStatus::Denied, false, reason.clone()),
            Resolution::TimedOut { approved } => {
                let action = if *approved { "approve" } else { "deny" };
                (
                    PermissionStatus::Timeout,
                    *approved,
                    Some(format!("Timed out; default action: {action}")),
                )
            }
        };

        let mut entry = {
            let mut state = self.lock_state();
            let Some(mut entry) = state.pending.remove(id) else {
                tracing::debug!(id, "Ignoring decision for unknown or settled request");
                return false;
            };
            entry.request.status = status;
            push_history(
                &mut state.history,
                ApprovalHistoryEntry {
                    id: id.to_string(),
                    operation: entry.request.operation.clone(),
                    status,
                    timestamp: Utc::now(),
                    reason: reason.clone(),
                },
            );
            entry
        };

        // The timeout task settles through this same path and must not abort itself.
        if !matches!(resolution, Resolution::TimedOut { .. }) {
            if let Some(handle) = entry.timeout.take() {
                handle.abort();
            }
        }

        let operation = entry.request.operation.clone();
        tracing::info!(id, %operation, %status, "Permission request settled");

        let _ = entry.responder.send(PermissionOutcome {
            approved,
            auto: false,
            request_id: Some(id.to_string()),
            status,
            reason: reason.clone(),
        });

        let event = match resolution {
            Resolution::Approved { approver } => PermissionEvent::PermissionApproved {
                id: id.to_string(),
                operation,
                approver,
            },
            Resolution::Denied { reason, approver } => PermissionEvent::PermissionDenied {
                id: id.to_string(),
                operation,
                reason,
                approver,
            },
            Resolution::TimedOut { approved } => PermissionEvent::PermissionTimeout {
                id: id.to_string(),
                operation,
                approved,
            },
        };
        let _ = self.inner.events.send(event);
        true
    }

    /// Requests still waiting for a decision, oldest first.
    #[must_use]
    pub fn pending_requests(&self) -> Vec<PermissionRequest> {
        let state = self.lock_state();
        let mut pending: Vec<PermissionRequest> = state
            .pending
            .values()
            .filter(|entry| entry.request.status == PermissionStatus::Pending)
            .map(|entry| entry.request.clone())
            .collect();
        pending.sort_by_key(|r| r.timestamp);
        pending
    }

    /// Settled requests matching `filter`, oldest first.
    #[must_use]
    pub fn approval_history(&self, filter: &HistoryFilter) -> Vec<ApprovalHistoryEntry> {
        let state = self.lock_state();
        let mut entries: Vec<ApprovalHistoryEntry> = state
            .history
            .iter()
            .filter(|e| filter.operation.as_ref().is_none_or(|op| &e.operation == op))
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let excess = entries.len().saturating_sub(limit);
            entries.drain(..excess);
        }
        entries
    }

    /// Empty the approval history, returning how many entries were removed.
    pub fn clear_history(&self) -> usize {
        let mut state = self.lock_state();
        let removed = state.history.len();
        state.history.clear();
        tracing::debug!(removed, "Cleared approval history");
        removed
    }
}

/// Decide from the newest `streak` entries for `operation`, if they agree.
fn history_decision(
    history: &[ApprovalHistoryEntry],
    operation: &str,
    streak: usize,
) -> Option<bool> {
    if streak == 0 {
        return None;
    }
    let recent: Vec<PermissionStatus> = history
        .iter()
        .rev()
        .filter(|e| e.operation == operation)
        .take(streak)
        .map(|e| e.status)
        .collect();
    if recent.len() < streak {
        return None;
    }
    if recent.iter().all(|s| *s == PermissionStatus::Approved) {
        Some(true)
    } else if recent.iter().all(|s| *s == PermissionStatus::Denied) {
        Some(false)
    } else {
        None
    }
}

fn push_history(history: &mut Vec<ApprovalHistoryEntry>, entry: ApprovalHistoryEntry) {
    history.push(entry);
    if history.len() > HISTORY_CAP {
        let excess = history.len() - HISTORY_TRIM_TO;
        history.drain(..excess);
    }
}

fn generate_request_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("perm_{}_{}", Utc::now().timestamp_millis(), &random[..9])
}
