//! Permission request types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a permission request. Terminal once not `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Pending,
    Approved,
    Denied,
    Timeout,
}

impl PermissionStatus {
    /// Returns true for every state except `Pending`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Decision applied when a pending request times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    Approve,
    #[default]
    Deny,
}

/// A request for human approval of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Identifier of the form `perm_<epochms>_<random>`.
    pub id: String,
    /// Operation being asked about.
    pub operation: String,
    /// Caller-supplied context, opaque to the manager.
    pub context: serde_json::Value,
    /// Current status.
    pub status: PermissionStatus,
    /// When the request was created.
    pub timestamp: DateTime<Utc>,
}

/// Terminal snapshot of a request, appended to the approval history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalHistoryEntry {
    pub id: String,
    pub operation: String,
    pub status: PermissionStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Filter for [`PermissionManager::approval_history`](super::PermissionManager::approval_history).
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Only entries for this exact operation.
    pub operation: Option<String>,
    /// Only entries with this status.
    pub status: Option<PermissionStatus>,
    /// Keep only the most recent `limit` matching entries.
    pub limit: Option<usize>,
}

/// Result handed back to the caller of `request_permission`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOutcome {
    /// Whether the operation may proceed.
    pub approved: bool,
    /// True when decided by a pattern or by history rather than a human.
    pub auto: bool,
    /// Request id, present for every decision the manager recorded.
    pub request_id: Option<String>,
    /// Terminal status of the request.
    pub status: PermissionStatus,
    /// Why the decision was made, if known.
    pub reason: Option<String>,
}

/// Notifications emitted by the permission manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum PermissionEvent {
    /// A new request is waiting for a decision.
    PermissionRequested { request: PermissionRequest },
    /// A request was approved.
    PermissionApproved {
        id: String,
        operation: String,
        approver: Option<String>,
    },
    /// A request was denied.
    PermissionDenied {
        id: String,
        operation: String,
        reason: Option<String>,
        approver: Option<String>,
    },
    /// A request timed out and the default action was applied.
    PermissionTimeout {
        id: String,
        operation: String,
        approved: bool,
    },
}
