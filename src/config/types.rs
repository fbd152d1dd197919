//! Configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::permission::{DefaultAction, DEFAULT_HISTORY_STREAK};

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Process runner settings.
    pub runner: RunnerConfig,
    /// Permission manager settings.
    pub permissions: PermissionConfig,
}

/// Configuration for the process runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Binary to spawn.
    pub cli_command: String,
    /// Kill the process after this many seconds without output.
    pub activity_timeout_secs: u64,
    /// Grace period between SIGTERM and a forced kill.
    pub terminate_grace_secs: u64,
    /// Interval of the per-process health check.
    pub health_check_interval_secs: u64,
    /// Time an interactive session may take to report its session id.
    pub interactive_startup_timeout_secs: u64,
    /// Ceiling for diagnostic checks.
    pub test_timeout_secs: u64,
    /// Value for `--permission-mode`. Unknown modes are ignored.
    pub permission_mode: String,
    /// Tools passed via `--allowedTools`.
    pub allowed_tools: Vec<String>,
    /// Tools passed via `--disallowedTools`.
    pub disallowed_tools: Vec<String>,
    /// Pass `--dangerously-skip-permissions` instead of any other permission flag.
    pub skip_permissions: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cli_command: "claude".to_string(),
            activity_timeout_secs: 120,
            terminate_grace_secs: 5,
            health_check_interval_secs: 30,
            interactive_startup_timeout_secs: 30,
            test_timeout_secs: 30,
            permission_mode: "default".to_string(),
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            skip_permissions: false,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_secs)
    }

    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    #[must_use]
    pub fn interactive_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.interactive_startup_timeout_secs)
    }

    #[must_use]
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
}

/// Configuration for the permission manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Seconds a request may stay pending before the default action applies.
    pub request_timeout_secs: u64,
    /// Action applied on timeout.
    pub default_action: DefaultAction,
    /// Operations matching these are approved without asking.
    pub auto_approve: Vec<String>,
    /// Operations matching these are denied without asking.
    pub auto_deny: Vec<String>,
    /// Identical consecutive decisions needed to auto-decide from history.
    pub history_streak: usize,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
            default_action: DefaultAction::Deny,
            auto_approve: Vec::new(),
            auto_deny: Vec::new(),
            history_streak: DEFAULT_HISTORY_STREAK,
        }
    }
}

impl PermissionConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
