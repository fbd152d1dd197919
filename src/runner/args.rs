//! Command-line arguments for the AI CLI.
//!
//! The flag spellings here are the wire contract with the external tool
//! and must not change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::RunnerConfig;
use crate::runner::{Continuation, Session};

/// Value of the CLI's `--permission-mode` flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl PermissionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
            Self::Plan => "plan",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized permission mode.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid permission mode: {0}")]
pub struct InvalidPermissionMode(pub String);

impl FromStr for PermissionMode {
    type Err = InvalidPermissionMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "acceptEdits" => Ok(Self::AcceptEdits),
            "bypassPermissions" => Ok(Self::BypassPermissions),
            "plan" => Ok(Self::Plan),
            other => Err(InvalidPermissionMode(other.to_string())),
        }
    }
}

/// Permission flags applied to every spawned command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSettings {
    mode: PermissionMode,
    allowed_tools: Vec<String>,
    disallowed_tools: Vec<String>,
    skip_permissions: bool,
}

impl PermissionSettings {
    /// Create settings from runner configuration.
    #[must_use]
    pub fn from_config(config: &RunnerConfig) -> Self {
        let mut settings = Self::default();
        settings.set_permission_mode(&config.permission_mode);
        settings.set_allowed_tools(config.allowed_tools.clone());
        settings.set_disallowed_tools(config.disallowed_tools.clone());
        settings.set_skip_permissions(config.skip_permissions);
        settings
    }

    /// Set the permission mode. Unknown modes are ignored and the previous
    /// mode is kept; returns whether the mode was accepted.
    pub fn set_permission_mode(&mut self, mode: &str) -> bool {
        match mode.parse() {
            Ok(mode) => {
                self.mode = mode;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, current = %self.mode, "Ignoring permission mode");
                false
            }
        }
    }

    pub fn set_allowed_tools(&mut self, tools: Vec<String>) {
        self.allowed_tools = tools;
    }

    pub fn set_disallowed_tools(&mut self, tools: Vec<String>) {
        self.disallowed_tools = tools;
    }

    pub fn set_skip_permissions(&mut self, skip: bool) {
        self.skip_permissions = skip;
    }

    #[must_use]
    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    #[must_use]
    pub fn allowed_tools(&self) -> &[String] {
        &self.allowed_tools
    }

    #[must_use]
    pub fn disallowed_tools(&self) -> &[String] {
        &self.disallowed_tools
    }

    #[must_use]
    pub fn skip_permissions(&self) -> bool {
        self.skip_permissions
    }

    /// Append permission flags to `args`.
    ///
    /// Skip mode is exclusive: when set, `--dangerously-skip-permissions`
    /// is the only permission flag added.
    pub fn add_permission_args(&self, args: &mut Vec<String>) {
        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
            return;
        }

        if self.mode != PermissionMode::Default {
            args.push("--permission-mode".to_string());
            args.push(self.mode.as_str().to_string());
        }

        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.allowed_tools.join(","));
        }

        if !self.disallowed_tools.is_empty() {
            args.push("--disallowedTools".to_string());
            args.push(self.disallowed_tools.join(","));
        }
    }
}

/// Build the full argument list for a one-shot command.
#[must_use]
pub fn build_command_args(session: &Session, permissions: &PermissionSettings) -> Vec<String> {
    let mut args = vec![
        "--print".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];

    permissions.add_permission_args(&mut args);

    match session.continuation() {
        Continuation::New => {
            args.push("--session-id".to_string());
            args.push(session.session_id.clone());
        }
        Continuation::Continued | Continuation::Restored => {
            args.push("--resume".to_string());
            args.push(session.session_id.clone());
        }
    }

    args
}

/// Build the argument list for a long-lived interactive process.
#[must_use]
pub fn build_interactive_args(permissions: &PermissionSettings) -> Vec<String> {
    let mut args = vec![
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];
    permissions.add_permission_args(&mut args);
    args
}

/// Returns true if the argument list asks for one-shot `--print` mode.
#[must_use]
pub fn requests_print(args: &[String]) -> bool {
    args.iter().any(|a| a == "--print")
}
