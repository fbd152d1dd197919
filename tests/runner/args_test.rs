//! Tests for AI CLI argument construction.

use aicli_bridge::config::RunnerConfig;
use aicli_bridge::runner::{
    build_command_args, build_interactive_args, requests_print, AiCliRunner, PermissionMode,
    PermissionSettings, Session,
};

#[test]
fn skip_permissions_is_exclusive() {
    let runner = AiCliRunner::new(RunnerConfig::default());
    runner.set_permission_mode("plan");
    runner.set_allowed_tools(vec!["Read".to_string()]);
    runner.set_disallowed_tools(vec!["Bash".to_string()]);
    runner.set_skip_permissions(true);

    let mut args = Vec::new();
    runner.add_permission_args(&mut args);
    assert_eq!(args, vec!["--dangerously-skip-permissions".to_string()]);

    runner.set_skip_permissions(false);
    let mut args = Vec::new();
    runner.add_permission_args(&mut args);
    assert_eq!(
        args,
        vec![
            "--permission-mode",
            "plan",
            "--allowedTools",
            "Read",
            "--disallowedTools",
            "Bash"
        ]
    );
}

#[test]
fn default_mode_adds_no_flag() {
    let settings = PermissionSettings::default();
    assert_eq!(settings.mode(), PermissionMode::Default);

    let mut args = Vec::new();
    settings.add_permission_args(&mut args);
    assert!(args.is_empty());
}

#[test]
fn invalid_mode_keeps_previous() {
    let mut settings = PermissionSettings::default();
    assert!(settings.set_permission_mode("bypassPermissions"));
    assert!(!settings.set_permission_mode("everything"));
    assert_eq!(settings.mode(), PermissionMode::BypassPermissions);
}

#[test]
fn config_seeds_settings() {
    let config = RunnerConfig {
        permission_mode: "acceptEdits".to_string(),
        allowed_tools: vec!["Edit".to_string()],
        ..RunnerConfig::default()
    };
    let runner = AiCliRunner::new(config);
    let settings = runner.permission_settings();

    assert_eq!(settings.mode(), PermissionMode::AcceptEdits);
    assert_eq!(settings.allowed_tools(), ["Edit".to_string()]);
}

#[test]
fn restored_session_resumes() {
    let session = Session::with_id("abc", "/tmp").restored();
    let args = build_command_args(&session, &PermissionSettings::default());

    assert!(requests_print(&args));
    assert_eq!(args[args.len() - 2..], ["--resume", "abc"]);
}

#[test]
fn interactive_args_never_print() {
    let args = build_interactive_args(&PermissionSettings::default());
    assert!(!requests_print(&args));
    assert!(args.contains(&"--verbose".to_string()));
}
