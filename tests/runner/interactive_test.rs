//! Tests for long-lived interactive sessions.

use std::sync::atomic::Ordering;
use std::time::Duration;

use aicli_bridge::config::RunnerConfig;
use aicli_bridge::runner::{AiCliRunner, RunnerError, RunnerEvent};

use super::fake::{FakeSpawner, Script};

const INIT_LINE: &str = r#"{"type":"system","subtype":"init","session_id":"sess-1","cwd":"/work"}"#;

#[tokio::test]
async fn interactive_round_trip() {
    let spawner = FakeSpawner::new(Script {
        interactive_session: Some("sess-1".to_string()),
        ..Script::output(&[INIT_LINE])
    });
    let runner = AiCliRunner::new(RunnerConfig::default()).with_spawner(spawner.clone());

    let session = runner.create_interactive_session("/work").await.unwrap();
    assert_eq!(session.session_id(), "sess-1");
    assert_eq!(session.pid(), 4242);

    let args = spawner.recorded.args();
    assert!(!args.contains(&"--print".to_string()));
    assert!(args.contains(&"stream-json".to_string()));

    let first = runner
        .send_to_interactive_session(&session, "hello")
        .await
        .unwrap();
    assert!(first.is_final_result());
    assert_eq!(first.data["result"], "echo: hello");

    let second = runner
        .send_to_interactive_session(&session, "again")
        .await
        .unwrap();
    assert_eq!(second.data["result"], "echo: again");

    session.close().await.unwrap();
    assert!(spawner.recorded.terminated.load(Ordering::SeqCst));

    let err = runner
        .send_to_interactive_session(&session, "late")
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::SessionClosed));
}

#[tokio::test]
async fn output_closing_before_init_fails() {
    let spawner = FakeSpawner::new(Script::output(&[r#"{"type":"assistant","content":"hi"}"#]));
    let runner = AiCliRunner::new(RunnerConfig::default()).with_spawner(spawner.clone());

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        runner.create_interactive_session("/work"),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, RunnerError::SessionClosed));
    assert!(spawner.recorded.terminated.load(Ordering::SeqCst));
}

#[tokio::test]
async fn missing_init_times_out() {
    let spawner = FakeSpawner::new(Script {
        hang: true,
        ..Script::default()
    });
    let config = RunnerConfig {
        interactive_startup_timeout_secs: 1,
        ..RunnerConfig::default()
    };
    let runner = AiCliRunner::new(config).with_spawner(spawner);

    let err = runner.create_interactive_session("/work").await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn late_reply_closes_the_session() {
    let spawner = FakeSpawner::new(Script {
        interactive_session: Some("sess-1".to_string()),
        reply_delay: Some(Duration::from_millis(1500)),
        ..Script::output(&[INIT_LINE])
    });
    let config = RunnerConfig {
        activity_timeout_secs: 1,
        ..RunnerConfig::default()
    };
    let runner = AiCliRunner::new(config).with_spawner(spawner.clone());
    let session = runner.create_interactive_session("/work").await.unwrap();

    let err = runner
        .send_to_interactive_session(&session, "slow")
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::ActivityTimeout { .. }));
    assert!(session.is_closed());
    assert!(spawner.recorded.terminated.load(Ordering::SeqCst));

    // Give the late reply time to arrive; it must not answer the next turn.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let err = runner
        .send_to_interactive_session(&session, "next")
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::SessionClosed));
}

#[tokio::test]
async fn close_is_idempotent() {
    let spawner = FakeSpawner::new(Script {
        interactive_session: Some("sess-1".to_string()),
        ..Script::output(&[INIT_LINE])
    });
    let runner = AiCliRunner::new(RunnerConfig::default()).with_spawner(spawner.clone());
    let session = runner.create_interactive_session("/work").await.unwrap();
    let mut rx = runner.events().subscribe();

    assert!(!session.is_closed());
    session.close().await.unwrap();
    session.close().await.unwrap();
    assert!(session.is_closed());

    let exits = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| matches!(e, RunnerEvent::ProcessExit { .. }))
        .count();
    assert_eq!(exits, 1);
}

#[tokio::test]
async fn stdin_write_failure_is_reported() {
    let spawner = FakeSpawner::new(Script {
        interactive_session: Some("sess-1".to_string()),
        close_stdin: true,
        ..Script::output(&[INIT_LINE])
    });
    let runner = AiCliRunner::new(RunnerConfig::default()).with_spawner(spawner);
    let session = runner.create_interactive_session("/work").await.unwrap();

    let err = runner
        .send_to_interactive_session(&session, "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::StdinWrite(_)));
}
