//! Tests for the permission manager.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aicli_bridge::config::PermissionConfig;
use aicli_bridge::permission::{
    AppsNotifier, DefaultAction, HistoryFilter, Pattern, PermissionEvent, PermissionManager,
    PermissionRequest, PermissionStatus,
};
use serde_json::{json, Value};

#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<String>>,
}

impl AppsNotifier for RecordingNotifier {
    fn notify_apps(&self, request: &PermissionRequest) {
        self.seen.lock().unwrap().push(request.operation.clone());
    }
}

async fn wait_for_pending(manager: &PermissionManager) -> PermissionRequest {
    for _ in 0..100 {
        if let Some(request) = manager.pending_requests().into_iter().next() {
            return request;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("No pending request appeared");
}

#[tokio::test]
async fn deny_pattern_wins_over_approve_pattern() {
    let manager = PermissionManager::new();
    manager.add_auto_approve_pattern("disk");
    manager.add_auto_deny_pattern("format");

    let outcome = manager
        .request_permission("format disk", Value::Null)
        .await;

    assert!(!outcome.approved);
    assert!(outcome.auto);
    assert_eq!(outcome.status, PermissionStatus::Denied);
    assert!(outcome.reason.unwrap().contains("format"));

    let history = manager.approval_history(&HistoryFilter::default());
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, PermissionStatus::Denied);
}

#[tokio::test]
async fn regex_pattern_auto_approves() {
    let manager = PermissionManager::new();
    manager.add_auto_approve_pattern(Pattern::parse(r"re:^read \S+$").unwrap());
    let mut events = manager.subscribe();

    let outcome = manager
        .request_permission("read Cargo.toml", Value::Null)
        .await;
    assert!(outcome.approved);
    assert!(outcome.auto);

    match events.recv().await.unwrap() {
        PermissionEvent::PermissionApproved { approver, .. } => {
            assert_eq!(approver.as_deref(), Some("auto"));
        }
        other => panic!("Expected PermissionApproved, got {other:?}"),
    }
}

#[tokio::test]
async fn manual_approval_resolves_waiter_once() {
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = PermissionManager::with_notifier(notifier.clone());

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .request_permission("edit main.rs", json!({"tool": "Edit"}))
                .await
        })
    };

    let request = wait_for_pending(&manager).await;
    assert_eq!(request.status, PermissionStatus::Pending);
    assert_eq!(request.context["tool"], "Edit");
    assert!(request.id.starts_with("perm_"));

    assert!(manager.approve_request(&request.id, Some("alice")));
    assert!(!manager.approve_request(&request.id, Some("alice")));
    assert!(!manager.deny_request(&request.id, Some("late"), None));
    assert!(!manager.handle_timeout(&request.id));

    let outcome = waiter.await.unwrap();
    assert!(outcome.approved);
    assert!(!outcome.auto);
    assert_eq!(outcome.request_id.as_deref(), Some(request.id.as_str()));
    assert!(manager.pending_requests().is_empty());
    assert_eq!(*notifier.seen.lock().unwrap(), vec!["edit main.rs".to_string()]);
}

#[tokio::test]
async fn manual_denial_carries_reason() {
    let manager = PermissionManager::new();
    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.request_permission("rm -rf build", Value::Null).await })
    };

    let request = wait_for_pending(&manager).await;
    assert!(manager.deny_request(&request.id, Some("too risky"), Some("bob")));

    let outcome = waiter.await.unwrap();
    assert!(!outcome.approved);
    assert_eq!(outcome.status, PermissionStatus::Denied);
    assert_eq!(outcome.reason.as_deref(), Some("too risky"));

    let denied = manager.approval_history(&HistoryFilter {
        status: Some(PermissionStatus::Denied),
        ..Default::default()
    });
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].operation, "rm -rf build");
}

#[tokio::test]
async fn unknown_ids_are_ignored() {
    let manager = PermissionManager::new();
    assert!(!manager.approve_request("perm_0_missing", None));
    assert!(!manager.deny_request("perm_0_missing", None, None));
    assert!(!manager.handle_timeout("perm_0_missing"));
}

#[tokio::test]
async fn timeout_uses_default_deny() {
    let manager = PermissionManager::new();
    manager.set_request_timeout(Duration::from_millis(20));
    let mut events = manager.subscribe();

    let outcome = manager.request_permission("slow op", Value::Null).await;
    assert!(!outcome.approved);
    assert_eq!(outcome.status, PermissionStatus::Timeout);

    assert!(matches!(
        events.recv().await.unwrap(),
        PermissionEvent::PermissionRequested { .. }
    ));
    match events.recv().await.unwrap() {
        PermissionEvent::PermissionTimeout { approved, .. } => assert!(!approved),
        other => panic!("Expected PermissionTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn approval_streak_short_circuits() {
    let manager = PermissionManager::new();
    manager.set_default_action(DefaultAction::Approve);
    manager.set_request_timeout(Duration::from_millis(5));

    for _ in 0..5 {
        let outcome = manager.request_permission("git push", Value::Null).await;
        assert_eq!(outcome.status, PermissionStatus::Timeout);
    }
    // Timeouts do not count toward a streak.
    let outcome = manager.request_permission("git push", Value::Null).await;
    assert!(!outcome.auto);

    let manager = PermissionManager::new();
    for _ in 0..5 {
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.request_permission("git push", Value::Null).await })
        };
        let request = wait_for_pending(&manager).await;
        manager.approve_request(&request.id, None);
        waiter.await.unwrap();
    }

    let outcome = manager.request_permission("git push", Value::Null).await;
    assert!(outcome.approved);
    assert!(outcome.auto);
}

#[tokio::test]
async fn history_is_capped() {
    let manager = PermissionManager::new();
    manager.add_auto_approve_pattern("op");

    for i in 0..1001 {
        manager
            .request_permission(&format!("op {i}"), Value::Null)
            .await;
    }

    let history = manager.approval_history(&HistoryFilter::default());
    assert_eq!(history.len(), 500);
    assert_eq!(history.last().unwrap().operation, "op 1000");

    let limited = manager.approval_history(&HistoryFilter {
        limit: Some(3),
        ..Default::default()
    });
    assert_eq!(limited.len(), 3);
    assert_eq!(limited[2].operation, "op 1000");

    assert_eq!(manager.clear_history(), 500);
    assert!(manager
        .approval_history(&HistoryFilter::default())
        .is_empty());
}

#[tokio::test]
async fn from_config_rejects_bad_regex() {
    let config = PermissionConfig {
        auto_deny: vec!["re:(".to_string()],
        ..Default::default()
    };
    assert!(PermissionManager::from_config(&config, Arc::new(RecordingNotifier::default())).is_err());

    let config = PermissionConfig {
        auto_approve: vec!["/^ls/".to_string()],
        ..Default::default()
    };
    let manager =
        PermissionManager::from_config(&config, Arc::new(RecordingNotifier::default())).unwrap();
    assert!(manager.request_permission("ls -la", Value::Null).await.approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn approval_racing_timeout_settles_once() {
    for _ in 0..50 {
        let manager = PermissionManager::new();
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.request_permission("write file", Value::Null).await })
        };
        let id = wait_for_pending(&manager).await.id;

        let barrier = std::sync::Barrier::new(2);
        let (approved, timed_out) = std::thread::scope(|scope| {
            let approve = scope.spawn(|| {
                barrier.wait();
                manager.approve_request(&id, Some("alice"))
            });
            let timeout = scope.spawn(|| {
                barrier.wait();
                manager.handle_timeout(&id)
            });
            (approve.join().unwrap(), timeout.join().unwrap())
        });

        assert!(approved ^ timed_out, "exactly one decision must win");
        let outcome = waiter.await.unwrap();
        let history = manager.approval_history(&HistoryFilter::default());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, outcome.status);
        if approved {
            assert!(outcome.approved);
            assert_eq!(outcome.status, PermissionStatus::Approved);
        } else {
            assert!(!outcome.approved);
            assert_eq!(outcome.status, PermissionStatus::Timeout);
        }
        assert!(manager.pending_requests().is_empty());
    }
}
