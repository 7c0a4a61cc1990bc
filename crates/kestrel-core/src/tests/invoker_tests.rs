//! Tests for action invocation
//!
//! - Default and named actions, hide vs keep-open
//! - Unresolvable references
//! - Failures are notified, never fatal
//! - Host-backed actions

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use kestrel_types::{ResultAction, ResultPatch, RuntimeKind, UiUpdate};
use tokio::sync::mpsc;

use super::fixtures::{
    FakeLauncher, MockPlugin, drain, host_metadata, make_runtime, plugin_dir, result,
};
use crate::host::HostState;
use crate::plugin::DiscoveredPlugin;
use crate::{Error, Runtime};

fn clipboard() -> MockPlugin {
    MockPlugin::keyword("clip", &["clip"]).returning(vec![
        result("hello", 10)
            .with_id("entry-1")
            .with_context_data("{\"row\":1}")
            .with_action(ResultAction::new("copy", "Copy"))
            .with_action(ResultAction::new("delete", "Delete").keep_open()),
    ])
}

async fn runtime_with(
    plugin: &Arc<MockPlugin>,
) -> (Runtime, mpsc::UnboundedReceiver<UiUpdate>) {
    let (runtime, mut rx, _) = make_runtime(FakeLauncher::new());
    runtime.register_native(plugin.clone()).await.unwrap();
    runtime.query("main", "clip hel").await.unwrap();
    drain(&mut rx);
    (runtime, rx)
}

fn notified(updates: &[UiUpdate]) -> Option<(&str, &str)> {
    updates.iter().find_map(|u| match u {
        UiUpdate::Notify { title, description } => Some((title.as_str(), description.as_str())),
        _ => None,
    })
}

#[tokio::test]
async fn test_default_action_runs_and_hides() {
    let plugin = Arc::new(clipboard());
    let (runtime, mut rx) = runtime_with(&plugin).await;

    let outcome = runtime.invoke_action("main", "entry-1", None).await.unwrap();
    assert_eq!(outcome.plugin_id, "clip");
    assert_eq!(outcome.action_id, "copy");
    assert!(outcome.hide_app);

    let ctx = plugin.actions.lock()[0].clone();
    assert_eq!(ctx.result_id, "entry-1");
    assert_eq!(ctx.action_id, "copy");
    assert_eq!(ctx.context_data, "{\"row\":1}");
    assert_eq!(drain(&mut rx), [UiUpdate::HideApp]);
}

#[tokio::test]
async fn test_marked_default_wins_over_first_action() {
    let mut delete = ResultAction::new("delete", "Delete");
    delete.is_default = true;
    let plugin = Arc::new(MockPlugin::keyword("clip", &["clip"]).returning(vec![
        result("hello", 10)
            .with_id("entry-1")
            .with_action(ResultAction::new("copy", "Copy"))
            .with_action(delete),
    ]));
    let (runtime, _rx) = runtime_with(&plugin).await;

    let outcome = runtime.invoke_action("main", "entry-1", None).await.unwrap();
    assert_eq!(outcome.action_id, "delete");
}

#[tokio::test]
async fn test_keep_open_action_does_not_hide() {
    let plugin = Arc::new(clipboard());
    let (runtime, mut rx) = runtime_with(&plugin).await;

    let outcome = runtime
        .invoke_action("main", "entry-1", Some("delete"))
        .await
        .unwrap();
    assert!(!outcome.hide_app);
    assert!(drain(&mut rx).is_empty());
    assert_eq!(plugin.actions.lock()[0].action_id, "delete");
}

#[tokio::test]
async fn test_unresolvable_references() {
    let plugin = Arc::new(clipboard());
    let (runtime, _rx) = runtime_with(&plugin).await;

    assert!(matches!(
        runtime.invoke_action("main", "nope", None).await,
        Err(Error::ResultNotFound(id)) if id == "nope"
    ));
    assert!(matches!(
        runtime.invoke_action("main", "entry-1", Some("paste")).await,
        Err(Error::ActionNotFound { action_id, .. }) if action_id == "paste"
    ));
    assert!(matches!(
        runtime.invoke_action("other-session", "entry-1", None).await,
        Err(Error::ResultNotFound(_))
    ));
    assert!(plugin.actions.lock().is_empty());
}

#[tokio::test]
async fn test_result_without_actions_has_no_default() {
    let plugin = Arc::new(
        MockPlugin::keyword("clip", &["clip"]).returning(vec![result("bare", 1).with_id("b")]),
    );
    let (runtime, _rx) = runtime_with(&plugin).await;

    assert!(matches!(
        runtime.invoke_action("main", "b", None).await,
        Err(Error::ActionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_results_of_older_generation_are_gone() {
    let plugin = Arc::new(MockPlugin::keyword("clip", &["clip"]).responding(|q| {
        super::fixtures::Reply::Results(vec![
            result(&q.search, 1)
                .with_id(format!("id-{}", q.search))
                .with_action(ResultAction::new("copy", "Copy")),
        ])
    }));
    let (runtime, _, _) = make_runtime(FakeLauncher::new());
    runtime.register_native(plugin.clone()).await.unwrap();

    runtime.query("main", "clip a").await.unwrap();
    runtime.query("main", "clip b").await.unwrap();

    assert!(matches!(
        runtime.invoke_action("main", "id-a", None).await,
        Err(Error::ResultNotFound(_))
    ));
    assert!(runtime.invoke_action("main", "id-b", None).await.is_ok());
}

#[tokio::test]
async fn test_closed_session_forgets_results() {
    let plugin = Arc::new(clipboard());
    let (runtime, _rx) = runtime_with(&plugin).await;

    runtime.close_session("main");
    assert!(matches!(
        runtime.invoke_action("main", "entry-1", None).await,
        Err(Error::ResultNotFound(_))
    ));
}

#[tokio::test]
async fn test_failing_action_notifies_user() {
    let plugin = Arc::new(clipboard().failing_actions("clipboard locked"));
    let (runtime, mut rx) = runtime_with(&plugin).await;

    let err = runtime.invoke_action("main", "entry-1", None).await.unwrap_err();
    assert!(matches!(&err, Error::ActionFailed(reason) if reason.contains("clipboard locked")));

    let updates = drain(&mut rx);
    let (title, description) = notified(&updates).unwrap();
    assert_eq!(title, "Action failed");
    assert!(description.contains("Copy"));
    assert!(!updates.contains(&UiUpdate::HideApp));

    // the runtime keeps serving
    assert!(runtime.query("main", "clip hel").await.is_some());
}

#[tokio::test]
async fn test_panicking_action_is_contained() {
    let plugin = Arc::new(clipboard().panicking_actions());
    let (runtime, mut rx) = runtime_with(&plugin).await;

    let err = runtime.invoke_action("main", "entry-1", None).await.unwrap_err();
    assert!(matches!(err, Error::ActionFailed(reason) if reason.contains("panicked")));
    assert_eq!(notified(&drain(&mut rx)).map(|n| n.0), Some("Action failed"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_action_times_out() {
    let plugin = Arc::new(clipboard().slow_actions(Duration::from_secs(60)));
    let (runtime, mut rx) = runtime_with(&plugin).await;

    let err = runtime.invoke_action("main", "entry-1", None).await.unwrap_err();
    assert!(matches!(err, Error::ActionFailed(reason) if reason.contains("timed out")));
    assert!(notified(&drain(&mut rx)).is_some());
}

async fn host_runtime(
    launcher: &Arc<FakeLauncher>,
) -> (Runtime, mpsc::UnboundedReceiver<UiUpdate>) {
    let (runtime, mut rx, _) = make_runtime(Arc::clone(launcher));
    launcher.state.set_results(
        "todo",
        vec![
            result("water plants", 5)
                .with_id("t1")
                .with_context_data("42")
                .with_action(ResultAction::new("done", "Mark done"))
                .with_action(ResultAction::new("explode", "Explode")),
        ],
    );
    runtime
        .load_discovered(DiscoveredPlugin {
            metadata: host_metadata("todo", RuntimeKind::Python, &["todo"]),
            directory: plugin_dir("todo"),
        })
        .await
        .unwrap();
    let ready = tokio::time::timeout(Duration::from_secs(30), async {
        while runtime.host_snapshots()[0].state != HostState::Ready {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(ready.is_ok(), "host never became ready");

    runtime.query("main", "todo water").await.unwrap();
    drain(&mut rx);
    (runtime, rx)
}

#[tokio::test(start_paused = true)]
async fn test_host_action_is_forwarded() {
    let launcher = FakeLauncher::new();
    let (runtime, mut rx) = host_runtime(&launcher).await;

    let outcome = runtime.invoke_action("main", "t1", None).await.unwrap();
    assert_eq!(outcome.action_id, "done");
    assert_eq!(drain(&mut rx), [UiUpdate::HideApp]);

    let sent = launcher.state.actions.lock()[0].clone();
    assert_eq!(sent.plugin_id, "todo");
    assert_eq!(sent.result_id, "t1");
    assert_eq!(sent.action_id, "done");
    assert_eq!(sent.context_data, "42");
}

#[tokio::test(start_paused = true)]
async fn test_host_action_error_is_reported() {
    let launcher = FakeLauncher::new();
    let (runtime, mut rx) = host_runtime(&launcher).await;

    let err = runtime
        .invoke_action("main", "t1", Some("explode"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ActionFailed(reason) if reason.contains("action exploded")));
    assert!(notified(&drain(&mut rx)).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_host_action_while_host_down() {
    let launcher = FakeLauncher::new();
    let (runtime, mut rx) = host_runtime(&launcher).await;

    // keep the host down so the cached result outlives it
    launcher.fail_launches.store(u32::MAX, Ordering::SeqCst);
    launcher.crash();
    let down = tokio::time::timeout(Duration::from_secs(30), async {
        while runtime.host_snapshots()[0].state == HostState::Ready {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(down.is_ok());

    let err = runtime.invoke_action("main", "t1", None).await.unwrap_err();
    assert!(matches!(err, Error::ActionFailed(reason) if reason.contains("Host unavailable")));
    assert!(notified(&drain(&mut rx)).is_some());
}

#[tokio::test]
async fn test_shared_result_ids_keep_their_issuer() {
    let numbered = |id: &str, title: &str| {
        Arc::new(MockPlugin::global(id).returning(vec![
            result(title, 10)
                .with_id("1")
                .with_action(ResultAction::new("open", "Open")),
        ]))
    };
    let alpha = numbered("alpha", "a");
    let beta = numbered("beta", "b");
    let (runtime, mut rx, _) = make_runtime(FakeLauncher::new());
    runtime.register_native(alpha.clone()).await.unwrap();
    runtime.register_native(beta.clone()).await.unwrap();
    runtime.query("main", "anything").await.unwrap();

    let shown = drain(&mut rx)
        .into_iter()
        .find_map(|u| match u {
            UiUpdate::Results { results, .. } => Some(results),
            _ => None,
        })
        .unwrap();
    let shown_id = |plugin: &str| {
        shown
            .iter()
            .find(|r| r.plugin_id == plugin)
            .map(|r| r.result.id.clone())
            .unwrap()
    };
    assert_ne!(shown_id("alpha"), shown_id("beta"));

    for (plugin_id, plugin) in [("alpha", &alpha), ("beta", &beta)] {
        let id = shown_id(plugin_id);
        runtime.invoke_action("main", &id, None).await.unwrap();
        assert_eq!(plugin.actions.lock()[0].result_id, "1");
    }
    drain(&mut rx);

    let api = beta.api.lock().clone().unwrap();
    let patch = ResultPatch {
        id: "1".to_string(),
        title: Some("b, updated".to_string()),
        ..Default::default()
    };
    assert!(api.update_result(patch));
    match drain(&mut rx).as_slice() {
        [UiUpdate::ResultUpdated { patch }] => {
            assert_eq!(patch.id, shown_id("beta"));
            assert_eq!(patch.title.as_deref(), Some("b, updated"));
        }
        other => panic!("unexpected updates: {other:?}"),
    }
}
