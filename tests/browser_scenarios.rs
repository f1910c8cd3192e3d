//! End-to-end scenarios against a real Chrome. Run with `--ignored` on a
//! machine that has Chrome installed.

use std::sync::Arc;
use std::time::Duration;

use web_pilot::{
    ActionExecutor, ActionKind, AutomationAction, BrowserOptions, ExecuteOptions, SessionManager,
};

const PAGE: &str = "data:text/html,<html><body><h1 id=title>Fixture</h1>\
<input id=name><select id=pick><option value=a>A</option><option value=b>B</option></select>\
</body></html>";

fn manager() -> Arc<SessionManager> {
    Arc::new(SessionManager::new(BrowserOptions::default()))
}

#[tokio::test]
#[ignore = "requires a local Chrome install"]
async fn navigate_then_screenshot_succeeds() {
    let sessions = manager();
    let executor = ActionExecutor::new(sessions.clone());
    let actions = vec![
        AutomationAction::new(
            ActionKind::Navigate {
                url: PAGE.to_string(),
                wait_until: None,
            },
            "open fixture",
        ),
        AutomationAction::new(ActionKind::Screenshot { full_page: None }, "capture"),
    ];

    let results = executor
        .execute_actions(&actions, &ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success), "{results:?}");
    assert!(results[1].screenshot.is_some());
    sessions.close_all().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local Chrome install"]
async fn click_on_missing_element_is_a_failed_result() {
    let sessions = manager();
    let executor = ActionExecutor::new(sessions.clone());
    let actions = vec![AutomationAction::new(
        ActionKind::Click {
            selector: "#does-not-exist".to_string(),
            delay: None,
        },
        "click nothing",
    )];

    let results = executor
        .execute_actions(&actions, &ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert!(!results[0].error.as_deref().unwrap_or_default().is_empty());
    sessions.close_all().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local Chrome install"]
async fn type_and_select_update_the_page() {
    let sessions = manager();
    sessions.navigate(PAGE, Some("forms")).await.unwrap();
    let executor = ActionExecutor::new(sessions.clone());
    let actions = vec![
        AutomationAction::new(
            ActionKind::Type {
                selector: "#name".into(),
                value: "Ada".into(),
                delay: None,
            },
            "name",
        ),
        AutomationAction::new(
            ActionKind::Select {
                selector: "#pick".into(),
                value: "b".into(),
            },
            "pick",
        ),
        AutomationAction::new(
            ActionKind::Select {
                selector: "#pick".into(),
                value: "zzz".into(),
            },
            "bad option",
        ),
    ];
    let options = ExecuteOptions {
        session_id: "forms".into(),
        ..ExecuteOptions::default()
    };

    let results = executor.execute_actions(&actions, &options).await.unwrap();
    assert!(results[0].success);
    assert!(results[1].success);
    assert!(!results[2].success);

    let html = sessions.get_content(Some("forms")).await.unwrap();
    assert!(html.contains("Fixture"));
    sessions.close_all().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local Chrome install"]
async fn close_all_then_reuse_key_starts_fresh() {
    let sessions = manager();
    sessions.navigate(PAGE, None).await.unwrap();
    let first = sessions.session("default").await.unwrap();
    assert!(first.url.starts_with("data:"));

    sessions.close_all().await.unwrap();
    assert!(sessions.session_ids().await.is_empty());

    let tab = sessions.get_page(None).await.unwrap();
    assert!(!tab.get_url().starts_with("data:"));
    let fresh = sessions.session("default").await.unwrap();
    assert_eq!(fresh.url, "about:blank");
    assert!(fresh.created_at > first.created_at);
    sessions.close_all().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local Chrome install"]
async fn closed_page_is_recreated_with_a_fresh_record() {
    let sessions = manager();
    sessions.navigate(PAGE, Some("tabs")).await.unwrap();
    let first = sessions.get_page(Some("tabs")).await.unwrap();
    let first_target = first.get_target_id().clone();

    first.close(false).unwrap();
    // The tab list is updated from Chrome's target events.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let second = sessions.get_page(Some("tabs")).await.unwrap();
    assert_ne!(*second.get_target_id(), first_target);
    let record = sessions.session("tabs").await.unwrap();
    assert_eq!(record.url, "about:blank");
    assert!(record.actions.is_empty());
    sessions.close_all().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local Chrome install"]
async fn explicit_close_then_reuse_key_gets_new_page() {
    let sessions = manager();
    sessions.navigate(PAGE, Some("cart")).await.unwrap();
    let first_target = sessions
        .get_page(Some("cart"))
        .await
        .unwrap()
        .get_target_id()
        .clone();
    let before = sessions.session("cart").await.unwrap();

    assert!(sessions.close(Some("cart")).await.unwrap());
    assert!(sessions.session("cart").await.is_none());
    assert!(!sessions.close(Some("cart")).await.unwrap());

    let tab = sessions.get_page(Some(" cart ")).await.unwrap();
    assert_ne!(*tab.get_target_id(), first_target);
    let after = sessions.session("cart").await.unwrap();
    assert_eq!(after.url, "about:blank");
    assert!(after.created_at > before.created_at);
    assert_eq!(sessions.session_ids().await, vec!["cart".to_string()]);
    sessions.close_all().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local Chrome install"]
async fn idle_browser_is_relaunched_on_next_use() {
    let sessions = Arc::new(SessionManager::new(BrowserOptions {
        idle_timeout: Duration::from_secs(1),
        ..BrowserOptions::default()
    }));
    sessions.navigate(PAGE, None).await.unwrap();
    let before = sessions.session("default").await.unwrap();

    // No DevTools traffic for longer than the idle timeout drops the connection.
    tokio::time::sleep(Duration::from_secs(3)).await;

    sessions.navigate(PAGE, None).await.unwrap();
    let html = sessions.get_content(None).await.unwrap();
    assert!(html.contains("Fixture"));
    let after = sessions.session("default").await.unwrap();
    assert!(after.created_at > before.created_at);
    sessions.close_all().await.unwrap();
}
