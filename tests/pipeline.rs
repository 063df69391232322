//! End-to-end pipeline tests over the stub driver: scripted page responses,
//! a real store and the full session wiring.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use reportscope_cli::{ScopeConfig, Session};
use reportscope_core_types::TabId;
use reportscope_result_store::MemoryStore;
use reportscope_tab_broker::{BrokerError, StubTabDriver};

fn test_config(profile: &TempDir) -> ScopeConfig {
    let mut cfg = ScopeConfig::default();
    cfg.origin = "https://site.test/".into();
    cfg.landing_url = "https://site.test/landing".into();
    cfg.graphql_endpoint = "/graphql".into();
    cfg.profile_dir = profile.path().to_path_buf();
    cfg.results_url = format!("file://{}", profile.path().join("results.html").display());
    cfg.delivery_retry.delay = std::time::Duration::from_millis(5);
    cfg
}

fn envelope(body: Value) -> Value {
    json!({"ok": true, "status": 200, "body": body})
}

fn metadata_body(id: &str) -> Value {
    json!({"data": {"reports": {"edges": [{"node": {
        "substate": "triaged",
        "reporter": {"username": format!("reporter-{id}")},
        "title": format!("Report {id}"),
        "team": {"name": "Acme"}
    }}]}}})
}

fn timeline_body() -> Value {
    json!({"data": {"reports": {"nodes": [{"activities": {"edges": [
        {"node": {"type": "BugTriaged", "actor": {"username": "triager"},
                  "created_at": "2024-05-01T00:00:00Z", "message": ""}},
        {"node": {"type": "ActivitiesComment", "actor": {"username": "commenter"},
                  "created_at": "2024-04-30T00:00:00Z", "message": "ping"}}
    ]}}]}}})
}

fn digits_after<'a>(script: &'a str, marker: &str) -> Option<&'a str> {
    let rest = &script[script.find(marker)? + marker.len()..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

/// Scripts every page interaction the agent performs: readiness check,
/// token poll, overlay updates and the two query kinds. Reports listed in
/// `broken` get a failing transport envelope for their metadata query.
fn script_page(driver: &StubTabDriver, broken: &'static [&'static str]) {
    driver.set_eval_handler(Box::new(
        move |_tab: &TabId, expression: &str| -> Result<Value, BrokerError> {
            if expression == "document.readyState" {
                return Ok(Value::from("complete"));
            }
            if expression.contains("csrf-token") {
                return Ok(Value::from("tok-123"));
            }
            if let Some(id) = digits_after(expression, "META ") {
                if broken.contains(&id) {
                    return Ok(json!({"ok": false, "status": 500, "body": null}));
                }
                return Ok(envelope(metadata_body(id)));
            }
            if digits_after(expression, "TIME ").is_some() {
                return Ok(envelope(timeline_body()));
            }
            // Overlay injection and teardown scripts.
            Ok(Value::Null)
        },
    ));
}

async fn start_session(driver: Arc<StubTabDriver>, cfg: ScopeConfig) -> Session {
    // Marked templates let the eval handler tell the two query kinds apart.
    let queries = cfg.queries_dir();
    tokio::fs::create_dir_all(&queries).await.unwrap();
    tokio::fs::write(queries.join("metadata.txt"), "META [report_id]")
        .await
        .unwrap();
    tokio::fs::write(queries.join("timeline.txt"), "TIME [report_id]")
        .await
        .unwrap();

    Session::start_with_kv(driver, Arc::new(MemoryStore::new()), cfg).unwrap()
}

#[tokio::test]
async fn full_scrape_cycle_publishes_and_reroutes() {
    let profile = TempDir::new().unwrap();
    let cfg = test_config(&profile);
    let driver = Arc::new(StubTabDriver::new());
    script_page(&driver, &[]);

    let session = start_session(driver.clone(), cfg.clone()).await;
    let outcome = session.scrape("42, reports/7").await.unwrap();

    assert_eq!(outcome.results.rows.len(), 2);
    let row = &outcome.results.rows[0];
    assert_eq!(row.report_id, "42");
    assert_eq!(row.status.as_deref(), Some("triaged"));
    assert_eq!(row.researcher.as_deref(), Some("reporter-42"));
    assert_eq!(row.program.as_deref(), Some("Acme"));
    // First activity supplies the action, first substantive message the rest.
    assert_eq!(row.last_action.as_deref(), Some("BugTriaged"));
    assert_eq!(row.last_action_author.as_deref(), Some("triager"));
    assert_eq!(row.last_message.as_deref(), Some("ping"));
    assert_eq!(row.last_message_author.as_deref(), Some("commenter"));

    // The tab opened for the run was repurposed as the results view.
    assert!(outcome.routed.reused);
    assert_eq!(driver.open_tab_count(), 1);
    assert_eq!(driver.navigations().last().unwrap().1, cfg.results_url);

    assert!(cfg.results_page_path().exists());
    let html = std::fs::read_to_string(cfg.results_page_path()).unwrap();
    assert!(html.contains("Report 42"));
}

#[tokio::test]
async fn failed_reports_become_sentinel_rows_without_aborting() {
    let profile = TempDir::new().unwrap();
    let cfg = test_config(&profile);
    let driver = Arc::new(StubTabDriver::new());
    script_page(&driver, &["7"]);

    let session = start_session(driver, cfg).await;
    let outcome = session.scrape("42 7 9").await.unwrap();

    let ids: Vec<&str> = outcome
        .results
        .rows
        .iter()
        .map(|r| r.report_id.as_str())
        .collect();
    assert_eq!(ids, ["42", "7", "9"]);

    let broken = &outcome.results.rows[1];
    assert!(broken.status.is_none());
    assert!(broken.last_action.is_none());
    assert_eq!(outcome.results.rows[2].status.as_deref(), Some("triaged"));
}

#[tokio::test]
async fn preexisting_host_tab_is_not_repurposed() {
    let profile = TempDir::new().unwrap();
    let cfg = test_config(&profile);
    let driver = Arc::new(StubTabDriver::new());
    script_page(&driver, &[]);
    driver.seed_active_tab("https://site.test/landing").await;

    let session = start_session(driver.clone(), cfg.clone()).await;
    let outcome = session.scrape("42").await.unwrap();

    assert!(!outcome.routed.reused);
    // Operator tab plus a fresh results tab.
    assert_eq!(driver.open_tab_count(), 2);
}

#[tokio::test]
async fn token_timeout_fails_the_scrape_instead_of_waiting() {
    let profile = TempDir::new().unwrap();
    let mut cfg = test_config(&profile);
    cfg.agent.token_timeout = std::time::Duration::from_millis(100);
    cfg.agent.token_poll = std::time::Duration::from_millis(10);

    // A ready page that never exposes the security token.
    let driver = Arc::new(StubTabDriver::new());
    driver.set_eval_handler(Box::new(
        |_tab: &TabId, expression: &str| -> Result<Value, BrokerError> {
            if expression == "document.readyState" {
                return Ok(Value::from("complete"));
            }
            Ok(Value::Null)
        },
    ));

    let session = start_session(driver, cfg).await;
    let err = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        session.scrape("42"),
    )
    .await
    .expect("scrape must terminate once the token deadline passes")
    .unwrap_err();

    assert!(err.to_string().contains("security token not found"));
    assert!(session.store().load().await.unwrap().is_none());
}

#[tokio::test]
async fn unusable_input_is_rejected_before_touching_the_browser() {
    let profile = TempDir::new().unwrap();
    let cfg = test_config(&profile);
    let driver = Arc::new(StubTabDriver::new());

    let session = start_session(driver.clone(), cfg).await;
    let err = session.scrape("abc, reports/").await.unwrap_err();
    assert!(err.to_string().contains("no report ids"));
    assert_eq!(driver.open_tab_count(), 0);
}

#[tokio::test]
async fn deferred_tabs_navigate_on_first_activation_only() {
    let profile = TempDir::new().unwrap();
    let cfg = test_config(&profile);
    let driver = Arc::new(StubTabDriver::new());

    let session = start_session(driver.clone(), cfg).await;
    let resp = session
        .orchestrator()
        .open_deferred("https://site.test/reports/99")
        .await;
    assert!(resp.ok);
    let tab = resp.tab_id.unwrap();
    assert_eq!(driver.tab_url(&tab).as_deref(), Some("about:blank"));

    driver.simulate_activate(&tab).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(
        driver.tab_url(&tab).as_deref(),
        Some("https://site.test/reports/99")
    );

    // A second activation must not renavigate.
    let before = driver.navigations().len();
    driver.simulate_activate(&tab).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(driver.navigations().len(), before);
}
