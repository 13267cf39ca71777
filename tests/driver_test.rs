//! Driver integration tests
//!
//! These validate the browser/tab/element surface end to end against
//! the in-process mock Chrome endpoint: navigation and supersession,
//! element lookup and staleness, frame switching, history, network
//! expectations, and interception.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use oxdriver::driver::RequestStage;
use oxdriver::{Browser, Error, FrameTarget, ReadyState, ScreenshotFormat, Tab, TabState};

use common::connect_browser;
use mock_chrome::{MockChromeServer, MOCK_URL};

/// Server, browser and one freshly attached tab
async fn setup_tab() -> (MockChromeServer, Arc<Browser>, Arc<Tab>) {
    let server = MockChromeServer::start().await.unwrap();
    let browser = connect_browser(server.ws_endpoint()).await;
    let tab = browser
        .new_tab("about:blank")
        .await
        .expect("Failed to open tab");
    (server, browser, tab)
}

/// Poll until the tab reaches the wanted state
async fn wait_for_state(tab: &Tab, want: TabState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tab.state() != want {
        if tokio::time::Instant::now() >= deadline {
            panic!("Tab never reached {:?}, stuck at {:?}", want, tab.state());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Test 1: Browser metadata queries
#[tokio::test]
async fn test_browser_version_and_targets() {
    let server = MockChromeServer::start().await.unwrap();
    let browser = connect_browser(server.ws_endpoint()).await;

    let version = browser.version().await.unwrap();
    assert_eq!(version.product, "Chrome/126.0.0.0");

    let targets = browser.targets().await.unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].target_type, "page");

    browser.close().await.unwrap();
}

/// Test 2: Navigation settles the tab and its metadata reads work
#[tokio::test]
async fn test_navigation_and_tab_reads() {
    let (_server, browser, tab) = setup_tab().await;

    tab.navigate(&common::get_test_url()).await.unwrap();
    assert_eq!(tab.state(), TabState::Loaded);

    tab.wait_for_ready_state(ReadyState::Complete, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(tab.url().await.unwrap(), MOCK_URL);
    assert_eq!(tab.title().await.unwrap(), "Mock Page");

    tab.bring_to_front().await.unwrap();
    tab.set_user_agent("TestAgent/1.0").await.unwrap();
    tab.set_window_size(1280, 720).await.unwrap();

    browser.close().await.unwrap();
}

/// Test 3: A second navigation supersedes the first wait
#[tokio::test]
async fn test_superseded_navigation() {
    let (_server, browser, tab) = setup_tab().await;

    let slow = tab.clone();
    let first = tokio::spawn(async move {
        // Event script for "slow" URLs is delayed by the endpoint.
        slow.navigate("https://mock.test/slow-page").await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    tab.navigate(MOCK_URL).await.unwrap();

    let result = first.await.unwrap();
    assert!(matches!(result, Err(Error::NavigationSuperseded(_))));
    assert_eq!(tab.state(), TabState::Loaded);

    browser.close().await.unwrap();
}

/// Test 4: A never-matching find fails at the deadline, not before
#[tokio::test]
async fn test_find_timeout_window() {
    let (_server, browser, tab) = setup_tab().await;
    tab.navigate(MOCK_URL).await.unwrap();

    let started = Instant::now();
    let result = tab
        .find_with_timeout("#missing-button", Duration::from_millis(300))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(Error::ElementNotFound(_))));
    assert!(elapsed >= Duration::from_millis(250), "Gave up early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(500), "Gave up late: {:?}", elapsed);

    browser.close().await.unwrap();
}

/// Test 5: Element lookup and reads
#[tokio::test]
async fn test_find_and_element_reads() {
    let (_server, browser, tab) = setup_tab().await;
    tab.navigate(MOCK_URL).await.unwrap();

    let element = tab.find("#title").await.unwrap();
    assert_eq!(element.text().await.unwrap(), "Hello World");
    assert_eq!(element.attribute("id").await.unwrap().as_deref(), Some("title"));
    assert_eq!(element.outer_html().await.unwrap(), mock_chrome::MOCK_HTML);

    browser.close().await.unwrap();
}

/// Test 6: Multi-match and text search lookups
#[tokio::test]
async fn test_find_all_and_find_by_text() {
    let (_server, browser, tab) = setup_tab().await;
    tab.navigate(MOCK_URL).await.unwrap();

    let all = tab.find_all("div").await.unwrap();
    assert_eq!(all.len(), 2);

    let matched = tab.find_by_text("Hello").await.unwrap();
    assert_eq!(matched.text().await.unwrap(), "Hello World");

    browser.close().await.unwrap();
}

/// Test 7: Frame tree order, scoped lookup, and the way back to the root
#[tokio::test]
async fn test_frame_tree_and_switching() {
    let (_server, browser, tab) = setup_tab().await;
    tab.navigate(MOCK_URL).await.unwrap();

    let target = tab.target_id().to_string();
    let frame_a = format!("{}-frame-a", target);
    let frame_b = format!("{}-frame-b", target);

    let frames = tab.frames().unwrap();
    let ids: Vec<&str> = frames.iter().map(|f| f.frame_id.as_str()).collect();
    assert_eq!(ids, vec![target.as_str(), frame_a.as_str(), frame_b.as_str()]);
    assert!(frames[0].is_root());

    tab.switch_to_index(2).await.unwrap();
    assert_eq!(tab.current_frame().unwrap().frame_id, frame_b);

    let inner = tab.find("#inner").await.unwrap();
    assert_eq!(inner.frame_id(), frame_b);

    tab.switch_to(FrameTarget::Root).await.unwrap();
    assert!(tab.current_frame().unwrap().is_root());

    browser.close().await.unwrap();
}

/// Test 8: Navigation invalidates previously resolved elements
#[tokio::test]
async fn test_stale_element_after_navigation() {
    let (_server, browser, tab) = setup_tab().await;
    tab.navigate(MOCK_URL).await.unwrap();

    let element = tab.find("#title").await.unwrap();
    assert_eq!(element.text().await.unwrap(), "Hello World");

    tab.navigate("https://mock.test/next").await.unwrap();

    let result = element.text().await;
    assert!(matches!(result, Err(Error::StaleElement(_))));

    browser.close().await.unwrap();
}

/// Test 9: History steps and reload settle like navigations
#[tokio::test]
async fn test_history_and_reload() {
    let (_server, browser, tab) = setup_tab().await;
    tab.navigate(MOCK_URL).await.unwrap();

    // back/forward/reload return once the command is accepted; the
    // load event lands through the pump shortly after.
    tab.back().await.unwrap();
    wait_for_state(&tab, TabState::Loaded).await;

    tab.forward().await.unwrap();
    wait_for_state(&tab, TabState::Loaded).await;

    tab.reload(false).await.unwrap();
    wait_for_state(&tab, TabState::Loaded).await;

    browser.close().await.unwrap();
}

/// Test 10: Document content round-trip
#[tokio::test]
async fn test_content_and_set_content() {
    let (_server, browser, tab) = setup_tab().await;
    tab.navigate(MOCK_URL).await.unwrap();

    let content = tab.content().await.unwrap();
    assert!(content.contains("Hello World"));

    tab.set_content("<p>replaced</p>").await.unwrap();

    browser.close().await.unwrap();
}

/// Test 11: Screenshot decodes to PNG bytes
#[tokio::test]
async fn test_screenshot_png() {
    let (_server, browser, tab) = setup_tab().await;

    let bytes = tab.screenshot(ScreenshotFormat::Png).await.unwrap();
    assert_eq!(&bytes[0..8], &[137, 80, 78, 71, 13, 10, 26, 10]);

    browser.close().await.unwrap();
}

/// Test 12: Element interactions go through without protocol errors
#[tokio::test]
async fn test_element_interactions() {
    let (_server, browser, tab) = setup_tab().await;
    tab.navigate(MOCK_URL).await.unwrap();

    let element = tab.find("#title").await.unwrap();
    element.click().await.unwrap();
    element.focus().await.unwrap();
    element.send_keys("Hi").await.unwrap();
    element.clear().await.unwrap();

    browser.close().await.unwrap();
}

/// Test 13: Network expectations see the session's traffic
#[tokio::test]
async fn test_network_expectations() {
    let server = MockChromeServer::start().await.unwrap();
    let browser = connect_browser(server.ws_endpoint()).await;

    let tab = browser.new_tab("about:blank").await.unwrap();
    let request = tab
        .expect_request("api", Duration::from_secs(2))
        .await
        .unwrap();
    assert!(request.request.url.contains("/api/data"));

    // Fresh tab: network tracking enables once per tab, and the
    // endpoint reports traffic on enable.
    let other = browser.new_tab("about:blank").await.unwrap();
    let response = other
        .expect_response("api", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(response.response.status, 200);

    browser.close().await.unwrap();
}

/// Test 14: Interception receives the paused request and resolves it
#[tokio::test]
async fn test_intercept_pauses_and_continues() {
    let (_server, browser, tab) = setup_tab().await;

    let mut interception = tab.intercept(&["*"], RequestStage::Request).await.unwrap();

    let paused = interception.next().await.unwrap();
    assert_eq!(paused.url(), "https://mock.test/api/data");
    assert_eq!(paused.resource_type(), "XHR");
    assert!(!paused.is_response_stage());

    paused.continue_request().await.unwrap();
    interception.disable().await.unwrap();

    browser.close().await.unwrap();
}

/// Test 15: Close is idempotent and later use fails cleanly
#[tokio::test]
async fn test_close_semantics() {
    let (_server, browser, tab) = setup_tab().await;

    tab.close().await.unwrap();
    tab.close().await.unwrap();
    let after_tab_close = tab.navigate(MOCK_URL).await;
    assert!(matches!(after_tab_close, Err(Error::StaleSession(_))));

    let unknown = browser.close_tab("no-such-target").await;
    assert!(matches!(unknown, Err(Error::TargetNotFound(_))));

    browser.close().await.unwrap();
    browser.close().await.unwrap();
    let after_browser_close = browser.version().await;
    assert!(matches!(after_browser_close, Err(Error::ConnectionClosed(_))));
}
