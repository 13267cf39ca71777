//! Common test utilities
//!
//! Shared helpers and fixtures for the integration tests.

use std::sync::{Arc, Once};

use oxdriver::{Browser, Config};

/// Initialize test logging once; `RUST_LOG` controls the filter
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Config with short timeouts so failing waits surface quickly
pub fn test_config() -> Config {
    Config {
        default_timeout: 5_000,
        navigation_timeout: 5_000,
        poll_interval: 20,
        ..Default::default()
    }
}

/// Connect a browser to the given WebSocket endpoint with test timeouts
pub async fn connect_browser(ws_url: &str) -> Arc<Browser> {
    init_tracing();
    Browser::connect_with_config(ws_url, test_config())
        .await
        .expect("Failed to connect to browser endpoint")
}

/// Get test HTML content
pub fn get_test_html() -> String {
    r#"
<!DOCTYPE html>
<html>
<head>
    <title>Test Page</title>
</head>
<body>
    <h1 id="title">Hello World</h1>
    <button id="click-me">Click Me</button>
    <input id="text-input" type="text" />
    <div id="output"></div>
</body>
</html>
    "#
    .to_string()
}

/// Data URL wrapping the test page, navigable without a web server
pub fn get_test_url() -> String {
    "data:text/html;charset=utf-8,".to_string() + &urlencoding::encode(&get_test_html())
}
