//! Configuration management for Oxdriver
//!
//! Options are a fixed, enumerated set plus `extra_flags` as a typed
//! escape hatch for additional browser switches. Launching the browser
//! process is a host concern; `launch_args` only renders the flag list.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

/// Driver configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Headless mode (no GUI)
    pub headless: bool,

    /// Run with the browser sandbox enabled
    pub sandbox: bool,

    /// Window width
    pub window_width: u32,

    /// Window height
    pub window_height: u32,

    /// User agent override
    pub user_agent: Option<String>,

    /// Proxy server (e.g. "http://127.0.0.1:3128")
    pub proxy_server: Option<String>,

    /// Proxy username for automatic auth challenges
    pub proxy_username: Option<String>,

    /// Proxy password for automatic auth challenges
    pub proxy_password: Option<String>,

    /// Default timeout for commands in milliseconds
    pub default_timeout: u64,

    /// Timeout for navigation waits in milliseconds
    pub navigation_timeout: u64,

    /// Interval between element query polls in milliseconds
    pub poll_interval: u64,

    /// Attempts when first connecting to the debugging endpoint
    pub connect_retries: u32,

    /// Delay between connection attempts in milliseconds
    pub connect_retry_delay: u64,

    /// Additional browser launch flags: key without leading dashes,
    /// empty value for bare switches (e.g. "disable-gpu" -> "",
    /// "lang" -> "en-US")
    pub extra_flags: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            window_width: 1920,
            window_height: 1080,
            user_agent: None,
            proxy_server: None,
            proxy_username: None,
            proxy_password: None,
            default_timeout: 30000,
            navigation_timeout: 30000,
            poll_interval: 500,
            connect_retries: 10,
            connect_retry_delay: 250,
            extra_flags: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(headless) = env::var("OXDRIVER_HEADLESS") {
            config.headless = headless
                .parse()
                .map_err(|_| Error::configuration("Invalid OXDRIVER_HEADLESS"))?;
        }

        if let Ok(sandbox) = env::var("OXDRIVER_SANDBOX") {
            config.sandbox = sandbox
                .parse()
                .map_err(|_| Error::configuration("Invalid OXDRIVER_SANDBOX"))?;
        }

        if let Ok(width) = env::var("OXDRIVER_WINDOW_WIDTH") {
            config.window_width = width
                .parse()
                .map_err(|_| Error::configuration("Invalid OXDRIVER_WINDOW_WIDTH"))?;
        }

        if let Ok(height) = env::var("OXDRIVER_WINDOW_HEIGHT") {
            config.window_height = height
                .parse()
                .map_err(|_| Error::configuration("Invalid OXDRIVER_WINDOW_HEIGHT"))?;
        }

        if let Ok(user_agent) = env::var("OXDRIVER_USER_AGENT") {
            config.user_agent = Some(user_agent);
        }

        if let Ok(proxy) = env::var("OXDRIVER_PROXY_SERVER") {
            config.proxy_server = Some(proxy);
        }

        if let Ok(username) = env::var("OXDRIVER_PROXY_USERNAME") {
            config.proxy_username = Some(username);
        }

        if let Ok(password) = env::var("OXDRIVER_PROXY_PASSWORD") {
            config.proxy_password = Some(password);
        }

        if let Ok(timeout) = env::var("OXDRIVER_DEFAULT_TIMEOUT") {
            config.default_timeout = timeout
                .parse()
                .map_err(|_| Error::configuration("Invalid OXDRIVER_DEFAULT_TIMEOUT"))?;
        }

        if let Ok(timeout) = env::var("OXDRIVER_NAVIGATION_TIMEOUT") {
            config.navigation_timeout = timeout
                .parse()
                .map_err(|_| Error::configuration("Invalid OXDRIVER_NAVIGATION_TIMEOUT"))?;
        }

        if let Ok(interval) = env::var("OXDRIVER_POLL_INTERVAL") {
            config.poll_interval = interval
                .parse()
                .map_err(|_| Error::configuration("Invalid OXDRIVER_POLL_INTERVAL"))?;
        }

        if let Ok(retries) = env::var("OXDRIVER_CONNECT_RETRIES") {
            config.connect_retries = retries
                .parse()
                .map_err(|_| Error::configuration("Invalid OXDRIVER_CONNECT_RETRIES"))?;
        }

        if let Ok(delay) = env::var("OXDRIVER_CONNECT_RETRY_DELAY") {
            config.connect_retry_delay = delay
                .parse()
                .map_err(|_| Error::configuration("Invalid OXDRIVER_CONNECT_RETRY_DELAY"))?;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Default timeout for commands
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout)
    }

    /// Timeout for navigation waits
    pub fn nav_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout)
    }

    /// Interval between element query polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    /// Delay between connection attempts
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay)
    }

    /// Render the browser launch flag list for an external launcher
    ///
    /// Baseline flags follow what stock automation profiles disable to
    /// keep a fresh browser quiet; configured options and `extra_flags`
    /// are appended after them.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--remote-allow-origins=*",
            "--no-first-run",
            "--no-default-browser-check",
            "--no-service-autorun",
            "--no-pings",
            "--homepage=about:blank",
            "--password-store=basic",
            "--disable-infobars",
            "--disable-breakpad",
            "--disable-dev-shm-usage",
            "--disable-session-crashed-bubble",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if self.headless {
            args.push("--headless=new".to_string());
        }

        if !self.sandbox {
            args.push("--no-sandbox".to_string());
            args.push("--disable-setuid-sandbox".to_string());
        }

        args.push(format!(
            "--window-size={},{}",
            self.window_width, self.window_height
        ));

        if let Some(proxy) = &self.proxy_server {
            args.push(format!("--proxy-server={}", proxy));
        }

        if let Some(user_agent) = &self.user_agent {
            args.push(format!("--user-agent={}", user_agent));
        }

        for (key, value) in &self.extra_flags {
            let key = key.trim_start_matches('-');
            if value.is_empty() {
                args.push(format!("--{}", key));
            } else {
                args.push(format!("--{}={}", key, value));
            }
        }

        args
    }

    /// Whether proxy credentials are configured for auth challenges
    pub fn has_proxy_credentials(&self) -> bool {
        self.proxy_username.is_some() || self.proxy_password.is_some()
    }
}
