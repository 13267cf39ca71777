//! Browser entry point
//!
//! Resolves an endpoint to the browser's WebSocket debugger URL,
//! establishes the shared connection, and hands out attached tabs. One
//! `Browser` owns exactly one physical connection; every tab and frame
//! session multiplexes over it.

use super::tab::Tab;
use crate::cdp::connection::CdpWebSocketConnection;
use crate::cdp::registry::SessionRegistry;
use crate::cdp::traits::CdpConnection;
use crate::cdp::types::{CreateTargetResponse, GetTargetsResponse, GetVersionResponse, TargetInfo};
use crate::config::Config;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Connected browser instance
pub struct Browser {
    connection: Arc<dyn CdpConnection>,
    registry: Arc<SessionRegistry>,
    config: Config,
    tabs: RwLock<HashMap<String, Arc<Tab>>>,
    closed: AtomicBool,
}

impl Browser {
    /// Connect with the default configuration
    pub async fn connect(endpoint: &str) -> Result<Arc<Self>> {
        Self::connect_with_config(endpoint, Config::default()).await
    }

    /// Connect to a browser endpoint
    ///
    /// `ws://`/`wss://` endpoints are used directly; `http://`/`https://`
    /// addresses are resolved through `GET /json/version` first. The
    /// initial connection retries per the configured attempt count,
    /// since a freshly launched browser may not be listening yet.
    pub async fn connect_with_config(endpoint: &str, config: Config) -> Result<Arc<Self>> {
        let ws_url = resolve_ws_url(endpoint).await?;
        let connection = CdpWebSocketConnection::connect_with_retry(
            ws_url,
            config.connect_retries,
            config.connect_retry_delay(),
        )
        .await?;
        Ok(Self::with_connection(
            connection as Arc<dyn CdpConnection>,
            config,
        ))
    }

    /// Assemble a browser over an already established connection
    pub fn with_connection(connection: Arc<dyn CdpConnection>, config: Config) -> Arc<Self> {
        let registry = SessionRegistry::new(Arc::clone(&connection));
        Arc::new(Self {
            connection,
            registry,
            config,
            tabs: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Browser build, protocol, and JS engine versions
    pub async fn version(&self) -> Result<GetVersionResponse> {
        self.ensure_open()?;
        let result = self
            .connection
            .send_command(None, "Browser.getVersion", None)
            .await?;
        serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid getVersion response: {}", e)))
    }

    /// Every target the browser currently exposes
    pub async fn targets(&self) -> Result<Vec<TargetInfo>> {
        self.ensure_open()?;
        let result = self
            .connection
            .send_command(None, "Target.getTargets", None)
            .await?;
        let response: GetTargetsResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid getTargets response: {}", e)))?;
        Ok(response.target_infos)
    }

    /// Create a page target and attach it
    pub async fn new_tab(&self, url: &str) -> Result<Arc<Tab>> {
        self.ensure_open()?;
        let result = self
            .connection
            .send_command(
                None,
                "Target.createTarget",
                Some(serde_json::json!({ "url": url })),
            )
            .await?;
        let response: CreateTargetResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid createTarget response: {}", e)))?;

        self.attach_tab(&response.target_id).await
    }

    /// Attach an existing target by id, reusing a live handle if one
    /// exists
    pub async fn tab(&self, target_id: &str) -> Result<Arc<Tab>> {
        self.ensure_open()?;
        if let Some(tab) = self.lookup(target_id)? {
            if !tab.is_closed() {
                return Ok(tab);
            }
        }
        self.attach_tab(target_id).await
    }

    /// Attach every page target and return the lot
    pub async fn tabs(&self) -> Result<Vec<Arc<Tab>>> {
        self.ensure_open()?;
        let mut tabs = Vec::new();
        for target in self.targets().await? {
            if target.target_type != "page" {
                continue;
            }
            match self.tab(&target.target_id).await {
                Ok(tab) => tabs.push(tab),
                Err(e) => warn!("Could not attach target {}: {}", target.target_id, e),
            }
        }
        Ok(tabs)
    }

    /// Close one tab and forget its handle
    pub async fn close_tab(&self, target_id: &str) -> Result<()> {
        let tab = self
            .tabs
            .write()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .remove(target_id);
        match tab {
            Some(tab) => tab.close().await,
            None => Err(Error::target_not_found(target_id)),
        }
    }

    /// Close every tab and the connection; calling twice is a no-op
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing browser connection");

        let tabs: Vec<Arc<Tab>> = self
            .tabs
            .write()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .drain()
            .map(|(_, tab)| tab)
            .collect();
        for tab in tabs {
            if let Err(e) = tab.close().await {
                debug!("Tab close during shutdown failed: {}", e);
            }
        }

        self.connection.close().await
    }

    /// The shared protocol connection
    pub fn connection(&self) -> &Arc<dyn CdpConnection> {
        &self.connection
    }

    /// Session registry shared by every tab
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn attach_tab(&self, target_id: &str) -> Result<Arc<Tab>> {
        let tab = Tab::attach(
            Arc::clone(&self.connection),
            Arc::clone(&self.registry),
            self.config.clone(),
            target_id,
        )
        .await?;
        self.tabs
            .write()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .insert(target_id.to_string(), Arc::clone(&tab));
        Ok(tab)
    }

    fn lookup(&self, target_id: &str) -> Result<Option<Arc<Tab>>> {
        Ok(self
            .tabs
            .read()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .get(target_id)
            .cloned())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection_closed("browser is closed"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tab_count = self.tabs.read().map(|tabs| tabs.len()).unwrap_or(0);
        f.debug_struct("Browser")
            .field("tabs", &tab_count)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Turn a caller-supplied endpoint into a WebSocket debugger URL
async fn resolve_ws_url(endpoint: &str) -> Result<String> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_string());
    }

    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        let version_url = format!("{}/json/version", endpoint.trim_end_matches('/'));
        debug!("Resolving debugger URL via {}", version_url);

        let response = reqwest::get(&version_url).await?;
        let payload: serde_json::Value = response.json().await?;
        return payload
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                Error::http(format!("{} returned no webSocketDebuggerUrl", version_url))
            });
    }

    Err(Error::configuration(format!(
        "Unsupported endpoint scheme: {}",
        endpoint
    )))
}
