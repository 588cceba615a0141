use async_trait::async_trait;
use serde::Serialize;
use sessionjar_core::{Result, TabControllerConfig};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::client::CdpClient;
use crate::discovery::{DevtoolsEndpoint, TargetInfo};

/// Lightweight reference to an open browser tab.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabHandle {
    pub target_id: String,
    pub url: String,
    pub title: String,
    pub ws_url: String,
}

/// Operations a capture run needs to generate traffic on a tab.
#[async_trait]
pub trait TabDriver: Send {
    async fn list_tabs(&mut self) -> Result<Vec<TabHandle>>;

    /// Reload the tab. `true` once the load event fired within the load timeout.
    async fn refresh(&mut self, target_id: &str, ignore_cache: Option<bool>) -> Result<bool>;

    async fn navigate(&mut self, target_id: &str, url: &str) -> Result<bool>;
}

/// Keeps tabs alive and drives them without tearing them down.
///
/// One cached [`CdpClient`] per target id. All methods take `&mut self`:
/// a controller has a single owner and is not meant to be shared across tasks.
pub struct TabController {
    config: TabControllerConfig,
    endpoint: DevtoolsEndpoint,
    clients: HashMap<String, CdpClient>,
}

impl TabController {
    pub fn new(config: TabControllerConfig) -> Self {
        let endpoint = DevtoolsEndpoint::new(config.chrome_host.clone(), config.chrome_port);
        Self {
            config,
            endpoint,
            clients: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TabControllerConfig {
        &self.config
    }

    fn handle_for(&self, target: TargetInfo) -> TabHandle {
        let ws_url = target
            .web_socket_debugger_url
            .clone()
            .unwrap_or_else(|| self.endpoint.page_ws_url(&target.id));
        TabHandle {
            target_id: target.id,
            url: target.url,
            title: target.title,
            ws_url,
        }
    }

    /// Cached client for `target_id`, connecting and enabling page events on first use.
    async fn client(&mut self, target_id: &str) -> Result<&mut CdpClient> {
        if !self.clients.contains_key(target_id) {
            let ws_url = self.endpoint.page_ws_url(target_id);
            let client = CdpClient::connect(&ws_url).await?;
            client.enable_page_events().await?;
            debug!(target_id, "Connected tab client");
            self.clients.insert(target_id.to_string(), client);
        }
        self.clients.get_mut(target_id).ok_or_else(|| {
            sessionjar_core::Error::Other(format!("tab client for {} unavailable", target_id))
        })
    }

    async fn drop_client(&mut self, target_id: &str) {
        if let Some(mut client) = self.clients.remove(target_id) {
            client.close().await;
        }
    }

    /// Every `page` target currently open.
    pub async fn list_tabs(&self) -> Result<Vec<TabHandle>> {
        let targets = self.endpoint.list_page_targets().await?;
        Ok(targets.into_iter().map(|t| self.handle_for(t)).collect())
    }

    /// Open a new tab. Uses `Target.createTarget` through an existing tab,
    /// or the `/json/new` endpoint when no tab is open.
    pub async fn open_tab(&mut self, url: &str) -> Result<TabHandle> {
        let tabs = self.list_tabs().await?;
        let target_id = match tabs.first() {
            Some(tab) => {
                let via = tab.target_id.clone();
                self.client(&via).await?.create_target(url).await?
            }
            None => self.endpoint.new_tab(url).await?.id,
        };

        info!(target_id = %target_id, url, "Opened tab");
        Ok(TabHandle {
            ws_url: self.endpoint.page_ws_url(&target_id),
            target_id,
            url: url.to_string(),
            title: String::new(),
        })
    }

    pub async fn refresh(&mut self, target_id: &str, ignore_cache: Option<bool>) -> Result<bool> {
        let ignore_cache = ignore_cache.unwrap_or(self.config.ignore_cache);
        let timeout = self.config.load_timeout();
        let client = self.client(target_id).await?;
        client.drain_events();
        client.reload(ignore_cache).await?;
        let loaded = client.wait_for_load(timeout).await?;
        info!(target_id, loaded, "Refreshed tab");
        Ok(loaded)
    }

    pub async fn navigate(&mut self, target_id: &str, url: &str) -> Result<bool> {
        let timeout = self.config.load_timeout();
        let client = self.client(target_id).await?;
        client.drain_events();
        client.navigate(url).await?;
        let loaded = client.wait_for_load(timeout).await?;
        info!(target_id, url, loaded, "Navigated tab");
        Ok(loaded)
    }

    /// Close a tab and drop its cached connection.
    ///
    /// The close command is sent through another open tab when one exists.
    pub async fn close_tab(&mut self, target_id: &str) -> Result<bool> {
        let tabs = self.list_tabs().await?;
        let via = tabs
            .iter()
            .find(|t| t.target_id != target_id)
            .or_else(|| tabs.first())
            .map(|t| t.target_id.clone());

        let success = match via {
            Some(via) => self.client(&via).await?.close_target(target_id).await?,
            None => false,
        };
        self.drop_client(target_id).await;
        info!(target_id, success, "Closed tab");
        Ok(success)
    }

    /// Disconnect every cached client. Tabs stay open.
    pub async fn close(&mut self) {
        let ids: Vec<String> = self.clients.keys().cloned().collect();
        for id in ids {
            self.drop_client(&id).await;
        }
    }
}

#[async_trait]
impl TabDriver for TabController {
    async fn list_tabs(&mut self) -> Result<Vec<TabHandle>> {
        TabController::list_tabs(self).await
    }

    async fn refresh(&mut self, target_id: &str, ignore_cache: Option<bool>) -> Result<bool> {
        TabController::refresh(self, target_id, ignore_cache).await
    }

    async fn navigate(&mut self, target_id: &str, url: &str) -> Result<bool> {
        TabController::navigate(self, target_id, url).await
    }
}
