//! Target discovery over the DevTools HTTP endpoints (`/json`, `/json/version`, `/json/new`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sessionjar_core::error::DEVTOOLS_HINT;
use sessionjar_core::{Error, Result};
use std::time::Duration;
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry policy used when picking a target for a capture run.
pub const PICK_RETRIES: u32 = 8;
pub const PICK_RETRY_DELAY: Duration = Duration::from_millis(500);

/// One entry of the `/json` target list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }

    /// Case-insensitive substring match against the URL or the title.
    pub fn matches_hint(&self, hint: &str) -> bool {
        let hint = hint.to_lowercase();
        self.url.to_lowercase().contains(&hint) || self.title.to_lowercase().contains(&hint)
    }
}

/// A DevTools HTTP endpoint, `http://{host}:{port}`.
#[derive(Debug, Clone)]
pub struct DevtoolsEndpoint {
    host: String,
    port: u16,
    http: reqwest::Client,
}

impl DevtoolsEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            host: host.into(),
            port,
            http,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Page WebSocket URL synthesized from a target id.
    pub fn page_ws_url(&self, target_id: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(target_id.as_bytes()).collect();
        format!("ws://{}:{}/devtools/page/{}", self.host, self.port, encoded)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url(), path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("GET {} failed: {}", url, e)))?;
        if !resp.status().is_success() {
            return Err(Error::Http(format!("GET {} returned {}", url, resp.status())));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| Error::Http(format!("GET {} returned invalid JSON: {}", url, e)))
    }

    /// Fetch `/json`, retrying up to `retries` times with `delay` between attempts.
    pub async fn list_targets(&self, retries: u32, delay: Duration) -> Result<Vec<TargetInfo>> {
        let attempts = retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }
            match self.get_json("/json").await {
                Ok(Value::Array(items)) => {
                    let targets = items
                        .into_iter()
                        .filter_map(|item| serde_json::from_value::<TargetInfo>(item).ok())
                        .collect::<Vec<_>>();
                    debug!(count = targets.len(), "Listed DevTools targets");
                    return Ok(targets);
                }
                Ok(_) => {
                    last_error = "Unexpected /json response from DevTools endpoint".to_string();
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            debug!(attempt = attempt + 1, error = %last_error, "DevTools endpoint not ready");
        }

        Err(Error::Discovery(format!(
            "Could not reach Chrome DevTools at {}/json ({}). {}",
            self.base_url(),
            last_error,
            DEVTOOLS_HINT
        )))
    }

    /// Page targets only, single attempt.
    pub async fn list_page_targets(&self) -> Result<Vec<TargetInfo>> {
        Ok(self
            .list_targets(1, Duration::ZERO)
            .await?
            .into_iter()
            .filter(TargetInfo::is_page)
            .collect())
    }

    /// Pick the page target to attach to; see [`select_target`].
    pub async fn pick_target(&self, hint: Option<&str>) -> Result<TargetInfo> {
        let targets = self.list_targets(PICK_RETRIES, PICK_RETRY_DELAY).await?;
        select_target(targets, hint)
    }

    /// WebSocket debugger URL of the picked target.
    pub async fn websocket_debug_url(&self, hint: Option<&str>) -> Result<String> {
        let target = self.pick_target(hint).await?;
        self.target_ws_url(&target)
    }

    /// The advertised debugger URL, or one synthesized from the target id.
    pub fn target_ws_url(&self, target: &TargetInfo) -> Result<String> {
        if let Some(ws) = target.web_socket_debugger_url.as_deref().filter(|s| !s.is_empty()) {
            return Ok(ws.to_string());
        }
        if target.id.is_empty() {
            return Err(Error::Discovery(
                "Target missing webSocketDebuggerUrl and id".into(),
            ));
        }
        Ok(self.page_ws_url(&target.id))
    }

    /// Browser build info from `/json/version`.
    pub async fn version(&self) -> Result<Value> {
        self.get_json("/json/version").await
    }

    /// Open a new tab via `/json/new`. Newer browsers require PUT; older ones only take GET.
    pub async fn new_tab(&self, url: &str) -> Result<TargetInfo> {
        let endpoint = format!("{}/json/new?{}", self.base_url(), url);

        let mut resp = self
            .http
            .put(&endpoint)
            .send()
            .await
            .map_err(|e| Error::Http(format!("PUT {} failed: {}", endpoint, e)))?;
        if resp.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            warn!("PUT /json/new rejected, retrying with GET");
            resp = self
                .http
                .get(&endpoint)
                .send()
                .await
                .map_err(|e| Error::Http(format!("GET {} failed: {}", endpoint, e)))?;
        }
        if !resp.status().is_success() {
            return Err(Error::Http(format!(
                "{} returned {}",
                endpoint,
                resp.status()
            )));
        }
        resp.json::<TargetInfo>()
            .await
            .map_err(|e| Error::Http(format!("Invalid /json/new response: {}", e)))
    }
}

/// Keep page targets; return the first whose URL or title contains `hint`
/// (case-insensitive), otherwise the first page target.
pub fn select_target(targets: Vec<TargetInfo>, hint: Option<&str>) -> Result<TargetInfo> {
    let pages: Vec<TargetInfo> = targets.into_iter().filter(TargetInfo::is_page).collect();
    if pages.is_empty() {
        return Err(Error::Discovery(format!(
            "No page targets found. Open a tab in the browser. {}",
            DEVTOOLS_HINT
        )));
    }

    if let Some(hint) = hint.filter(|h| !h.is_empty()) {
        if let Some(found) = pages.iter().find(|t| t.matches_hint(hint)) {
            return Ok(found.clone());
        }
    }

    let mut pages = pages;
    Ok(pages.swap_remove(0))
}
