use serde_json::json;
use sessionjar_cdp::TabController;

use super::{endpoint_of, load_config, print_json};
use crate::BrowserArgs;

pub fn controller(
    browser: BrowserArgs,
    load_timeout: Option<f64>,
) -> anyhow::Result<TabController> {
    let (_, config) = load_config()?;
    let mut cfg = config.tabs.clone();
    let (host, port) = endpoint_of(&browser, &cfg.chrome_host, cfg.chrome_port);
    cfg.chrome_host = host;
    cfg.chrome_port = port;
    if let Some(secs) = load_timeout {
        cfg.load_timeout_secs = secs;
    }
    cfg.validate()?;
    Ok(TabController::new(cfg))
}

pub async fn list(controller: &TabController) -> anyhow::Result<()> {
    let tabs = controller.list_tabs().await?;
    print_json(&tabs)
}

pub async fn open(controller: &mut TabController, url: &str) -> anyhow::Result<()> {
    let tab = controller.open_tab(url).await?;
    print_json(&tab)
}

pub async fn refresh(
    controller: &mut TabController,
    target_id: &str,
    ignore_cache: bool,
) -> anyhow::Result<()> {
    let ignore_cache = ignore_cache || controller.config().ignore_cache;
    let loaded = controller.refresh(target_id, Some(ignore_cache)).await?;
    print_json(&json!({ "target_id": target_id, "loaded": loaded }))
}

pub async fn navigate(
    controller: &mut TabController,
    target_id: &str,
    url: &str,
) -> anyhow::Result<()> {
    let loaded = controller.navigate(target_id, url).await?;
    print_json(&json!({ "target_id": target_id, "url": url, "loaded": loaded }))
}

pub async fn close(controller: &mut TabController, target_id: &str) -> anyhow::Result<()> {
    let closed = controller.close_tab(target_id).await?;
    print_json(&json!({ "target_id": target_id, "closed": closed }))
}
