use serde_json::json;
use sessionjar_cdp::{select_target, DevtoolsEndpoint};

use super::{endpoint_of, load_config, print_json};
use crate::BrowserArgs;

pub async fn run(browser: BrowserArgs, hint: Option<String>) -> anyhow::Result<()> {
    let (_, config) = load_config()?;
    let (host, port) = endpoint_of(
        &browser,
        &config.capture.chrome_host,
        config.capture.chrome_port,
    );
    let endpoint = DevtoolsEndpoint::new(host, port);

    let pages = endpoint.list_page_targets().await?;
    let selected = match select_target(pages.clone(), hint.as_deref()) {
        Ok(target) => Some(endpoint.target_ws_url(&target).map(|ws| (target.id, ws))?),
        Err(_) => None,
    };

    print_json(&json!({
        "endpoint": endpoint.base_url(),
        "targets": pages,
        "selected": selected.map(|(id, ws)| json!({ "id": id, "webSocketDebuggerUrl": ws })),
    }))
}
