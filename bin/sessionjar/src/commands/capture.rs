use serde_json::json;
use sessionjar_capture::capture_requests;
use sessionjar_core::RefreshTrigger;
use std::path::PathBuf;
use tracing::info;

use super::{endpoint_of, key_material, load_config, print_json};
use crate::{BrowserArgs, KeyArgs};

pub struct CaptureArgs {
    pub recipe: Option<String>,
    pub browser: BrowserArgs,
    pub key: KeyArgs,
    pub duration: Option<u64>,
    pub max_records: Option<usize>,
    pub hint: Option<String>,
    pub output: Option<PathBuf>,
    pub headers: Vec<String>,
    pub all_headers: bool,
    pub host_contains: Option<String>,
    pub path_contains: Option<String>,
    pub method: Option<String>,
    pub resource_type: Option<String>,
    pub refresh: bool,
    pub tab_id: Option<String>,
    pub navigate: Option<String>,
    pub ignore_cache: bool,
    pub capture_body: bool,
    pub max_body_bytes: Option<usize>,
}

pub async fn run(args: CaptureArgs) -> anyhow::Result<()> {
    let (paths, config) = load_config()?;
    let mut cfg = match super::recipe::load_named(&paths, args.recipe.as_deref())? {
        Some(recipe) => recipe.capture,
        None => config.capture.clone(),
    };

    let (host, port) = endpoint_of(&args.browser, &cfg.chrome_host, cfg.chrome_port);
    cfg.chrome_host = host;
    cfg.chrome_port = port;
    cfg.output_file = match args.output {
        Some(path) => path,
        None => paths.resolve_capture_file(&cfg.output_file),
    };

    if let Some(duration) = args.duration {
        cfg.duration_secs = duration;
    }
    if let Some(max) = args.max_records {
        cfg.max_records = max;
    }
    if args.hint.is_some() {
        cfg.target_hint = args.hint;
    }
    if !args.headers.is_empty() {
        cfg.header_allowlist = args.headers;
    }
    cfg.include_all_headers |= args.all_headers;
    cfg.filter_host_contains = args.host_contains.or(cfg.filter_host_contains);
    cfg.filter_path_contains = args.path_contains.or(cfg.filter_path_contains);
    cfg.filter_method = args.method.or(cfg.filter_method);
    cfg.filter_resource_type = args.resource_type.or(cfg.filter_resource_type);

    if args.refresh || args.navigate.is_some() || args.tab_id.is_some() {
        cfg.refresh = Some(RefreshTrigger {
            target_id: args.tab_id,
            navigate_url: args.navigate,
            ignore_cache: args.ignore_cache,
        });
    }
    cfg.capture_body |= args.capture_body;
    if let Some(max) = args.max_body_bytes {
        cfg.max_body_bytes = max;
    }
    cfg.encryption_key = key_material(&args.key, &config);

    let encrypted = cfg.encryption_key.is_some();
    let output = cfg.output_file.clone();
    info!(
        duration_secs = cfg.duration_secs,
        max_records = cfg.max_records,
        "Starting capture"
    );

    let records = capture_requests(cfg).await?;

    let summary: Vec<_> = records
        .iter()
        .map(|r| {
            json!({
                "request_id": r.request_id,
                "method": r.method,
                "url": r.url,
                "headers": r.headers.keys().collect::<Vec<_>>(),
                "resource_type": r.resource_type,
                "has_body": r.post_data.is_some(),
            })
        })
        .collect();

    print_json(&json!({
        "captured": records.len(),
        "output_file": output.display().to_string(),
        "encrypted": encrypted,
        "requests": summary,
    }))
}
