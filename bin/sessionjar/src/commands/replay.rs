use sessionjar_replay::replay_with_capture;
use std::path::PathBuf;

use super::{key_material, load_config, print_json};
use crate::KeyArgs;

pub struct ReplayArgs {
    pub recipe: Option<String>,
    pub key: KeyArgs,
    pub url: Option<String>,
    pub capture_file: Option<PathBuf>,
    pub method: Option<String>,
    pub url_contains: Option<String>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub allowed_domains: Vec<String>,
    pub denied_domains: Vec<String>,
    pub deny_paths: Vec<String>,
    pub allow_host_mismatch: bool,
    pub body: Option<String>,
    pub json_body_file: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub no_redact: bool,
}

pub async fn run(args: ReplayArgs) -> anyhow::Result<()> {
    let (paths, config) = load_config()?;
    let mut cfg = match super::recipe::load_named(&paths, args.recipe.as_deref())? {
        Some(recipe) => recipe.replay,
        None => config.replay.clone(),
    };

    if let Some(url) = args.url {
        cfg.request_url = url;
    }
    cfg.capture_file = match args.capture_file {
        Some(path) => path,
        None => paths.resolve_capture_file(&cfg.capture_file),
    };
    if let Some(method) = args.method {
        cfg.method = method;
    }
    cfg.url_contains = args.url_contains.or(cfg.url_contains);
    if let Some(timeout) = args.timeout {
        cfg.timeout_secs = timeout;
    }
    if let Some(retries) = args.retries {
        cfg.retry_attempts = retries;
    }
    if let Some(backoff) = args.backoff_ms {
        cfg.retry_backoff_ms = backoff;
    }
    cfg.allowed_domains.extend(args.allowed_domains);
    cfg.denied_domains.extend(args.denied_domains);
    cfg.deny_path_contains.extend(args.deny_paths);
    if args.allow_host_mismatch {
        cfg.enforce_capture_host = false;
    }
    cfg.body = args.body.or(cfg.body);
    cfg.json_body_file = args.json_body_file.or(cfg.json_body_file);
    cfg.output_file = args.output.or(cfg.output_file);
    if args.no_redact {
        cfg.redact_output = false;
    }
    cfg.encryption_key = key_material(&args.key, &config);

    let redact = cfg.redact_output;
    let outcome = replay_with_capture(cfg).await?;
    if redact {
        print_json(&outcome.redacted())
    } else {
        print_json(&outcome)
    }
}
