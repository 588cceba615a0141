use sessionjar_cdp::DevtoolsEndpoint;
use sessionjar_core::error::DEVTOOLS_HINT;
use sessionjar_storage::{CaptureStore, EncryptionKey, ENCRYPTED_PREFIX};

use super::{endpoint_of, key_material, load_config};
use crate::{BrowserArgs, KeyArgs};

/// Check the DevTools endpoint, capture file and key setup.
pub async fn run(browser: BrowserArgs, key: KeyArgs) -> anyhow::Result<()> {
    let (paths, config) = load_config()?;

    println!();
    println!("sessionjar doctor");
    println!("=================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Config ---
    println!("Configuration");
    if paths.config_file().exists() {
        print_ok("Config file", &paths.config_file().display().to_string());
    } else {
        print_ok("Using built-in defaults", "no config.json found");
    }
    ok_count += 1;
    println!();

    // --- 2. DevTools endpoint ---
    println!("DevTools");
    let (host, port) = endpoint_of(
        &browser,
        &config.capture.chrome_host,
        config.capture.chrome_port,
    );
    let endpoint = DevtoolsEndpoint::new(host, port);
    match endpoint.version().await {
        Ok(version) => {
            let browser_name = version
                .get("Browser")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown browser");
            print_ok(
                "Endpoint reachable",
                &format!("{} ({})", endpoint.base_url(), browser_name),
            );
            ok_count += 1;

            match endpoint.list_page_targets().await {
                Ok(pages) if !pages.is_empty() => {
                    print_ok("Page targets", &pages.len().to_string());
                    ok_count += 1;
                }
                Ok(_) => {
                    print_warn("No page targets", "Open a tab in the debugged browser");
                    warn_count += 1;
                }
                Err(e) => {
                    print_err("Target list failed", &e.to_string());
                    err_count += 1;
                }
            }
        }
        Err(e) => {
            print_err(
                &format!("Endpoint unreachable at {}", endpoint.base_url()),
                DEVTOOLS_HINT,
            );
            tracing::debug!(error = %e, "DevTools version probe failed");
            err_count += 1;
        }
    }
    println!();

    // --- 3. Storage ---
    println!("Storage");
    let capture_file = paths.resolve_capture_file(&config.capture.output_file);
    let material = key_material(&key, &config);
    let parsed_key = match material.as_deref().map(EncryptionKey::parse).transpose() {
        Ok(parsed) => parsed,
        Err(e) => {
            print_err("Encryption key invalid", &e.to_string());
            err_count += 1;
            None
        }
    };
    if parsed_key.is_some() {
        print_ok("Encryption key available", "");
        ok_count += 1;
    } else {
        print_warn(
            "No encryption key",
            &format!("Captures are stored in plain text; set {}", config.storage.key_env),
        );
        warn_count += 1;
    }

    if capture_file.exists() {
        let encrypted = std::fs::read_to_string(&capture_file)
            .map(|raw| raw.lines().any(|l| l.starts_with(ENCRYPTED_PREFIX)))
            .unwrap_or(false);
        match CaptureStore::new(&capture_file).with_key(parsed_key).load() {
            Ok(records) => {
                print_ok(
                    "Capture file readable",
                    &format!(
                        "{} ({} records{})",
                        capture_file.display(),
                        records.len(),
                        if encrypted { ", encrypted" } else { "" }
                    ),
                );
                ok_count += 1;
            }
            Err(e) => {
                print_err("Capture file unreadable", &e.to_string());
                err_count += 1;
            }
        }
    } else {
        print_warn(
            "No capture file yet",
            &format!("{} (run `sessionjar capture`)", capture_file.display()),
        );
        warn_count += 1;
    }

    println!();
    println!(
        "  {} passed  {} warnings  {} errors",
        ok_count, warn_count, err_count
    );
    println!();

    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  [ok]   {}", label);
    } else {
        println!("  [ok]   {}: {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  [warn] {}", label);
    } else {
        println!("  [warn] {}: {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  [fail] {}", label);
    } else {
        println!("  [fail] {}: {}", label, hint);
    }
}
