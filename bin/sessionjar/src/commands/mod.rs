pub mod capture;
pub mod doctor;
pub mod keygen;
pub mod recipe;
pub mod replay;
pub mod tabs;
pub mod targets;
pub mod tokens;

use sessionjar_core::config::resolve_key;
use sessionjar_core::{Config, Paths};

use crate::{BrowserArgs, KeyArgs};

/// Paths plus the config file, or defaults when it does not exist.
pub fn load_config() -> anyhow::Result<(Paths, Config)> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    Ok((paths, config))
}

/// `--encryption-key`, else the named (or configured) environment variable.
pub fn key_material(key: &KeyArgs, config: &Config) -> Option<String> {
    let env_var = key
        .encryption_key_env
        .as_deref()
        .unwrap_or(&config.storage.key_env);
    resolve_key(key.encryption_key.as_deref(), env_var)
}

pub fn endpoint_of(browser: &BrowserArgs, default_host: &str, default_port: u16) -> (String, u16) {
    (
        browser
            .host
            .clone()
            .unwrap_or_else(|| default_host.to_string()),
        browser.port.unwrap_or(default_port),
    )
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
