use sessionjar_core::types::{host_matches_domain, url_host};
use sessionjar_core::{Error, ReplayConfig, Result};

/// Destination checks run before any replay request leaves the process.
#[derive(Debug, Clone, Default)]
pub struct ReplayPolicy {
    pub allowed_domains: Vec<String>,
    pub denied_domains: Vec<String>,
    pub deny_path_contains: Vec<String>,
    /// Replay host must equal the captured record's host.
    pub enforce_capture_host: bool,
}

fn cleaned(list: &[String]) -> Vec<String> {
    list.iter()
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

impl ReplayPolicy {
    pub fn from_config(config: &ReplayConfig) -> Self {
        Self {
            allowed_domains: cleaned(&config.allowed_domains),
            denied_domains: cleaned(&config.denied_domains),
            deny_path_contains: cleaned(&config.deny_path_contains),
            enforce_capture_host: config.enforce_capture_host,
        }
    }

    /// Check `target_url` against every active rule. `captured_url` is the
    /// URL of the record whose headers are about to be sent.
    pub fn check(&self, target_url: &str, captured_url: &str) -> Result<()> {
        let host = url_host(target_url);

        if self
            .denied_domains
            .iter()
            .any(|d| host_matches_domain(&host, d))
        {
            return Err(Error::Policy(format!("domain '{}' is denied by policy", host)));
        }

        if !self.allowed_domains.is_empty()
            && !self
                .allowed_domains
                .iter()
                .any(|d| host_matches_domain(&host, d))
        {
            return Err(Error::Policy(format!(
                "host '{}' is not in the allowed domains; add it with --allowed-domain",
                host
            )));
        }

        let path = url::Url::parse(target_url)
            .map(|u| u.path().to_lowercase())
            .unwrap_or_default();
        if let Some(token) = self
            .deny_path_contains
            .iter()
            .find(|t| path.contains(t.as_str()))
        {
            return Err(Error::Policy(format!(
                "path contains denied token '{}'",
                token
            )));
        }

        if self.enforce_capture_host {
            let captured_host = url_host(captured_url);
            if host != captured_host {
                return Err(Error::Policy(format!(
                    "replay host '{}' does not match captured host '{}'; pass --allow-host-mismatch to override",
                    host, captured_host
                )));
            }
        }

        Ok(())
    }
}
