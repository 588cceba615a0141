use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// Header names kept when `include_all_headers` is off.
pub const DEFAULT_HEADER_ALLOWLIST: &[&str] =
    &["cookie", "authorization", "x-csrf-token", "x-xsrf-token"];

pub const DEFAULT_KEY_ENV: &str = "SESSIONJAR_ENCRYPTION_KEY";

/// Longest accepted capture window (one day).
pub const MAX_DURATION_SECS: u64 = 24 * 60 * 60;

/// Longest accepted page-load wait.
pub const MAX_LOAD_TIMEOUT_SECS: f64 = 600.0;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9222
}

fn default_duration_secs() -> u64 {
    30
}

fn default_max_records() -> usize {
    100
}

fn default_read_timeout_ms() -> u64 {
    250
}

fn default_capture_output() -> PathBuf {
    PathBuf::from("captures.jsonl")
}

fn default_header_allowlist() -> Vec<String> {
    DEFAULT_HEADER_ALLOWLIST.iter().map(|h| h.to_string()).collect()
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_load_timeout_secs() -> f64 {
    30.0
}

/// Load wait clamped to `0..=MAX_LOAD_TIMEOUT_SECS`; NaN reads as the maximum.
fn load_timeout_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.min(MAX_LOAD_TIMEOUT_SECS)).unwrap_or(Duration::ZERO)
}

fn validate_load_timeout(secs: f64) -> Result<()> {
    if !secs.is_finite() || !(0.0..=MAX_LOAD_TIMEOUT_SECS).contains(&secs) {
        return Err(Error::Validation(format!(
            "loadTimeoutSecs must be between 0 and {} (got {})",
            MAX_LOAD_TIMEOUT_SECS, secs
        )));
    }
    Ok(())
}

/// How the capture run drives traffic on a tab once the listener is attached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTrigger {
    /// Explicit tab to drive. When absent, tabs are matched against the
    /// target hint, falling back to the first tab.
    #[serde(default)]
    pub target_id: Option<String>,
    /// Navigate to this URL instead of reloading.
    #[serde(default)]
    pub navigate_url: Option<String>,
    #[serde(default)]
    pub ignore_cache: bool,
}

/// Parameters of one capture run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    #[serde(default = "default_host")]
    pub chrome_host: String,
    #[serde(default = "default_port")]
    pub chrome_port: u16,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Per-read wait on the event stream. Kept sub-second so the deadline
    /// and record cap stay responsive.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Picks the tab to attach to and filters request URLs (case-insensitive substring).
    #[serde(default)]
    pub target_hint: Option<String>,
    #[serde(default = "default_capture_output")]
    pub output_file: PathBuf,
    #[serde(default = "default_header_allowlist")]
    pub header_allowlist: Vec<String>,
    #[serde(default)]
    pub include_all_headers: bool,
    #[serde(default)]
    pub filter_host_contains: Option<String>,
    #[serde(default)]
    pub filter_path_contains: Option<String>,
    #[serde(default)]
    pub filter_method: Option<String>,
    #[serde(default)]
    pub filter_resource_type: Option<String>,
    #[serde(default)]
    pub refresh: Option<RefreshTrigger>,
    #[serde(default)]
    pub capture_body: bool,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chrome_host: default_host(),
            chrome_port: default_port(),
            duration_secs: default_duration_secs(),
            max_records: default_max_records(),
            read_timeout_ms: default_read_timeout_ms(),
            target_hint: None,
            output_file: default_capture_output(),
            header_allowlist: default_header_allowlist(),
            include_all_headers: false,
            filter_host_contains: None,
            filter_path_contains: None,
            filter_method: None,
            filter_resource_type: None,
            refresh: None,
            capture_body: false,
            max_body_bytes: default_max_body_bytes(),
            load_timeout_secs: default_load_timeout_secs(),
            encryption_key: None,
        }
    }
}

impl CaptureConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs.min(MAX_DURATION_SECS))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn load_timeout(&self) -> Duration {
        load_timeout_from_secs(self.load_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.duration_secs > MAX_DURATION_SECS {
            return Err(Error::Validation(format!(
                "durationSecs must be at most {} (got {})",
                MAX_DURATION_SECS, self.duration_secs
            )));
        }
        validate_load_timeout(self.load_timeout_secs)?;
        if self.max_records == 0 {
            return Err(Error::Validation("maxRecords must be at least 1".into()));
        }
        if self.read_timeout_ms >= 1000 {
            return Err(Error::Validation(format!(
                "readTimeoutMs must be below 1000 (got {})",
                self.read_timeout_ms
            )));
        }
        if !self.include_all_headers && self.header_allowlist.is_empty() {
            return Err(Error::Validation(
                "headerAllowlist is empty; pass at least one header or enable includeAllHeaders"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Parameters of one replay call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayConfig {
    #[serde(default = "default_capture_output")]
    pub capture_file: PathBuf,
    #[serde(default)]
    pub request_url: String,
    #[serde(default = "default_replay_method")]
    pub method: String,
    #[serde(default)]
    pub url_contains: Option<String>,
    #[serde(default = "default_replay_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub denied_domains: Vec<String>,
    #[serde(default)]
    pub deny_path_contains: Vec<String>,
    /// Require the replay host to equal the captured record's host.
    #[serde(default = "default_true")]
    pub enforce_capture_host: bool,
    #[serde(default)]
    pub body: Option<String>,
    /// JSON payload file; wins over `body` when both are set.
    #[serde(default)]
    pub json_body_file: Option<PathBuf>,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub redact_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

fn default_replay_method() -> String {
    "GET".to_string()
}

fn default_replay_timeout_secs() -> u64 {
    20
}

fn default_retry_attempts() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capture_file: default_capture_output(),
            request_url: String::new(),
            method: default_replay_method(),
            url_contains: None,
            timeout_secs: default_replay_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            allowed_domains: Vec::new(),
            denied_domains: Vec::new(),
            deny_path_contains: Vec::new(),
            enforce_capture_host: true,
            body: None,
            json_body_file: None,
            output_file: None,
            redact_output: true,
            encryption_key: None,
        }
    }
}

impl ReplayConfig {
    pub fn new(capture_file: impl Into<PathBuf>, request_url: impl Into<String>) -> Self {
        Self {
            capture_file: capture_file.into(),
            request_url: request_url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Attempts actually made; never below one.
    pub fn attempts(&self) -> u32 {
        self.retry_attempts.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.request_url.starts_with("http://") && !self.request_url.starts_with("https://") {
            return Err(Error::Validation(format!(
                "request URL must start with http:// or https:// (got '{}')",
                self.request_url
            )));
        }
        if self.method.trim().is_empty() {
            return Err(Error::Validation("method must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabControllerConfig {
    #[serde(default = "default_host")]
    pub chrome_host: String,
    #[serde(default = "default_port")]
    pub chrome_port: u16,
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: f64,
    #[serde(default)]
    pub ignore_cache: bool,
}

impl Default for TabControllerConfig {
    fn default() -> Self {
        Self {
            chrome_host: default_host(),
            chrome_port: default_port(),
            load_timeout_secs: default_load_timeout_secs(),
            ignore_cache: false,
        }
    }
}

impl TabControllerConfig {
    pub fn load_timeout(&self) -> Duration {
        load_timeout_from_secs(self.load_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        validate_load_timeout(self.load_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Environment variable consulted when no explicit key is given.
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

fn default_key_env() -> String {
    DEFAULT_KEY_ENV.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_env: default_key_env(),
        }
    }
}

/// Contents of `~/.sessionjar/config.json`. Every section is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub tabs: TabControllerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Explicit key first, then the configured environment variable.
    pub fn resolve_key(&self, explicit: Option<&str>) -> Option<String> {
        resolve_key(explicit, &self.storage.key_env)
    }
}

/// Explicit key first, then `env_var`. Blank values count as absent.
pub fn resolve_key(explicit: Option<&str>, env_var: &str) -> Option<String> {
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Some(key.to_string());
    }
    std::env::var(env_var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{
  "capture": { "chromePort": 9333, "targetHint": "github.com" },
  "replay": { "retryAttempts": 3 }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.capture.chrome_port, 9333);
        assert_eq!(cfg.capture.chrome_host, "127.0.0.1");
        assert_eq!(cfg.capture.target_hint.as_deref(), Some("github.com"));
        assert_eq!(cfg.capture.header_allowlist.len(), 4);
        assert_eq!(cfg.replay.retry_attempts, 3);
        assert!(cfg.replay.enforce_capture_host);
        assert_eq!(cfg.storage.key_env, DEFAULT_KEY_ENV);
    }

    #[test]
    fn test_capture_validate() {
        let mut cfg = CaptureConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.read_timeout_ms = 1500;
        assert!(cfg.validate().is_err());
        cfg.read_timeout_ms = 200;
        cfg.max_records = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        let mut cfg = CaptureConfig {
            duration_secs: u64::MAX,
            ..CaptureConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Validation(_))));
        assert_eq!(cfg.duration(), Duration::from_secs(MAX_DURATION_SECS));

        cfg.duration_secs = 30;
        cfg.load_timeout_secs = 1e30;
        assert!(matches!(cfg.validate(), Err(Error::Validation(_))));
        cfg.load_timeout_secs = -1.0;
        assert!(cfg.validate().is_err());
        cfg.load_timeout_secs = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_timeout_never_panics() {
        let mut tabs = TabControllerConfig {
            load_timeout_secs: 1e30,
            ..TabControllerConfig::default()
        };
        assert!(tabs.validate().is_err());
        assert_eq!(
            tabs.load_timeout(),
            Duration::from_secs_f64(MAX_LOAD_TIMEOUT_SECS)
        );
        tabs.load_timeout_secs = f64::NAN;
        assert_eq!(
            tabs.load_timeout(),
            Duration::from_secs_f64(MAX_LOAD_TIMEOUT_SECS)
        );
        tabs.load_timeout_secs = -3.0;
        assert_eq!(tabs.load_timeout(), Duration::ZERO);
        tabs.load_timeout_secs = 2.5;
        assert!(tabs.validate().is_ok());
        assert_eq!(tabs.load_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_replay_validate_and_attempts() {
        let mut cfg = ReplayConfig::new("caps.jsonl", "ftp://nope");
        assert!(cfg.validate().is_err());
        cfg.request_url = "https://github.com/api".into();
        assert!(cfg.validate().is_ok());
        cfg.retry_attempts = 0;
        assert_eq!(cfg.attempts(), 1);
    }

    #[test]
    fn test_resolve_key_prefers_explicit() {
        assert_eq!(
            resolve_key(Some("  abc  "), "SESSIONJAR_TEST_UNSET_VAR"),
            Some("abc".to_string())
        );
        assert_eq!(resolve_key(Some("   "), "SESSIONJAR_TEST_UNSET_VAR"), None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let mut cfg = Config::default();
        cfg.tabs.load_timeout_secs = 5.0;
        cfg.save(&paths.config_file()).unwrap();
        let loaded = Config::load_or_default(&paths).unwrap();
        assert_eq!(loaded.tabs.load_timeout_secs, 5.0);
    }
}
