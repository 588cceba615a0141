use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Case-preserving header map. Insertion order is kept so stored records
/// read back the way the browser sent them.
pub type HeaderMap = IndexMap<String, String>;

/// One finalized HTTP request observed on the wire.
///
/// Immutable once emitted by the reconstruction engine. The serialized form
/// is one line of the capture store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    #[serde(default)]
    pub request_id: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default = "Utc::now")]
    pub seen_at: DateTime<Utc>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub post_data: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl CapturedRequest {
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        headers: HeaderMap,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            method: method.into(),
            url: url.into(),
            headers,
            seen_at: Utc::now(),
            resource_type: None,
            post_data: None,
        }
    }

    /// Lower-cased hostname of the captured URL, empty when it has none.
    pub fn host(&self) -> String {
        url_host(&self.url)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }
}

/// Case-insensitive header lookup.
pub fn header_get<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Insert a header, replacing any existing entry with the same name in any case.
///
/// Last write wins per header key; the name spelling of the latest write is kept.
pub fn merge_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let Some(idx) = headers.keys().position(|k| k.eq_ignore_ascii_case(name)) {
        headers.shift_remove_index(idx);
    }
    headers.insert(name.to_string(), value.to_string());
}

/// Lower-cased hostname of `url`, or an empty string if it cannot be parsed.
pub fn url_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default()
}

/// `true` when `host` equals `domain` or is one of its subdomains.
pub fn host_matches_domain(host: &str, domain: &str) -> bool {
    let host = host.trim().to_lowercase();
    let domain = domain.trim().trim_start_matches('.').to_lowercase();
    if domain.is_empty() {
        return false;
    }
    host == domain || host.ends_with(&format!(".{}", domain))
}
