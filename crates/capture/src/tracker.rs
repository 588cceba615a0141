//! Per-request reconstruction state.
//!
//! `Network.requestWillBeSent` and `Network.requestWillBeSentExtraInfo` for
//! the same request id arrive in either order, interleaved with unrelated
//! traffic. Headers from both are merged last-write-wins per header name;
//! after each event every pending state is re-checked and emitted at most once.

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use sessionjar_cdp::CdpEvent;
use sessionjar_core::types::{merge_header, url_host};
use sessionjar_core::{CaptureConfig, CapturedRequest, HeaderMap};
use std::collections::HashSet;
use tracing::trace;

pub const REQUEST_WILL_BE_SENT: &str = "Network.requestWillBeSent";
pub const REQUEST_EXTRA_INFO: &str = "Network.requestWillBeSentExtraInfo";
pub const RESPONSE_RECEIVED: &str = "Network.responseReceived";

/// Accumulated knowledge about one request id.
#[derive(Debug, Clone, Default)]
pub struct RequestState {
    pub request_id: String,
    /// `None` until the initiating event arrives.
    pub method: Option<String>,
    pub url: Option<String>,
    pub resource_type: Option<String>,
    pub headers: HeaderMap,
    pub post_data: Option<String>,
    pub has_post_data: bool,
    /// Response status, kept for diagnostics only.
    pub status: Option<u16>,
}

impl RequestState {
    fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            ..Self::default()
        }
    }

    pub fn method_or_default(&self) -> &str {
        self.method.as_deref().unwrap_or("GET")
    }

    pub fn url_or_empty(&self) -> &str {
        self.url.as_deref().unwrap_or("")
    }

    fn merge_headers(&mut self, headers: Option<&Value>) {
        let Some(Value::Object(map)) = headers else {
            return;
        };
        for (name, value) in map {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            merge_header(&mut self.headers, name, &value);
        }
    }
}

/// Emission predicates and header selection, derived from a [`CaptureConfig`].
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub target_hint: Option<String>,
    pub host_contains: Option<String>,
    pub path_contains: Option<String>,
    pub method: Option<String>,
    pub resource_type: Option<String>,
    /// Lower-cased header names.
    pub header_allowlist: HashSet<String>,
    pub include_all_headers: bool,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl RequestFilter {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            target_hint: non_empty(&config.target_hint).map(|h| h.to_lowercase()),
            host_contains: non_empty(&config.filter_host_contains).map(|h| h.to_lowercase()),
            path_contains: non_empty(&config.filter_path_contains),
            method: non_empty(&config.filter_method),
            resource_type: non_empty(&config.filter_resource_type),
            header_allowlist: config
                .header_allowlist
                .iter()
                .map(|h| h.trim().to_lowercase())
                .collect(),
            include_all_headers: config.include_all_headers,
        }
    }

    /// All active predicates hold.
    ///
    /// A state whose initiating event never arrived is judged with method
    /// `GET` and an empty URL, so it fails every URL-based predicate.
    pub fn matches(&self, state: &RequestState) -> bool {
        let url = state.url_or_empty();

        if let Some(hint) = &self.target_hint {
            if !url.to_lowercase().contains(hint) {
                return false;
            }
        }
        if let Some(fragment) = &self.host_contains {
            if !url_host(url).contains(fragment.as_str()) {
                return false;
            }
        }
        if let Some(fragment) = &self.path_contains {
            let path = url::Url::parse(url)
                .map(|u| u.path().to_string())
                .unwrap_or_default();
            if !path.contains(fragment.as_str()) {
                return false;
            }
        }
        if let Some(method) = &self.method {
            if !state.method_or_default().eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if let Some(kind) = &self.resource_type {
            match &state.resource_type {
                Some(actual) if actual.eq_ignore_ascii_case(kind) => {}
                _ => return false,
            }
        }
        true
    }

    /// Headers kept for emission: all of them, or only allowlisted names.
    pub fn select_headers(&self, headers: &HeaderMap) -> HeaderMap {
        if self.include_all_headers {
            return headers.clone();
        }
        headers
            .iter()
            .filter(|(name, _)| self.header_allowlist.contains(&name.to_lowercase()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Owns every [`RequestState`] of one capture run.
#[derive(Debug)]
pub struct RequestTracker {
    filter: RequestFilter,
    states: IndexMap<String, RequestState>,
    emitted: HashSet<String>,
}

impl RequestTracker {
    pub fn new(filter: RequestFilter) -> Self {
        Self {
            filter,
            states: IndexMap::new(),
            emitted: HashSet::new(),
        }
    }

    pub fn state(&self, request_id: &str) -> Option<&RequestState> {
        self.states.get(request_id)
    }

    pub fn is_emitted(&self, request_id: &str) -> bool {
        self.emitted.contains(request_id)
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Merge one event into state. Returns `false` for events that carry no
    /// request information.
    pub fn apply(&mut self, event: &CdpEvent) -> bool {
        let params = &event.params;
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return false;
        };

        match event.method.as_str() {
            REQUEST_WILL_BE_SENT => {
                let request = params.get("request").cloned().unwrap_or(Value::Null);
                let state = self
                    .states
                    .entry(request_id.to_string())
                    .or_insert_with(|| RequestState::new(request_id));
                state.method = Some(
                    request
                        .get("method")
                        .and_then(Value::as_str)
                        .unwrap_or("GET")
                        .to_string(),
                );
                state.url = Some(
                    request
                        .get("url")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                );
                state.resource_type = params
                    .get("type")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(body) = request.get("postData").and_then(Value::as_str) {
                    state.post_data = Some(body.to_string());
                }
                state.has_post_data = request
                    .get("hasPostData")
                    .and_then(Value::as_bool)
                    .unwrap_or(state.post_data.is_some());
                state.merge_headers(request.get("headers"));
                true
            }
            REQUEST_EXTRA_INFO => {
                let state = self
                    .states
                    .entry(request_id.to_string())
                    .or_insert_with(|| RequestState::new(request_id));
                state.merge_headers(params.get("headers"));
                true
            }
            RESPONSE_RECEIVED => {
                let Some(state) = self.states.get_mut(request_id) else {
                    return false;
                };
                state.status = params
                    .get("response")
                    .and_then(|r| r.get("status"))
                    .and_then(Value::as_f64)
                    .map(|s| s as u16);
                true
            }
            _ => false,
        }
    }

    /// Emit every ready, not-yet-emitted state in first-seen order, at most
    /// `limit` of them. Emitted ids are never returned again.
    ///
    /// Returned records carry the inline body, untruncated; body policy is
    /// applied by the caller.
    pub fn take_ready(&mut self, limit: usize) -> Vec<CapturedRequest> {
        let mut ready = Vec::new();
        for (request_id, state) in &self.states {
            if ready.len() >= limit {
                break;
            }
            if self.emitted.contains(request_id) || state.headers.is_empty() {
                continue;
            }
            let headers = self.filter.select_headers(&state.headers);
            if headers.is_empty() || !self.filter.matches(state) {
                continue;
            }
            trace!(
                request_id = %request_id,
                url = state.url_or_empty(),
                status = ?state.status,
                "Request ready"
            );
            ready.push(CapturedRequest {
                request_id: request_id.clone(),
                method: state.method_or_default().to_string(),
                url: state.url_or_empty().to_string(),
                headers,
                seen_at: Utc::now(),
                resource_type: state.resource_type.clone(),
                post_data: state.post_data.clone(),
            });
        }
        for record in &ready {
            self.emitted.insert(record.request_id.clone());
        }
        ready
    }
}

/// Truncate to at most `max_bytes`, backing off to a char boundary.
pub fn truncate_utf8(body: &str, max_bytes: usize) -> String {
    if body.len() <= max_bytes {
        return body.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
