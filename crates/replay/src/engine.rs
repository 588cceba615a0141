use reqwest::header::{HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::{json, Value};
use sessionjar_core::{Error, HeaderMap, ReplayConfig, Result};
use sessionjar_storage::{CaptureStore, EncryptionKey};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::policy::ReplayPolicy;
use crate::redact::redact_headers;
use crate::select::{sanitize_headers, select_capture};

const PREVIEW_CHARS: usize = 400;

/// Request payload, in precedence order: JSON file, then literal body.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayBody {
    Json(Value),
    Raw(String),
}

impl ReplayBody {
    pub fn from_config(config: &ReplayConfig) -> Result<Option<Self>> {
        if let Some(path) = &config.json_body_file {
            let raw = std::fs::read_to_string(path)?;
            let value: Value = serde_json::from_str(&raw)?;
            return Ok(Some(Self::Json(value)));
        }
        Ok(config.body.clone().map(Self::Raw))
    }
}

/// Result of one replay call.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub request_url: String,
    pub method: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body_preview: String,
    pub attempts: u32,
    pub sent_headers: HeaderMap,
    pub response_headers: HeaderMap,
    #[serde(skip)]
    pub body: String,
}

impl ReplayOutcome {
    /// Copy with sensitive header values masked.
    pub fn redacted(&self) -> Self {
        Self {
            sent_headers: redact_headers(&self.sent_headers),
            response_headers: redact_headers(&self.response_headers),
            ..self.clone()
        }
    }

    /// The dump written to the output file.
    pub fn to_output(&self, redact: bool) -> Value {
        let view = if redact { self.redacted() } else { self.clone() };
        json!({
            "status_code": view.status,
            "request_headers": view.sent_headers,
            "response_headers": view.response_headers,
            "body": view.body,
        })
    }
}

fn preview(body: &str) -> String {
    body.chars().take(PREVIEW_CHARS).collect()
}

fn map_send_error(e: reqwest::Error, timeout_secs: u64) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("Replay timed out after {} seconds", timeout_secs))
    } else if e.is_connect() {
        Error::Connection(format!("Replay connection failed: {}", e))
    } else {
        Error::Http(format!("Replay request failed: {}", e))
    }
}

/// Header set accepted by the HTTP client, plus the entries actually kept.
///
/// Chrome joins repeated headers with `\n`; each line goes out as its own value.
fn build_headers(headers: &HeaderMap) -> (reqwest::header::HeaderMap, HeaderMap) {
    let mut wire = reqwest::header::HeaderMap::new();
    let mut sent = HeaderMap::new();
    for (name, value) in headers {
        // HTTP/2 pseudo-headers such as `:authority` fail here.
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!(header = %name, "Skipping header the HTTP client rejects");
            continue;
        };
        let values: Option<Vec<HeaderValue>> = value
            .split('\n')
            .map(|part| HeaderValue::from_str(part).ok())
            .collect();
        match values {
            Some(values) => {
                for header_value in values {
                    wire.append(header_name.clone(), header_value);
                }
                sent.insert(name.clone(), value.clone());
            }
            None => debug!(header = %name, "Skipping header value the HTTP client rejects"),
        }
    }
    (wire, sent)
}

fn write_output(path: &Path, payload: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// Replay the most recent matching capture against `config.request_url`.
///
/// Selection and every policy gate run before any network call.
pub async fn replay_with_capture(config: ReplayConfig) -> Result<ReplayOutcome> {
    config.validate()?;
    let key = config
        .encryption_key
        .as_deref()
        .map(EncryptionKey::parse)
        .transpose()?;

    let records = CaptureStore::new(config.capture_file.clone())
        .with_key(key)
        .load()?;
    let selected = select_capture(&records, config.url_contains.as_deref(), &config.method)?;
    debug!(
        request_id = %selected.request_id,
        url = %selected.url,
        "Selected capture for replay"
    );

    ReplayPolicy::from_config(&config).check(&config.request_url, &selected.url)?;

    let (wire_headers, sent_headers) = build_headers(&sanitize_headers(&selected.headers));
    let body = ReplayBody::from_config(&config)?;
    let method = reqwest::Method::from_bytes(config.method.to_uppercase().as_bytes())
        .map_err(|e| Error::Validation(format!("invalid method '{}': {}", config.method, e)))?;

    let client = reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

    let max_attempts = config.attempts();
    let mut attempt = 0;
    let response = loop {
        attempt += 1;
        let last = attempt >= max_attempts;

        let mut request = client
            .request(method.clone(), &config.request_url)
            .headers(wire_headers.clone());
        request = match &body {
            Some(ReplayBody::Json(value)) => request.json(value),
            Some(ReplayBody::Raw(raw)) => request.body(raw.clone()),
            None => request,
        };

        match request.send().await {
            Ok(resp) if resp.status().as_u16() < 500 || last => break resp,
            Ok(resp) => {
                warn!(attempt, status = resp.status().as_u16(), "Server error, retrying replay");
            }
            Err(e) if last => return Err(map_send_error(e, config.timeout_secs)),
            Err(e) => {
                warn!(attempt, error = %e, "Replay request failed, retrying");
            }
        }
        tokio::time::sleep(config.backoff()).await;
    };

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response_headers = HeaderMap::new();
    for (name, value) in response.headers() {
        let Ok(value) = value.to_str() else { continue };
        match response_headers.get_mut(name.as_str()) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                response_headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
    }

    let body_text = response
        .text()
        .await
        .map_err(|e| Error::Http(format!("Failed to read response body: {}", e)))?;

    let outcome = ReplayOutcome {
        request_url: config.request_url.clone(),
        method: method.to_string(),
        status,
        content_type,
        body_preview: preview(&body_text),
        attempts: attempt,
        sent_headers,
        response_headers,
        body: body_text,
    };

    if let Some(path) = &config.output_file {
        write_output(path, &outcome.to_output(config.redact_output))?;
        info!(path = %path.display(), "Replay output written");
    }

    info!(
        url = %outcome.request_url,
        status = outcome.status,
        attempts = outcome.attempts,
        "Replay finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionjar_core::CapturedRequest;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(url: &str, headers: &[(&str, &str)]) -> CapturedRequest {
        let headers: HeaderMap = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CapturedRequest::new("r", "GET", url, headers)
    }

    fn write_captures(dir: &TempDir, records: &[CapturedRequest]) -> PathBuf {
        let path = dir.path().join("captures.jsonl");
        CaptureStore::new(&path).append(records).unwrap();
        path
    }

    fn config_for(capture_file: PathBuf, url: String) -> ReplayConfig {
        ReplayConfig {
            retry_backoff_ms: 10,
            ..ReplayConfig::new(capture_file, url)
        }
    }

    #[test]
    fn test_build_headers_splits_multi_value_lines() {
        let mut headers = HeaderMap::new();
        headers.insert(":authority".to_string(), "a.io".to_string());
        headers.insert("Accept-Language".to_string(), "fr\nen;q=0.8".to_string());
        headers.insert("Cookie".to_string(), "sid=abc".to_string());
        headers.insert("X-Bad".to_string(), "ok\r\u{0}".to_string());

        let (wire, sent) = build_headers(&headers);
        let langs: Vec<_> = wire
            .get_all("accept-language")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(langs, vec!["fr", "en;q=0.8"]);
        assert_eq!(wire.get("cookie").unwrap(), "sid=abc");
        assert!(wire.get("x-bad").is_none());
        assert_eq!(
            sent.keys().collect::<Vec<_>>(),
            vec!["Accept-Language", "Cookie"]
        );
    }

    #[tokio::test]
    async fn test_replays_most_recent_capture_sanitized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/user"))
            .and(header("cookie", "c=3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"login\":\"me\"}"))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/api/user", server.uri());
        let dir = TempDir::new().unwrap();
        let file = write_captures(
            &dir,
            &[
                record(&url, &[("Cookie", "c=1")]),
                record(&url, &[("Cookie", "c=2")]),
                record(
                    &url,
                    &[
                        ("Cookie", "c=3"),
                        ("Host", "stale.example"),
                        ("CONTENT-LENGTH", "99"),
                        ("connection", "close"),
                        (":authority", "stale.example"),
                    ],
                ),
            ],
        );

        let outcome = replay_with_capture(config_for(file, url)).await.unwrap();
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.body_preview, "{\"login\":\"me\"}");
        assert_eq!(outcome.sent_headers.len(), 1);
        assert_eq!(outcome.sent_headers["Cookie"], "c=3");
    }

    #[tokio::test]
    async fn test_host_binding_blocks_before_network() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let file = write_captures(
            &dir,
            &[record("https://github.com/api", &[("Cookie", "s=1")])],
        );
        let url = format!("{}/api", server.uri());

        let err = replay_with_capture(config_for(file.clone(), url.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Policy(_)));
        assert!(server.received_requests().await.unwrap().is_empty());

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        let mut relaxed = config_for(file, url);
        relaxed.enforce_capture_host = false;
        let outcome = replay_with_capture(relaxed).await.unwrap();
        assert_eq!(outcome.status, 204);
    }

    #[tokio::test]
    async fn test_allowlist_blocks_unlisted_host() {
        let server = MockServer::start().await;
        let url = format!("{}/x", server.uri());
        let dir = TempDir::new().unwrap();
        let file = write_captures(&dir, &[record(&url, &[("Cookie", "s=1")])]);

        let mut config = config_for(file, url);
        config.allowed_domains = vec!["github.com".into()];
        let err = replay_with_capture(config).await.unwrap_err();
        assert!(matches!(err, Error::Policy(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let url = format!("{}/data", server.uri());
        let dir = TempDir::new().unwrap();
        let file = write_captures(&dir, &[record(&url, &[("Cookie", "s=1")])]);
        let mut config = config_for(file, url);
        config.retry_attempts = 2;

        let outcome = replay_with_capture(config).await.unwrap();
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_final_server_error_returned_as_is() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .expect(2)
            .mount(&server)
            .await;

        let url = format!("{}/data", server.uri());
        let dir = TempDir::new().unwrap();
        let file = write_captures(&dir, &[record(&url, &[("Cookie", "s=1")])]);
        let mut config = config_for(file, url);
        config.retry_attempts = 2;

        let outcome = replay_with_capture(config).await.unwrap();
        assert_eq!(outcome.status, 503);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.body, "down");
    }

    #[tokio::test]
    async fn test_network_error_on_final_attempt_propagates() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/gone", listener.local_addr().unwrap());
        drop(listener);

        let dir = TempDir::new().unwrap();
        let file = write_captures(&dir, &[record(&url, &[("Cookie", "s=1")])]);
        let mut config = config_for(file, url);
        config.retry_attempts = 2;

        let err = replay_with_capture(config).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_json_body_file_wins_and_output_redacted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({"query": "viewer"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "fresh=1")
                    .set_body_string("ok"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/graphql", server.uri());
        let dir = TempDir::new().unwrap();
        let mut post = record(&url, &[("Cookie", "s=1"), ("Accept", "*/*")]);
        post.method = "POST".into();
        let file = write_captures(&dir, &[post]);

        let body_file = dir.path().join("body.json");
        std::fs::write(&body_file, r#"{"query":"viewer"}"#).unwrap();
        let output = dir.path().join("out/replay.json");

        let mut config = config_for(file, url);
        config.method = "post".into();
        config.body = Some("raw body".into());
        config.json_body_file = Some(body_file);
        config.output_file = Some(output.clone());

        let outcome = replay_with_capture(config).await.unwrap();
        assert_eq!(outcome.status, 200);

        let dump: Value = serde_json::from_str(&std::fs::read_to_string(output).unwrap()).unwrap();
        assert_eq!(dump["status_code"], 200);
        assert_eq!(dump["request_headers"]["Cookie"], "***REDACTED***");
        assert_eq!(dump["request_headers"]["Accept"], "*/*");
        assert_eq!(dump["response_headers"]["set-cookie"], "***REDACTED***");
        assert_eq!(dump["body"], "ok");
    }

    #[tokio::test]
    async fn test_no_match_fails_before_network() {
        let server = MockServer::start().await;
        let url = format!("{}/x", server.uri());
        let dir = TempDir::new().unwrap();
        let file = write_captures(&dir, &[record(&url, &[("Cookie", "s=1")])]);

        let mut config = config_for(file, url);
        config.url_contains = Some("nothing-like-this".into());
        let err = replay_with_capture(config).await.unwrap_err();
        assert!(matches!(err, Error::NoMatch(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
