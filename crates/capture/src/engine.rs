use serde_json::json;
use sessionjar_cdp::{CdpClient, DevtoolsEndpoint, EventSource, TabController, TabDriver};
use sessionjar_core::{
    CaptureConfig, CapturedRequest, RefreshTrigger, Result, TabControllerConfig,
};
use sessionjar_storage::{CaptureStore, EncryptionKey};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::tracker::{truncate_utf8, RequestFilter, RequestTracker};

/// One capture run over an event source.
///
/// Records emitted so far stay available through [`CaptureRun::records`]
/// even when [`CaptureRun::run`] fails part-way.
pub struct CaptureRun {
    config: CaptureConfig,
    tracker: RequestTracker,
    records: Vec<CapturedRequest>,
}

impl CaptureRun {
    pub fn new(config: CaptureConfig) -> Self {
        let tracker = RequestTracker::new(RequestFilter::from_config(&config));
        Self {
            config,
            tracker,
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[CapturedRequest] {
        &self.records
    }

    pub fn into_records(self) -> Vec<CapturedRequest> {
        self.records
    }

    /// Enable the network domain, fire the refresh trigger if configured,
    /// then consume events until the deadline or the record cap.
    pub async fn run<S>(&mut self, source: &mut S, tabs: Option<&mut dyn TabDriver>) -> Result<()>
    where
        S: EventSource + ?Sized,
    {
        self.config.validate()?;

        // Listener first: requests fired by the trigger must not race ahead of it.
        source.send_command("Network.enable", json!({})).await?;
        let deadline = Instant::now() + self.config.duration();

        if let (Some(trigger), Some(tabs)) = (self.config.refresh.clone(), tabs) {
            self.fire_trigger(tabs, &trigger).await?;
        }

        let read_timeout = self.config.read_timeout();
        while self.records.len() < self.config.max_records {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = read_timeout.min(deadline - now);
            let Some(event) = source.read_event(wait).await? else {
                continue;
            };
            if self.tracker.apply(&event) {
                self.emit_ready(source).await;
            }
        }

        info!(
            records = self.records.len(),
            tracked = self.tracker.tracked(),
            "Capture finished"
        );
        Ok(())
    }

    async fn emit_ready<S>(&mut self, source: &mut S)
    where
        S: EventSource + ?Sized,
    {
        let remaining = self.config.max_records.saturating_sub(self.records.len());
        for mut record in self.tracker.take_ready(remaining) {
            record.post_data = if self.config.capture_body {
                self.resolve_body(source, &record).await
            } else {
                None
            };
            debug!(
                request_id = %record.request_id,
                method = %record.method,
                url = %record.url,
                "Captured request"
            );
            self.records.push(record);
        }
    }

    async fn resolve_body<S>(&self, source: &mut S, record: &CapturedRequest) -> Option<String>
    where
        S: EventSource + ?Sized,
    {
        let body = match &record.post_data {
            Some(inline) => Some(inline.clone()),
            None => {
                let has_body = self
                    .tracker
                    .state(&record.request_id)
                    .map(|s| s.has_post_data)
                    .unwrap_or(false);
                if !has_body {
                    return None;
                }
                match source
                    .send_command(
                        "Network.getRequestPostData",
                        json!({ "requestId": record.request_id }),
                    )
                    .await
                {
                    Ok(result) => result
                        .get("postData")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    Err(e) => {
                        debug!(request_id = %record.request_id, error = %e, "Body fetch failed");
                        None
                    }
                }
            }
        };
        body.map(|b| truncate_utf8(&b, self.config.max_body_bytes))
    }

    async fn fire_trigger(&self, tabs: &mut dyn TabDriver, trigger: &RefreshTrigger) -> Result<()> {
        let target_id = match &trigger.target_id {
            Some(id) => id.clone(),
            None => {
                let listed = tabs.list_tabs().await?;
                let hint = self.config.target_hint.as_deref().map(str::to_lowercase);
                let by_hint = hint.as_deref().and_then(|h| {
                    listed.iter().find(|t| {
                        t.url.to_lowercase().contains(h) || t.title.to_lowercase().contains(h)
                    })
                });
                match by_hint.or_else(|| listed.first()) {
                    Some(tab) => tab.target_id.clone(),
                    None => {
                        warn!("No tab available for the refresh trigger");
                        return Ok(());
                    }
                }
            }
        };

        let loaded = match &trigger.navigate_url {
            Some(url) => tabs.navigate(&target_id, url).await?,
            None => tabs.refresh(&target_id, Some(trigger.ignore_cache)).await?,
        };
        if !loaded {
            warn!(target_id = %target_id, "Load event not observed before timeout");
        }
        Ok(())
    }
}

/// Attach to the hinted tab, capture, close the connection, and append
/// whatever was emitted to the configured capture file.
///
/// Records emitted before a mid-run failure are still written before the
/// error is returned.
pub async fn capture_requests(config: CaptureConfig) -> Result<Vec<CapturedRequest>> {
    config.validate()?;
    let key = config
        .encryption_key
        .as_deref()
        .map(EncryptionKey::parse)
        .transpose()?;

    let endpoint = DevtoolsEndpoint::new(config.chrome_host.clone(), config.chrome_port);
    let ws_url = endpoint
        .websocket_debug_url(config.target_hint.as_deref())
        .await?;
    info!(ws_url = %ws_url, "Attaching capture listener");

    let mut client = CdpClient::connect(&ws_url).await?;
    let mut tabs = config.refresh.as_ref().map(|_| {
        TabController::new(TabControllerConfig {
            chrome_host: config.chrome_host.clone(),
            chrome_port: config.chrome_port,
            load_timeout_secs: config.load_timeout_secs,
            ignore_cache: false,
        })
    });

    let store = CaptureStore::new(config.output_file.clone()).with_key(key);
    let mut run = CaptureRun::new(config);
    let outcome = run
        .run(
            &mut client,
            tabs.as_mut().map(|t| t as &mut dyn TabDriver),
        )
        .await;

    if client.is_closed() {
        debug!("Connection already gone; skipping Network.disable");
    } else if let Err(e) = client.disable_network().await {
        debug!(error = %e, "Network.disable failed");
    }
    client.close().await;
    if let Some(tabs) = tabs.as_mut() {
        tabs.close().await;
    }

    let records = run.into_records();
    if !records.is_empty() {
        store.append(&records)?;
        info!(
            count = records.len(),
            path = %store.path().display(),
            encrypted = store.is_encrypting(),
            "Captures saved"
        );
    }

    match outcome {
        Ok(()) => Ok(records),
        Err(e) => {
            if !records.is_empty() {
                warn!(count = records.len(), "Capture aborted; partial results were saved");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use sessionjar_cdp::{CdpEvent, TabHandle};
    use sessionjar_core::Error;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Replays a fixed event list, then idles until the read timeout.
    struct ScriptedSource {
        events: VecDeque<CdpEvent>,
        /// Produced forever once `events` runs dry.
        endless: Option<CdpEvent>,
        post_data: HashMap<String, Option<String>>,
        log: Log,
    }

    impl ScriptedSource {
        fn new(events: Vec<CdpEvent>, log: Log) -> Self {
            Self {
                events: events.into(),
                endless: None,
                post_data: HashMap::new(),
                log,
            }
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn send_command(&mut self, method: &str, params: Value) -> Result<Value> {
            self.log.lock().unwrap().push(method.to_string());
            if method == "Network.getRequestPostData" {
                let id = params["requestId"].as_str().unwrap_or_default();
                return match self.post_data.get(id) {
                    Some(Some(body)) => Ok(json!({ "postData": body })),
                    _ => Err(Error::ProtocolCommand {
                        method: method.into(),
                        message: "No post data available".into(),
                    }),
                };
            }
            Ok(json!({}))
        }

        async fn read_event(&mut self, timeout: Duration) -> Result<Option<CdpEvent>> {
            if let Some(event) = self.events.pop_front() {
                return Ok(Some(event));
            }
            if let Some(event) = &self.endless {
                tokio::task::yield_now().await;
                return Ok(Some(event.clone()));
            }
            tokio::time::sleep(timeout).await;
            Ok(None)
        }

        async fn close(&mut self) {
            self.log.lock().unwrap().push("close".into());
        }
    }

    struct FakeTabs {
        tabs: Vec<TabHandle>,
        log: Log,
    }

    #[async_trait]
    impl TabDriver for FakeTabs {
        async fn list_tabs(&mut self) -> Result<Vec<TabHandle>> {
            Ok(self.tabs.clone())
        }

        async fn refresh(&mut self, target_id: &str, _ignore_cache: Option<bool>) -> Result<bool> {
            self.log.lock().unwrap().push(format!("refresh:{}", target_id));
            Ok(true)
        }

        async fn navigate(&mut self, target_id: &str, url: &str) -> Result<bool> {
            self.log
                .lock()
                .unwrap()
                .push(format!("navigate:{}:{}", target_id, url));
            Ok(false)
        }
    }

    fn tab(id: &str, url: &str) -> TabHandle {
        TabHandle {
            target_id: id.into(),
            url: url.into(),
            title: String::new(),
            ws_url: format!("ws://127.0.0.1:9222/devtools/page/{}", id),
        }
    }

    fn request(id: &str, url: &str, headers: Value) -> CdpEvent {
        CdpEvent::new(
            "Network.requestWillBeSent",
            json!({"requestId": id, "type": "Fetch",
                   "request": {"method": "GET", "url": url, "headers": headers}}),
        )
    }

    fn post_request(id: &str, inline: Option<&str>) -> CdpEvent {
        let mut req = json!({"method": "POST", "url": "https://api.io/submit",
                             "headers": {"Cookie": "s=1"}, "hasPostData": true});
        if let Some(body) = inline {
            req["postData"] = json!(body);
        }
        CdpEvent::new(
            "Network.requestWillBeSent",
            json!({"requestId": id, "request": req}),
        )
    }

    fn quick_config() -> CaptureConfig {
        CaptureConfig {
            duration_secs: 1,
            read_timeout_ms: 20,
            ..CaptureConfig::default()
        }
    }

    #[tokio::test]
    async fn test_record_cap_preserves_first_emitted_order() {
        let log = Log::default();
        let events = (0..10)
            .map(|i| request(&format!("r{}", i), "https://a.io/", json!({"Cookie": "c"})))
            .collect();
        let mut source = ScriptedSource::new(events, log);
        let mut run = CaptureRun::new(CaptureConfig {
            max_records: 3,
            ..quick_config()
        });

        run.run(&mut source, None).await.unwrap();
        let ids: Vec<_> = run.records().iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1", "r2"]);
    }

    #[tokio::test]
    async fn test_deadline_with_endless_events() {
        let log = Log::default();
        let mut source = ScriptedSource::new(Vec::new(), log);
        // Never matches the allowlist, so the cap is never reached.
        source.endless = Some(request("noise", "https://a.io/", json!({"Accept": "*/*"})));

        let started = std::time::Instant::now();
        let mut run = CaptureRun::new(quick_config());
        run.run(&mut source, None).await.unwrap();
        let elapsed = started.elapsed();

        assert!(run.records().is_empty());
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_trigger_fires_after_network_enable() {
        let log = Log::default();
        let mut source = ScriptedSource::new(Vec::new(), log.clone());
        let mut tabs = FakeTabs {
            tabs: vec![tab("T1", "https://other.io/"), tab("T2", "https://github.com/")],
            log: log.clone(),
        };
        let mut run = CaptureRun::new(CaptureConfig {
            target_hint: Some("GitHub".into()),
            refresh: Some(RefreshTrigger::default()),
            ..quick_config()
        });

        run.run(&mut source, Some(&mut tabs)).await.unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log[0], "Network.enable");
        assert_eq!(log[1], "refresh:T2");
    }

    #[tokio::test]
    async fn test_trigger_navigates_explicit_tab() {
        let log = Log::default();
        let mut source = ScriptedSource::new(Vec::new(), log.clone());
        let mut tabs = FakeTabs {
            tabs: vec![tab("T1", "https://other.io/")],
            log: log.clone(),
        };
        let mut run = CaptureRun::new(CaptureConfig {
            refresh: Some(RefreshTrigger {
                target_id: Some("T9".into()),
                navigate_url: Some("https://example.com/".into()),
                ignore_cache: false,
            }),
            ..quick_config()
        });

        run.run(&mut source, Some(&mut tabs)).await.unwrap();
        assert!(log
            .lock()
            .unwrap()
            .contains(&"navigate:T9:https://example.com/".to_string()));
    }

    #[tokio::test]
    async fn test_body_capture_inline_truncated_and_fetch_failure() {
        let log = Log::default();
        let events = vec![
            post_request("inline", Some("héllo world")),
            post_request("fetched", None),
            post_request("broken", None),
        ];
        let mut source = ScriptedSource::new(events, log.clone());
        source
            .post_data
            .insert("fetched".into(), Some("{\"a\":1}".into()));

        let mut run = CaptureRun::new(CaptureConfig {
            capture_body: true,
            max_body_bytes: 2,
            max_records: 3,
            ..quick_config()
        });
        run.run(&mut source, None).await.unwrap();

        let records = run.records();
        assert_eq!(records.len(), 3);
        // "hé" would be 3 bytes; the cut backs off to "h".
        assert_eq!(records[0].post_data.as_deref(), Some("h"));
        assert_eq!(records[1].post_data.as_deref(), Some("{\""));
        assert_eq!(records[2].post_data, None);
        assert_eq!(
            log.lock()
                .unwrap()
                .iter()
                .filter(|m| m.as_str() == "Network.getRequestPostData")
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_body_not_captured_by_default() {
        let log = Log::default();
        let mut source = ScriptedSource::new(vec![post_request("p", Some("payload"))], log);
        let mut run = CaptureRun::new(CaptureConfig {
            max_records: 1,
            ..quick_config()
        });
        run.run(&mut source, None).await.unwrap();
        assert_eq!(run.records()[0].post_data, None);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_enable() {
        let log = Log::default();
        let mut source = ScriptedSource::new(Vec::new(), log.clone());
        let mut run = CaptureRun::new(CaptureConfig {
            read_timeout_ms: 5000,
            ..quick_config()
        });
        assert!(matches!(
            run.run(&mut source, None).await,
            Err(Error::Validation(_))
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capture_fails_fast_when_browser_drops_socket() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);
        });

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "T1",
                "type": "page",
                "title": "Inbox",
                "url": "https://mail.example.com/",
                "webSocketDebuggerUrl": format!("ws://{}/devtools/page/T1", ws_addr),
            }])))
            .mount(&server)
            .await;

        let addr = server.address();
        let config = CaptureConfig {
            chrome_host: addr.ip().to_string(),
            chrome_port: addr.port(),
            output_file: std::env::temp_dir().join("sessionjar-dropped-socket.jsonl"),
            ..quick_config()
        };

        let started = std::time::Instant::now();
        let err = capture_requests(config).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)), "got {err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
