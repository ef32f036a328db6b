//! Change monitors
//!
//! A monitor watches one URL. Every `interval` it fetches the page, reduces it
//! to a string with its selector and filters, compares that with the last
//! stored value and notifies its channels when the two differ.
//!
//! Lifecycle: `new` (validate) -> `init` (bind fetcher, storage, notifiers and
//! derive the id) -> `start` / `stop`, any number of times.

pub mod check;
pub mod extract;
pub mod json_path;
pub mod service;

use crate::alerts::NotifierSet;
use crate::error::{Error, Result};
use crate::fetch::{ContentFetcher, FetchStrategy};
use crate::storage::ContentStore;
use check::{CheckContext, CheckOutcome};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a monitor narrows a fetched document down to the part it watches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SelectorsRaw", into = "SelectorsRaw")]
pub enum Selector {
    /// Visible text of the whole page body.
    #[default]
    None,
    /// CSS selectors, evaluated in order.
    Css(Vec<String>),
    /// JSON path queries, evaluated in order.
    Json(Vec<String>),
}

impl Selector {
    pub fn is_none(&self) -> bool {
        matches!(self, Selector::None)
    }

    /// Build from optional CSS and JSON lists. CSS wins when both are given;
    /// blank entries are dropped and an empty list means no selector.
    pub fn from_lists(css: Option<Vec<String>>, json: Option<Vec<String>>) -> Self {
        let clean = |paths: Option<Vec<String>>| {
            paths
                .map(|p| {
                    p.into_iter()
                        .filter(|s| !s.trim().is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|p| !p.is_empty())
        };
        match (clean(css), clean(json)) {
            (Some(css), _) => Selector::Css(css),
            (None, Some(json)) => Selector::Json(json),
            (None, None) => Selector::None,
        }
    }
}

/// On-disk shape of `selectors`: `{"css": [...]}` or `{"json": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SelectorsRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    css: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    json: Option<Vec<String>>,
}

impl From<SelectorsRaw> for Selector {
    fn from(raw: SelectorsRaw) -> Self {
        Selector::from_lists(raw.css, raw.json)
    }
}

impl From<Selector> for SelectorsRaw {
    fn from(selector: Selector) -> Self {
        match selector {
            Selector::None => SelectorsRaw::default(),
            Selector::Css(css) => SelectorsRaw {
                css: Some(css),
                json: None,
            },
            Selector::Json(json) => SelectorsRaw {
                css: None,
                json: Some(json),
            },
        }
    }
}

/// `interval` is stored in (possibly fractional) minutes.
mod minutes {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(interval: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if interval.subsec_nanos() == 0 && interval.as_secs() % 60 == 0 {
            serializer.serialize_u64(interval.as_secs() / 60)
        } else {
            serializer.serialize_f64(interval.as_secs_f64() / 60.0)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let minutes = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(minutes * 60.0)
            .map_err(|_| D::Error::custom(format!("invalid interval {} minutes", minutes)))
    }
}

/// Configuration of one monitor, as stored in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub use_chrome: bool,
    #[serde(with = "minutes")]
    pub interval: Duration,
    #[serde(default, rename = "selectors", skip_serializing_if = "Selector::is_none")]
    pub selector: Selector,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore_empty: bool,
    #[serde(default)]
    pub notifiers: Vec<String>,
}

impl MonitorConfig {
    /// Plain HTTP monitor on the whole page body, no filters or notifiers.
    pub fn new(name: impl Into<String>, url: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            http_headers: BTreeMap::new(),
            use_chrome: false,
            interval,
            selector: Selector::None,
            filters: Vec::new(),
            ignore_empty: false,
            notifiers: Vec::new(),
        }
    }

    pub fn strategy(&self) -> FetchStrategy {
        FetchStrategy::from_use_chrome(self.use_chrome)
    }

    /// Headers as a case-insensitive multi-map.
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, values) in &self.http_headers {
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::InvalidConfig(format!("{}: header name {:?}: {}", self.name, name, e))
            })?;
            for value in values {
                let value = HeaderValue::from_str(value).map_err(|e| {
                    Error::InvalidConfig(format!("{}: header {:?} value: {}", self.name, name, e))
                })?;
                headers.append(header.clone(), value);
            }
        }
        Ok(headers)
    }

    /// Checks that the monitor can be constructed: an absolute http(s) URL,
    /// a non-zero interval and well-formed headers.
    pub fn validate(&self) -> Result<HeaderMap> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| Error::InvalidConfig(format!("{}: url {:?}: {}", self.name, self.url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "{}: unsupported URL scheme {:?}",
                self.name,
                parsed.scheme()
            )));
        }
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig(format!(
                "{}: interval must be greater than zero",
                self.name
            )));
        }
        self.header_map()
    }
}

/// Storage key for a URL: hex SHA-256 of the URL string.
pub fn fingerprint(url: &str) -> String {
    Sha256::digest(url.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Collaborators a monitor is bound to by `init`.
#[derive(Clone)]
pub struct MonitorBindings {
    pub fetcher: Arc<dyn ContentFetcher>,
    pub storage: Arc<dyn ContentStore>,
    pub notifiers: NotifierSet,
}

/// Result of the most recent cycles.
#[derive(Debug, Clone, Default)]
struct MonitorStatus {
    last_check: Option<DateTime<Utc>>,
    last_change: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Point-in-time view of a monitor for listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSummary {
    pub id: Option<String>,
    pub name: String,
    pub url: String,
    pub interval_minutes: f64,
    pub strategy: String,
    pub notifiers: Vec<String>,
    pub running: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_change: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum TaskState {
    Idle,
    Running(RunningTask),
    /// `stop` is joining the task; counts as running until it has exited.
    Stopping,
}

impl TaskState {
    fn is_active(&self) -> bool {
        match self {
            TaskState::Idle => false,
            TaskState::Running(task) => !task.handle.is_finished(),
            TaskState::Stopping => true,
        }
    }
}

/// Puts the task back if a `stop` is dropped before the join completes.
struct StopGuard<'a> {
    slot: &'a Mutex<TaskState>,
    task: Option<RunningTask>,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.slot);
        *state = match self.task.take() {
            // Already cancelled; start stays refused until the handle finishes
            Some(task) => TaskState::Running(task),
            None => TaskState::Idle,
        };
    }
}

pub struct Monitor {
    config: MonitorConfig,
    headers: HeaderMap,
    context: Option<Arc<CheckContext>>,
    task: Mutex<TaskState>,
    status: Arc<Mutex<MonitorStatus>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let headers = config.validate()?;
        Ok(Self {
            config,
            headers,
            context: None,
            task: Mutex::new(TaskState::Idle),
            status: Arc::new(Mutex::new(MonitorStatus::default())),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Fingerprint of the URL; `None` until `init`.
    pub fn id(&self) -> Option<&str> {
        self.context.as_ref().map(|ctx| ctx.id.as_str())
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Bind collaborators and derive the id. Rejected while running.
    pub fn init(&mut self, bindings: MonitorBindings) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning(self.config.name.clone()));
        }
        let id = fingerprint(&self.config.url);
        debug!(
            "Monitor: init {} id={} strategy={} notifiers={:?}",
            self.config.name,
            id,
            bindings.fetcher.strategy(),
            bindings.notifiers.names()
        );
        self.context = Some(Arc::new(CheckContext {
            id,
            name: self.config.name.clone(),
            url: self.config.url.clone(),
            headers: self.headers.clone(),
            selector: self.config.selector.clone(),
            filters: self.config.filters.clone(),
            ignore_empty: self.config.ignore_empty,
            fetcher: bindings.fetcher,
            storage: bindings.storage,
            notifiers: bindings.notifiers,
        }));
        Ok(())
    }

    /// Swap in a new configuration. The monitor must be stopped and has to be
    /// initialized again before the next start.
    pub fn replace_config(&mut self, config: MonitorConfig) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning(self.config.name.clone()));
        }
        let headers = config.validate()?;
        if self.is_initialized() && config.url != self.config.url {
            warn!(
                "Monitor: {} URL changed from {} to {}, stored content starts over",
                config.name, self.config.url, config.url
            );
        }
        self.config = config;
        self.headers = headers;
        self.context = None;
        Ok(())
    }

    /// True from `start` until a `stop` has joined the task.
    pub fn is_running(&self) -> bool {
        lock(&self.task).is_active()
    }

    /// Spawn the scheduling task. The first check runs right away.
    pub fn start(&self) -> Result<()> {
        let Some(ctx) = self.context.clone() else {
            return Err(Error::NotInitialized(self.config.name.clone()));
        };
        let mut state = lock(&self.task);
        if state.is_active() {
            return Err(Error::AlreadyRunning(self.config.name.clone()));
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            ctx,
            self.config.interval,
            cancel.clone(),
            self.status.clone(),
        ));
        *state = TaskState::Running(RunningTask { cancel, handle });
        info!(
            "Monitor: started {} ({}), every {:?}",
            self.config.name, self.config.url, self.config.interval
        );
        Ok(())
    }

    /// Signal the task and wait for it to exit. A cycle in flight finishes first.
    pub async fn stop(&self) -> Result<()> {
        let task = {
            let mut state = lock(&self.task);
            match std::mem::replace(&mut *state, TaskState::Stopping) {
                TaskState::Running(task) => task,
                other => {
                    *state = other;
                    return Err(Error::NotRunning(self.config.name.clone()));
                }
            }
        };

        let mut guard = StopGuard {
            slot: &self.task,
            task: Some(task),
        };
        if let Some(task) = guard.task.as_mut() {
            task.cancel.cancel();
            if let Err(e) = (&mut task.handle).await {
                warn!("Monitor: task for {} ended abnormally: {}", self.config.name, e);
            }
        }
        guard.task = None;
        Ok(())
    }

    pub fn summary(&self) -> MonitorSummary {
        let status = lock(&self.status).clone();
        MonitorSummary {
            id: self.id().map(str::to_string),
            name: self.config.name.clone(),
            url: self.config.url.clone(),
            interval_minutes: self.config.interval.as_secs_f64() / 60.0,
            strategy: self.config.strategy().to_string(),
            notifiers: self
                .context
                .as_ref()
                .map(|ctx| ctx.notifiers.names())
                .unwrap_or_default(),
            running: self.is_running(),
            last_check: status.last_check,
            last_change: status.last_change,
            last_error: status.last_error,
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("name", &self.config.name)
            .field("url", &self.config.url)
            .field("id", &self.id())
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_loop(
    ctx: Arc<CheckContext>,
    period: Duration,
    cancel: CancellationToken,
    status: Arc<Mutex<MonitorStatus>>,
) {
    let mut ticker = tokio::time::interval(period);
    // A slow cycle pushes the next one back instead of causing a burst
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = check::run_check(&ctx).await;
        let now = Utc::now();
        let mut state = lock(&status);
        state.last_check = Some(now);
        match outcome {
            Ok(CheckOutcome::Changed { notify_error, .. }) => {
                state.last_change = Some(now);
                state.last_error = notify_error.map(|e| e.to_string());
            }
            Ok(_) => state.last_error = None,
            Err(e) => {
                warn!("Monitor: check of {} failed: {}", ctx.name, e);
                state.last_error = Some(e.to_string());
            }
        }
    }

    info!("Monitor: stopped {}", ctx.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::ScriptedFetcher;
    use crate::fetch::ContentStream;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MINUTE: Duration = Duration::from_secs(60);

    fn bindings(fetcher: &Arc<ScriptedFetcher>) -> MonitorBindings {
        MonitorBindings {
            fetcher: fetcher.clone(),
            storage: Arc::new(MemoryStore::new()),
            notifiers: NotifierSet::default(),
        }
    }

    fn ready_monitor(fetcher: &Arc<ScriptedFetcher>) -> Monitor {
        let mut config = MonitorConfig::new("Example", "https://example.com/", MINUTE);
        config.selector = Selector::Css(vec!["h1".to_string()]);
        let mut monitor = Monitor::new(config).unwrap();
        monitor.init(bindings(fetcher)).unwrap();
        monitor
    }

    /// Takes `delay` per fetch and records how many fetches overlap.
    struct SlowFetcher {
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ContentFetcher for SlowFetcher {
        async fn fetch(&self, _url: &str, _headers: &HeaderMap) -> Result<ContentStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ContentStream::from_text("<h1>slow</h1>"))
        }

        fn strategy(&self) -> FetchStrategy {
            FetchStrategy::Http
        }
    }

    #[test]
    fn config_parses_file_format() {
        let config: MonitorConfig = serde_json::from_str(
            r##"{
                "name": "Shop", "url": "https://shop.example/item",
                "httpHeaders": {"X-Token": ["a", "b"]},
                "useChrome": true, "interval": 5,
                "selectors": {"css": ["#price", " "], "json": ["price"]},
                "filters": ["In stock"], "notifiers": ["telegram"]
            }"##,
        )
        .unwrap();
        assert_eq!(config.interval, 5 * MINUTE);
        assert_eq!(config.selector, Selector::Css(vec!["#price".to_string()]));
        assert_eq!(config.strategy(), FetchStrategy::Rendered);
        assert!(!config.ignore_empty);

        let headers = config.header_map().unwrap();
        assert_eq!(headers.get_all("x-token").iter().count(), 2);

        let written = serde_json::to_value(&config).unwrap();
        assert_eq!(written["interval"], 5);
        assert_eq!(written["selectors"], serde_json::json!({"css": ["#price"]}));
    }

    #[test]
    fn selector_defaults_to_body_text() {
        assert_eq!(Selector::from_lists(None, None), Selector::None);
        assert_eq!(Selector::from_lists(Some(vec![]), None), Selector::None);
        assert_eq!(
            Selector::from_lists(Some(vec![]), Some(vec!["a.b".to_string()])),
            Selector::Json(vec!["a.b".to_string()])
        );
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let bad_url = MonitorConfig::new("x", "not a url", MINUTE);
        assert!(matches!(Monitor::new(bad_url), Err(Error::InvalidConfig(_))));

        let zero = MonitorConfig::new("x", "https://example.com", Duration::ZERO);
        assert!(matches!(Monitor::new(zero), Err(Error::InvalidConfig(_))));

        let mut header = MonitorConfig::new("x", "https://example.com", MINUTE);
        header
            .http_headers
            .insert("bad header".to_string(), vec!["v".to_string()]);
        assert!(matches!(Monitor::new(header), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn id_depends_only_on_url() {
        let fetcher = Arc::new(ScriptedFetcher::new(["<h1>x</h1>"]));
        let mut monitor = ready_monitor(&fetcher);
        let first = monitor.id().unwrap().to_string();
        monitor.init(bindings(&fetcher)).unwrap();
        assert_eq!(monitor.id().unwrap(), first);
        assert_eq!(first, fingerprint("https://example.com/"));
        assert_eq!(first.len(), 64);
        assert_ne!(first, fingerprint("https://example.com/other"));
    }

    #[tokio::test]
    async fn start_requires_init() {
        let monitor = Monitor::new(MonitorConfig::new("x", "https://example.com", MINUTE)).unwrap();
        assert!(matches!(monitor.start(), Err(Error::NotInitialized(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn checks_immediately_then_every_interval() {
        let fetcher = Arc::new(ScriptedFetcher::new(["<h1>x</h1>"]));
        let monitor = ready_monitor(&fetcher);
        monitor.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(fetcher.call_count(), 1);

        tokio::time::sleep(MINUTE * 2).await;
        assert_eq!(fetcher.call_count(), 3);
        assert!(monitor.summary().last_check.is_some());

        monitor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_spawns_one_task() {
        let fetcher = Arc::new(ScriptedFetcher::new(["<h1>x</h1>"]));
        let monitor = ready_monitor(&fetcher);
        monitor.start().unwrap();
        assert!(matches!(monitor.start(), Err(Error::AlreadyRunning(_))));

        tokio::time::sleep(MINUTE * 2 + Duration::from_secs(30)).await;
        assert_eq!(fetcher.call_count(), 3);

        monitor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_start_resumes_scheduling() {
        let fetcher = Arc::new(ScriptedFetcher::new(["<h1>x</h1>"]));
        let monitor = ready_monitor(&fetcher);
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        monitor.stop().await.unwrap();
        assert!(!monitor.is_running());

        tokio::time::sleep(MINUTE * 5).await;
        assert_eq!(fetcher.call_count(), 1);

        monitor.start().unwrap();
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(fetcher.call_count(), 2);
        tokio::time::sleep(MINUTE).await;
        assert_eq!(fetcher.call_count(), 3);

        monitor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_on_stopped_monitor_is_an_error() {
        let fetcher = Arc::new(ScriptedFetcher::new(["<h1>x</h1>"]));
        let monitor = ready_monitor(&fetcher);
        assert!(matches!(monitor.stop().await, Err(Error::NotRunning(_))));

        monitor.start().unwrap();
        monitor.stop().await.unwrap();
        assert!(matches!(monitor.stop().await, Err(Error::NotRunning(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn init_and_replace_config_rejected_while_running() {
        let fetcher = Arc::new(ScriptedFetcher::new(["<h1>x</h1>"]));
        let mut monitor = ready_monitor(&fetcher);
        monitor.start().unwrap();
        assert!(matches!(
            monitor.init(bindings(&fetcher)),
            Err(Error::AlreadyRunning(_))
        ));
        let other = MonitorConfig::new("Other", "https://example.org/", MINUTE);
        assert!(matches!(
            monitor.replace_config(other.clone()),
            Err(Error::AlreadyRunning(_))
        ));

        monitor.stop().await.unwrap();
        monitor.replace_config(other).unwrap();
        assert!(monitor.id().is_none());
        monitor.init(bindings(&fetcher)).unwrap();
        assert_eq!(monitor.id().unwrap(), fingerprint("https://example.org/"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycles_are_recorded_and_loop_continues() {
        let fetcher = Arc::new(ScriptedFetcher::with_results([
            Err("connection refused".to_string()),
            Ok("<h1>back</h1>".to_string()),
        ]));
        let monitor = ready_monitor(&fetcher);
        monitor.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        let summary = monitor.summary();
        assert!(summary.last_error.unwrap().contains("connection refused"));
        assert!(summary.last_change.is_none());

        tokio::time::sleep(MINUTE).await;
        let summary = monitor.summary();
        assert!(summary.last_error.is_none());
        assert!(summary.last_change.is_some());
        assert_eq!(fetcher.call_count(), 2);

        monitor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_refused_until_stop_has_joined_the_loop() {
        let fetcher = Arc::new(SlowFetcher {
            delay: Duration::from_secs(10),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let mut config = MonitorConfig::new("Slow", "https://example.com/slow", MINUTE);
        config.selector = Selector::Css(vec!["h1".to_string()]);
        let mut monitor = Monitor::new(config).unwrap();
        monitor
            .init(MonitorBindings {
                fetcher: fetcher.clone(),
                storage: Arc::new(MemoryStore::new()),
                notifiers: NotifierSet::default(),
            })
            .unwrap();
        let monitor = Arc::new(monitor);

        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(fetcher.in_flight.load(Ordering::SeqCst), 1);

        let stopping = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.stop().await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        // The first cycle is still in flight and stop is waiting on it
        assert!(monitor.is_running());
        assert!(matches!(monitor.start(), Err(Error::AlreadyRunning(_))));
        assert!(matches!(monitor.stop().await, Err(Error::NotRunning(_))));

        stopping.await.unwrap().unwrap();
        assert!(!monitor.is_running());

        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);

        monitor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_stop_keeps_monitor_marked_running() {
        let fetcher = Arc::new(SlowFetcher {
            delay: Duration::from_secs(10),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let mut monitor =
            Monitor::new(MonitorConfig::new("Slow", "https://example.com/slow", MINUTE)).unwrap();
        monitor
            .init(MonitorBindings {
                fetcher: fetcher.clone(),
                storage: Arc::new(MemoryStore::new()),
                notifiers: NotifierSet::default(),
            })
            .unwrap();

        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        let timed_out = tokio::time::timeout(Duration::from_secs(1), monitor.stop()).await;
        assert!(timed_out.is_err());

        // Cancelled but its cycle has not finished yet
        assert!(monitor.is_running());
        assert!(matches!(monitor.start(), Err(Error::AlreadyRunning(_))));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!monitor.is_running());
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
        monitor.stop().await.unwrap();
    }
}
