//! Rendered fetch through headless Chrome.
//!
//! One browser per process, started (or attached) on the first rendered fetch
//! and shared by every monitor that uses it. Tab work is serialized through a
//! single lock; each fetch gets a fresh tab that is closed afterwards.
//!
//! The browser is never replaced. If the spawned process dies or the remote
//! DevTools connection drops, every later rendered fetch fails to open a tab
//! until the service is restarted.

use super::{ContentFetcher, ContentStream, FetchStrategy};
use crate::error::{Error, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use reqwest::header::HeaderMap;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info};

/// Bound for navigation plus waiting for the network to go quiet.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// The resource count must stay unchanged this long to count as idle.
const NETWORK_IDLE_THRESHOLD: Duration = Duration::from_millis(500);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Monitors check every few minutes; the browser must survive the gaps.
const BROWSER_KEEPALIVE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Counts finished resource loads, or -1 while the document is still loading.
const RESOURCE_COUNT_JS: &str = "document.readyState === 'complete' ? performance.getEntriesByType('resource').length : -1";

/// Where the browser comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEndpoint {
    /// Spawn a local Chrome/Chromium binary.
    Launch { path: PathBuf },
    /// Attach to an already running browser's DevTools websocket.
    Remote { ws_url: String },
}

pub struct RenderedFetcher {
    endpoint: BrowserEndpoint,
    render_timeout: Duration,
    browser: OnceCell<Arc<Browser>>,
    tab_lock: Mutex<()>,
}

impl RenderedFetcher {
    /// Nothing is started here; the browser comes up on the first fetch.
    pub fn new(endpoint: BrowserEndpoint) -> Self {
        Self {
            endpoint,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            browser: OnceCell::new(),
            tab_lock: Mutex::new(()),
        }
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn is_launched(&self) -> bool {
        self.browser.initialized()
    }

    /// The shared browser, created exactly once. A failed start leaves the cell
    /// empty so a later fetch tries again.
    async fn browser(&self) -> Result<Arc<Browser>> {
        let browser = self
            .browser
            .get_or_try_init(|| async {
                let endpoint = self.endpoint.clone();
                info!("Fetch: starting browser ({:?})", endpoint);
                let browser = tokio::task::spawn_blocking(move || connect(&endpoint))
                    .await
                    .map_err(|e| Error::Render(format!("browser start task: {}", e)))??;
                Ok::<_, Error>(Arc::new(browser))
            })
            .await?;
        Ok(browser.clone())
    }
}

impl std::fmt::Debug for RenderedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedFetcher")
            .field("endpoint", &self.endpoint)
            .field("render_timeout", &self.render_timeout)
            .field("launched", &self.is_launched())
            .finish()
    }
}

#[async_trait]
impl ContentFetcher for RenderedFetcher {
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<ContentStream> {
        let browser = self.browser().await?;
        let _tab_guard = self.tab_lock.lock().await;

        let started = Instant::now();
        let target = url.to_string();
        let headers = merge_headers(headers);
        let timeout = self.render_timeout;
        let html = tokio::task::spawn_blocking(move || render(&browser, &target, &headers, timeout))
            .await
            .map_err(|e| Error::Render(format!("render task: {}", e)))??;

        debug!(
            "Fetch: rendered {} ({} bytes) in {:?}",
            url,
            html.len(),
            started.elapsed()
        );
        Ok(ContentStream::from_text(html))
    }

    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Rendered
    }
}

fn connect(endpoint: &BrowserEndpoint) -> Result<Browser> {
    match endpoint {
        BrowserEndpoint::Launch { path } => {
            let options = LaunchOptions::default_builder()
                .path(Some(path.clone()))
                .idle_browser_timeout(BROWSER_KEEPALIVE)
                .build()
                .map_err(|e| Error::Render(format!("invalid launch options: {}", e)))?;
            Browser::new(options)
                .map_err(|e| Error::Render(format!("failed to launch {:?}: {:#}", path, e)))
        }
        BrowserEndpoint::Remote { ws_url } => {
            Browser::connect_with_timeout(ws_url.clone(), BROWSER_KEEPALIVE)
                .map_err(|e| Error::Render(format!("failed to connect to {}: {:#}", ws_url, e)))
        }
    }
}

/// DevTools takes one value per header name; repeated values are comma-joined.
fn merge_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        merged
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    merged
}

fn render(
    browser: &Browser,
    url: &str,
    headers: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<String> {
    let tab = browser.new_tab().map_err(|e| {
        let err = tab_open_error(url, &e);
        error!("Fetch: {}", err);
        err
    })?;
    tab.set_default_timeout(timeout);

    let result = load(&tab, url, headers, timeout);
    if let Err(e) = tab.close(true) {
        debug!("Fetch: closing tab for {} failed: {:#}", url, e);
    }
    result.map_err(|e| Error::Render(format!("{}: {:#}", url, e)))
}

/// A tab that cannot be opened usually means the shared browser is gone.
fn tab_open_error(url: &str, cause: &anyhow::Error) -> Error {
    Error::Render(format!(
        "failed to open tab for {}: {:#} (browser may have exited or disconnected; restart to reconnect)",
        url, cause
    ))
}

fn load(
    tab: &Tab,
    url: &str,
    headers: &BTreeMap<String, String>,
    timeout: Duration,
) -> anyhow::Result<String> {
    if !headers.is_empty() {
        let extra: HashMap<&str, &str> = headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        tab.set_extra_http_headers(extra)?;
    }
    tab.navigate_to(url)?;
    tab.wait_until_navigated()?;
    wait_for_network_idle(tab, timeout)?;
    tab.get_content()
}

fn wait_for_network_idle(tab: &Tab, timeout: Duration) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    let mut last = resource_count(tab)?;
    let mut quiet_since = Instant::now();
    loop {
        if last >= 0 && quiet_since.elapsed() >= NETWORK_IDLE_THRESHOLD {
            return Ok(());
        }
        if Instant::now() >= deadline {
            anyhow::bail!("network did not become idle within {:?}", timeout);
        }
        std::thread::sleep(IDLE_POLL_INTERVAL);
        let count = resource_count(tab)?;
        if count != last {
            last = count;
            quiet_since = Instant::now();
        }
    }
}

fn resource_count(tab: &Tab) -> anyhow::Result<i64> {
    let remote = tab.evaluate(RESOURCE_COUNT_JS, false)?;
    Ok(remote.value.and_then(|v| v.as_i64()).unwrap_or(-1))
}
