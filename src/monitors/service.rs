//! Monitor registry
//!
//! Owns the fetch backends, storage and alert channels, binds them into every
//! monitor it holds and drives their lifecycle. The HTTP backend always exists;
//! the rendered backend is only created once a monitor asks for it.

use super::{extract, fingerprint, Monitor, MonitorBindings, MonitorConfig, MonitorSummary};
use crate::alerts::AlertManager;
use crate::error::{Error, Result};
use crate::fetch::rendered::DEFAULT_RENDER_TIMEOUT;
use crate::fetch::{BrowserEndpoint, ContentFetcher, FetchStrategy, HttpFetcher, RenderedFetcher};
use crate::storage::ContentStore;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct MonitorService {
    http: Arc<dyn ContentFetcher>,
    browser_endpoint: BrowserEndpoint,
    render_timeout: Duration,
    rendered: OnceLock<Arc<dyn ContentFetcher>>,
    storage: Arc<dyn ContentStore>,
    alerts: AlertManager,
    monitors: RwLock<Vec<Monitor>>,
}

impl MonitorService {
    pub fn new(
        storage: Arc<dyn ContentStore>,
        alerts: AlertManager,
        browser_endpoint: BrowserEndpoint,
    ) -> Result<Self> {
        Ok(Self::with_http_fetcher(
            Arc::new(HttpFetcher::new()?),
            storage,
            alerts,
            browser_endpoint,
        ))
    }

    pub fn with_http_fetcher(
        http: Arc<dyn ContentFetcher>,
        storage: Arc<dyn ContentStore>,
        alerts: AlertManager,
        browser_endpoint: BrowserEndpoint,
    ) -> Self {
        Self {
            http,
            browser_endpoint,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            rendered: OnceLock::new(),
            storage,
            alerts,
            monitors: RwLock::new(Vec::new()),
        }
    }

    /// Bound for one rendered fetch. Only affects a browser backend created later.
    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    /// Use `fetcher` for rendered monitors instead of a browser.
    #[cfg(test)]
    fn with_rendered_fetcher(self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        let _ = self.rendered.set(fetcher);
        self
    }

    /// Whether any monitor has asked for the rendered backend so far.
    pub fn browser_requested(&self) -> bool {
        self.rendered.get().is_some()
    }

    fn fetcher_for(&self, strategy: FetchStrategy) -> Arc<dyn ContentFetcher> {
        match strategy {
            FetchStrategy::Http => self.http.clone(),
            FetchStrategy::Rendered => self
                .rendered
                .get_or_init(|| {
                    info!("Monitor: creating rendered fetch backend ({:?})", self.browser_endpoint);
                    let fetcher: Arc<dyn ContentFetcher> = Arc::new(
                        RenderedFetcher::new(self.browser_endpoint.clone())
                            .with_render_timeout(self.render_timeout),
                    );
                    fetcher
                })
                .clone(),
        }
    }

    fn bindings(&self, config: &MonitorConfig) -> MonitorBindings {
        MonitorBindings {
            fetcher: self.fetcher_for(config.strategy()),
            storage: self.storage.clone(),
            notifiers: self.alerts.resolve(&config.notifiers),
        }
    }

    /// Validate configs against each other and the live set, then build and
    /// bind the monitors. Nothing is registered when any of them fails.
    fn prepare(&self, existing: &[Monitor], configs: Vec<MonitorConfig>) -> Result<Vec<Monitor>> {
        let mut prepared: Vec<Monitor> = Vec::with_capacity(configs.len());
        for config in configs {
            let taken = existing
                .iter()
                .chain(prepared.iter())
                .any(|m| m.config().url == config.url);
            if taken {
                return Err(Error::DuplicateMonitor(config.url));
            }
            let mut monitor = Monitor::new(config)?;
            let bindings = self.bindings(monitor.config());
            monitor.init(bindings)?;
            prepared.push(monitor);
        }
        Ok(prepared)
    }

    /// Register a monitor without starting it. Returns its id.
    pub async fn register(&self, config: MonitorConfig) -> Result<String> {
        let mut monitors = self.monitors.write().await;
        let mut prepared = self.prepare(&monitors, vec![config])?;
        let monitor = prepared.remove(0);
        let id = monitor.id().map(str::to_string).unwrap_or_default();
        monitors.push(monitor);
        Ok(id)
    }

    /// Register and immediately start monitors, the same way startup does.
    pub async fn add_monitors(&self, configs: Vec<MonitorConfig>) -> Result<Vec<String>> {
        let mut monitors = self.monitors.write().await;
        let prepared = self.prepare(&monitors, configs)?;
        let mut ids = Vec::with_capacity(prepared.len());
        for monitor in prepared {
            monitor.start()?;
            ids.push(monitor.id().map(str::to_string).unwrap_or_default());
            monitors.push(monitor);
        }
        info!("Monitor: added {} monitor(s), {} total", ids.len(), monitors.len());
        Ok(ids)
    }

    /// Start every monitor that is not running. Returns how many were started.
    pub async fn start_all(&self) -> Result<usize> {
        let monitors = self.monitors.read().await;
        let mut started = 0;
        for monitor in monitors.iter().filter(|m| !m.is_running()) {
            monitor.start()?;
            started += 1;
        }
        info!("Monitor: started {} of {} monitor(s)", started, monitors.len());
        Ok(started)
    }

    /// Stop every running monitor and wait for their tasks. Returns how many
    /// were stopped.
    pub async fn stop_all(&self) -> usize {
        let monitors = self.monitors.read().await;
        let mut stopped = 0;
        for monitor in monitors.iter().filter(|m| m.is_running()) {
            match monitor.stop().await {
                Ok(()) => stopped += 1,
                Err(e) => warn!("Monitor: {}", e),
            }
        }
        info!("Monitor: stopped {} monitor(s)", stopped);
        stopped
    }

    fn position(monitors: &[Monitor], id: &str) -> Result<usize> {
        monitors
            .iter()
            .position(|m| m.id() == Some(id))
            .ok_or_else(|| Error::MonitorNotFound(id.to_string()))
    }

    pub async fn start_monitor(&self, id: &str) -> Result<()> {
        let monitors = self.monitors.read().await;
        let index = Self::position(&monitors, id)?;
        monitors[index].start()
    }

    pub async fn stop_monitor(&self, id: &str) -> Result<()> {
        let monitors = self.monitors.read().await;
        let index = Self::position(&monitors, id)?;
        monitors[index].stop().await
    }

    pub async fn is_running(&self, id: &str) -> Result<bool> {
        let monitors = self.monitors.read().await;
        let index = Self::position(&monitors, id)?;
        Ok(monitors[index].is_running())
    }

    /// Stop, replace the configuration, bind again and restart if it was
    /// running. Returns the id, which changes when the URL does.
    pub async fn reconfigure_monitor(&self, id: &str, config: MonitorConfig) -> Result<String> {
        let mut monitors = self.monitors.write().await;
        let index = Self::position(&monitors, id)?;

        let taken = monitors
            .iter()
            .enumerate()
            .any(|(i, m)| i != index && m.config().url == config.url);
        if taken {
            return Err(Error::DuplicateMonitor(config.url));
        }
        // Fail before stopping anything
        config.validate()?;

        let monitor = &mut monitors[index];
        let was_running = monitor.is_running();
        if was_running {
            monitor.stop().await?;
        }
        monitor.replace_config(config)?;
        let bindings = self.bindings(monitor.config());
        monitor.init(bindings)?;
        if was_running {
            monitor.start()?;
        }

        let new_id = fingerprint(&monitor.config().url);
        info!("Monitor: reconfigured {} ({} -> {})", monitor.config().name, id, new_id);
        Ok(new_id)
    }

    /// Stop (if needed) and drop a monitor. Its stored content is left in place.
    pub async fn remove_monitor(&self, id: &str) -> Result<MonitorConfig> {
        let mut monitors = self.monitors.write().await;
        let index = Self::position(&monitors, id)?;
        if monitors[index].is_running() {
            monitors[index].stop().await?;
        }
        let monitor = monitors.remove(index);
        info!("Monitor: removed {}", monitor.config().name);
        Ok(monitor.config().clone())
    }

    pub async fn monitors(&self) -> Vec<MonitorSummary> {
        self.monitors.read().await.iter().map(Monitor::summary).collect()
    }

    pub async fn len(&self) -> usize {
        self.monitors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.monitors.read().await.is_empty()
    }

    /// One fetch + extract for `config` without storage or notifications.
    pub async fn preview(&self, config: &MonitorConfig) -> Result<String> {
        let headers = config.validate()?;
        let stream = self
            .fetcher_for(config.strategy())
            .fetch(&config.url, &headers)
            .await?;
        extract::extract_stream(stream, &config.selector, &config.filters).await
    }
}
