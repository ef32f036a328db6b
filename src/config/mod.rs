//! Configuration management module
//!
//! Two sources:
//! - process settings from the environment (`CONFIG_FILE`, `STORAGE_DIRECTORY`,
//!   `CHROME_PATH`, `CHROME_WS`, `RENDER_TIMEOUT`, `LOG_FILE`)
//! - the JSON config file with the monitors and notifier credentials

use crate::alerts::NotifiersConfig;
use crate::error::{Error, Result};
use crate::fetch::rendered::DEFAULT_RENDER_TIMEOUT;
use crate::fetch::BrowserEndpoint;
use crate::monitors::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_STORAGE_DIRECTORY: &str = "data";
pub const DEFAULT_CHROME_PATH: &str = "/usr/bin/chromium";

/// Process settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub config_file: PathBuf,
    pub storage_directory: PathBuf,
    pub chrome_path: PathBuf,
    /// Remote DevTools websocket; when set no local browser is spawned.
    pub chrome_ws: Option<String>,
    /// Bound for one rendered fetch (`RENDER_TIMEOUT`, seconds).
    pub render_timeout: Duration,
    pub log_file: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            config_file: get("CONFIG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
            storage_directory: get("STORAGE_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIRECTORY)),
            chrome_path: get("CHROME_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHROME_PATH)),
            chrome_ws: get("CHROME_WS"),
            render_timeout: get("RENDER_TIMEOUT")
                .and_then(|v| match v.trim().parse::<u64>() {
                    Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                    _ => {
                        warn!("Config: ignoring RENDER_TIMEOUT={:?}, expected seconds > 0", v);
                        None
                    }
                })
                .unwrap_or(DEFAULT_RENDER_TIMEOUT),
            log_file: get("LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| Self::default_log_file_path(get("HOME"))),
        }
    }

    /// `$HOME/.change-monitor/debug.log`, or a file in the temp directory
    /// when HOME is not available.
    pub fn default_log_file_path(home: Option<String>) -> PathBuf {
        match home {
            Some(home) => PathBuf::from(home).join(".change-monitor").join("debug.log"),
            None => std::env::temp_dir().join("change-monitor-debug.log"),
        }
    }

    pub fn browser_endpoint(&self) -> BrowserEndpoint {
        match self.chrome_ws {
            Some(ref ws_url) => BrowserEndpoint::Remote {
                ws_url: ws_url.clone(),
            },
            None => BrowserEndpoint::Launch {
                path: self.chrome_path.clone(),
            },
        }
    }

    pub fn version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

/// Contents of the JSON config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
    #[serde(default)]
    pub notifiers: NotifiersConfig,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        debug!(
            "Config: loaded {} monitor(s) from {}",
            file.monitors.len(),
            path.display()
        );
        Ok(file)
    }

    /// Like `load`, but a missing file is an empty config.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("Config: {} does not exist, starting empty", path.display());
            Ok(Self::default())
        }
    }

    /// Write back as pretty-printed JSON, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, json)?;
        debug!("Config: saved {} monitor(s) to {}", self.monitors.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(lookup(&[("HOME", "/home/u")]));
        assert_eq!(config.config_file, PathBuf::from("config.json"));
        assert_eq!(config.storage_directory, PathBuf::from("data"));
        assert_eq!(config.render_timeout, DEFAULT_RENDER_TIMEOUT);
        assert_eq!(
            config.log_file,
            PathBuf::from("/home/u/.change-monitor/debug.log")
        );
        assert_eq!(
            config.browser_endpoint(),
            BrowserEndpoint::Launch {
                path: PathBuf::from("/usr/bin/chromium")
            }
        );
    }

    #[test]
    fn remote_browser_when_ws_is_set() {
        let config = Config::from_lookup(lookup(&[
            ("CHROME_WS", "ws://chrome:9222/devtools/browser/abc"),
            ("STORAGE_DIRECTORY", "/var/lib/monitor"),
            ("CHROME_PATH", ""),
        ]));
        assert_eq!(config.storage_directory, PathBuf::from("/var/lib/monitor"));
        assert_eq!(config.chrome_path, PathBuf::from(DEFAULT_CHROME_PATH));
        assert_eq!(
            config.browser_endpoint(),
            BrowserEndpoint::Remote {
                ws_url: "ws://chrome:9222/devtools/browser/abc".to_string()
            }
        );
    }

    #[test]
    fn render_timeout_from_environment() {
        let config = Config::from_lookup(lookup(&[("RENDER_TIMEOUT", "90")]));
        assert_eq!(config.render_timeout, Duration::from_secs(90));

        for bad in ["0", "soon", "-5"] {
            let config = Config::from_lookup(lookup(&[("RENDER_TIMEOUT", bad)]));
            assert_eq!(config.render_timeout, DEFAULT_RENDER_TIMEOUT);
        }
    }

    #[test]
    fn config_file_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.json");

        let mut file = ConfigFile::load_or_default(&path).unwrap();
        assert!(file.monitors.is_empty());
        file.monitors.push(MonitorConfig::new(
            "Example",
            "https://example.com",
            Duration::from_secs(300),
        ));
        file.save(&path).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded.monitors, file.monitors);
        assert!(loaded.notifiers.telegram.is_none());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"monitors": [{"name": "x"}]}"#).unwrap();
        assert!(matches!(ConfigFile::load(&path), Err(Error::InvalidConfig(_))));
    }
}
