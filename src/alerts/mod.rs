//! Alert system module
//!
//! Channel-agnostic fan-out of `(subject, body)` notifications.
//! Every bound channel is sent to concurrently; the send completes when all of
//! them have finished, and every failure is reported, not just the first.

use crate::error::{ChannelFailure, Error, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod channels;

use channels::{MailgunChannel, MailgunConfig, TelegramChannel, TelegramConfig};

/// Trait for alert channels
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> anyhow::Result<()>;
    fn get_name(&self) -> &str;
}

/// Channel credentials as they appear in the config file under `notifiers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifiersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailgun: Option<MailgunConfig>,
}

/// The channels one monitor sends to.
#[derive(Clone, Default)]
pub struct NotifierSet {
    channels: Vec<Arc<dyn AlertChannel>>,
}

impl NotifierSet {
    pub fn new(channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.get_name().to_string()).collect()
    }

    /// Send to all channels in parallel and wait for every one of them.
    pub async fn send(&self, subject: &str, body: &str) -> Result<()> {
        if self.channels.is_empty() {
            debug!("Alerts: no channels bound, nothing to send");
            return Ok(());
        }

        let results = join_all(self.channels.iter().map(|channel| async move {
            (channel.get_name(), channel.send(subject, body).await)
        }))
        .await;

        let failures: Vec<ChannelFailure> = results
            .into_iter()
            .filter_map(|(name, result)| {
                result.err().map(|e| {
                    warn!("Alerts: channel {} failed: {:#}", name, e);
                    ChannelFailure {
                        channel: name.to_string(),
                        message: format!("{:#}", e),
                    }
                })
            })
            .collect();

        if failures.is_empty() {
            info!("Alerts: sent \"{}\" to {} channel(s)", subject, self.channels.len());
            Ok(())
        } else {
            Err(Error::Notify {
                total: self.channels.len(),
                failures,
            })
        }
    }
}

impl std::fmt::Debug for NotifierSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierSet")
            .field("channels", &self.names())
            .finish()
    }
}

/// Named channels available to monitors (`"telegram"`, `"mailgun"`, ...).
#[derive(Clone, Default)]
pub struct AlertManager {
    channels: HashMap<String, Arc<dyn AlertChannel>>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the configured channels. Credentials are not checked here; a bad
    /// token only fails the sends that use it.
    pub fn from_config(config: &NotifiersConfig) -> Self {
        let client = reqwest::Client::new();
        let mut manager = Self::new();
        if let Some(ref telegram) = config.telegram {
            manager.register_channel(
                "telegram",
                Arc::new(TelegramChannel::new(client.clone(), telegram.clone())),
            );
        }
        if let Some(ref mailgun) = config.mailgun {
            manager.register_channel(
                "mailgun",
                Arc::new(MailgunChannel::new(client, mailgun.clone())),
            );
        }
        manager
    }

    pub fn register_channel(&mut self, name: impl Into<String>, channel: Arc<dyn AlertChannel>) {
        self.channels.insert(name.into(), channel);
    }

    /// Channels for the given names, in order. Unknown names are skipped.
    pub fn resolve(&self, names: &[String]) -> NotifierSet {
        let channels = names
            .iter()
            .filter_map(|name| match self.channels.get(name) {
                Some(channel) => Some(channel.clone()),
                None => {
                    warn!("Alerts: notifier {:?} is not configured, skipping", name);
                    None
                }
            })
            .collect();
        NotifierSet::new(channels)
    }
}
