//! Alert channel implementations

use super::AlertChannel;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const TELEGRAM_API: &str = "https://api.telegram.org";
const MAILGUN_API: &str = "https://api.mailgun.net/v3";
const MAILGUN_API_EU: &str = "https://api.eu.mailgun.net/v3";

/// Telegram bot credentials and the chats to message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    pub api_token: String,
    #[serde(default)]
    pub receivers: Vec<i64>,
}

/// Telegram alert channel
pub struct TelegramChannel {
    client: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramChannel {
    pub fn new(client: reqwest::Client, config: TelegramConfig) -> Self {
        Self { client, config }
    }

    async fn send_to_chat(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.config.api_token);
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("failed to send message to Telegram chat '{}'", chat_id))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "Telegram chat '{}' rejected message: {} {}",
                chat_id,
                status,
                body.chars().take(200).collect::<String>()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    fn get_name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        if self.config.receivers.is_empty() {
            debug!("Alerts: telegram has no receivers, skipping");
            return Ok(());
        }
        let text = format!("{}\n{}", subject, body);
        for chat_id in &self.config.receivers {
            self.send_to_chat(*chat_id, &text).await?;
        }
        Ok(())
    }
}

/// Mailgun domain, key and addresses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailgunConfig {
    pub domain: String,
    pub api_key: String,
    pub sender_address: String,
    #[serde(default)]
    pub with_europe: bool,
    #[serde(default)]
    pub receivers: Vec<String>,
}

impl MailgunConfig {
    fn messages_url(&self) -> String {
        let base = if self.with_europe {
            MAILGUN_API_EU
        } else {
            MAILGUN_API
        };
        format!("{}/{}/messages", base, self.domain)
    }
}

/// Mailgun e-mail alert channel
pub struct MailgunChannel {
    client: reqwest::Client,
    config: MailgunConfig,
}

impl MailgunChannel {
    pub fn new(client: reqwest::Client, config: MailgunConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl AlertChannel for MailgunChannel {
    fn get_name(&self) -> &str {
        "mailgun"
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        if self.config.receivers.is_empty() {
            debug!("Alerts: mailgun has no receivers, skipping");
            return Ok(());
        }
        let to = self.config.receivers.join(",");
        let form = [
            ("from", self.config.sender_address.as_str()),
            ("to", to.as_str()),
            ("subject", subject),
            ("text", body),
        ];

        let resp = self
            .client
            .post(self.config.messages_url())
            .basic_auth("api", Some(&self.config.api_key))
            .form(&form)
            .send()
            .await
            .context("failed to reach Mailgun")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "Mailgun rejected message: {} {}",
                status,
                text.chars().take(200).collect::<String>()
            );
        }
        Ok(())
    }
}
