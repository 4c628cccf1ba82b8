use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use crate::config::{Config, MailConfig};

/// Outbound delivery channel: sends a file to a Kindle address.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_document(&self, destination: &str, file_name: &str, bytes: Vec<u8>) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Mail API client posting multipart messages (Mailgun-compatible shape).
pub struct HttpMailer {
    client: reqwest::Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.delivery.network_timeout())
            .build()
            .context("Failed to build mail HTTP client")?;
        Ok(Self {
            client,
            config: config.mail.clone(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_document(&self, destination: &str, file_name: &str, bytes: Vec<u8>) -> Result<()> {
        let attachment = Part::bytes(bytes).file_name(file_name.to_string());
        let form = Form::new()
            .text("from", self.config.sender.clone())
            .text("to", destination.to_string())
            .text("subject", file_name.to_string())
            .text("text", "Sent by kindlebot")
            .part("attachment", attachment);

        let response = self
            .client
            .post(&self.config.api_url)
            .basic_auth("api", Some(&self.config.api_key))
            .multipart(form)
            .send()
            .await
            .context("Failed to send request to mail API")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Mail API error ({}): {}", status, error_body);
        }

        // Some providers answer with an empty body
        let message_id = response
            .json::<SendResponse>()
            .await
            .ok()
            .and_then(|r| r.id);
        debug!(destination, file_name, ?message_id, "Mail accepted");

        Ok(())
    }
}
