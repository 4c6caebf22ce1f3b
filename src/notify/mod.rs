// Chat webhook delivery (WeCom group robot)

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::NotifyError;

pub const WECOM_WEBHOOK_BASE: &str = "https://qyapi.weixin.qq.com/cgi-bin/webhook/send";

/// Destination for rendered report text
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Serialize, PartialEq)]
struct MarkdownMessage<'a> {
    msgtype: &'static str,
    markdown: MarkdownBody<'a>,
}

#[derive(Debug, Serialize, PartialEq)]
struct MarkdownBody<'a> {
    content: &'a str,
}

fn markdown_payload(text: &str) -> MarkdownMessage<'_> {
    MarkdownMessage {
        msgtype: "markdown",
        markdown: MarkdownBody { content: text },
    }
}

/// Pick the webhook URL: explicit config first, then `WECHAT_ROBOT_WEBHOOK`,
/// then a URL built from `WECHAT_ROBOT_KEY`.
pub fn resolve_webhook(
    explicit: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    present(explicit.map(str::to_string))
        .or_else(|| present(env("WECHAT_ROBOT_WEBHOOK")))
        .or_else(|| {
            present(env("WECHAT_ROBOT_KEY"))
                .map(|key| format!("{}?key={}", WECOM_WEBHOOK_BASE, key.trim()))
        })
}

/// WeCom group robot client. One POST per message, no retries.
pub struct WecomNotifier {
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl WecomNotifier {
    pub fn new(endpoint: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { endpoint, client }
    }

    pub fn from_config(explicit: Option<&str>) -> Self {
        Self::new(resolve_webhook(explicit, |key| std::env::var(key).ok()))
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }
}

#[async_trait]
impl NotificationSink for WecomNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let endpoint = self.endpoint.as_deref().ok_or(NotifyError::NotConfigured)?;

        let body = serde_json::to_vec(&markdown_payload(text))
            .map_err(|e| NotifyError::Encode(e.to_string()))?;

        debug!("📤 Posting {} bytes to webhook", body.len());
        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        info!("📨 Webhook message delivered");
        Ok(())
    }
}
