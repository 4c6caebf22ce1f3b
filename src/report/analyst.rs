use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AiConfig;
use crate::error::{AppError, AppResult};

const OUTPUT_TEXT_TYPES: [&str; 3] = ["output_text", "text", "output_text_block"];

/// Produces a free-text commentary for a settlement summary.
#[async_trait]
pub trait ReportAnalyst: Send + Sync {
    /// `Ok(None)` when the analyst is disabled or returned no text.
    async fn analyze(&self, summary: &serde_json::Value) -> AppResult<Option<String>>;
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputMessage>,
}

#[derive(Debug, Serialize)]
struct InputMessage {
    role: &'static str,
    content: Vec<InputContent>,
}

#[derive(Debug, Serialize)]
struct InputContent {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesReply {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputContent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

impl ResponsesReply {
    fn first_text(self) -> Option<String> {
        self.output
            .into_iter()
            .flat_map(|item| item.content)
            .find(|c| OUTPUT_TEXT_TYPES.contains(&c.kind.as_str()))
            .map(|c| c.text)
            .filter(|t| !t.trim().is_empty())
    }
}

fn build_prompt(summary: &serde_json::Value) -> String {
    format!(
        "You are an operations analyst for a cross-border e-commerce business. \
         Below is a settlement summary as JSON: {}. Write a weekly/monthly business \
         review of at most 500 words covering overall profitability, the countries \
         driving profit, loss-making or low-margin countries, days with large profit \
         swings, and 3-5 concrete recommendations for the operations team.",
        summary
    )
}

/// Client for a Responses-style model endpoint.
///
/// Disabled unless endpoint, key and model are all configured.
pub struct AiAnalyst {
    endpoint: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    client: reqwest::Client,
}

impl AiAnalyst {
    pub fn new(config: &AiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let present = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

        Self {
            endpoint: present(&config.endpoint),
            api_key: present(&config.api_key),
            model: present(&config.model),
            client,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some() && self.model.is_some()
    }
}

#[async_trait]
impl ReportAnalyst for AiAnalyst {
    async fn analyze(&self, summary: &serde_json::Value) -> AppResult<Option<String>> {
        let (Some(endpoint), Some(api_key), Some(model)) =
            (&self.endpoint, &self.api_key, &self.model)
        else {
            debug!("AI analysis not configured, skipping");
            return Ok(None);
        };

        let request = ResponsesRequest {
            model,
            input: vec![InputMessage {
                role: "user",
                content: vec![InputContent {
                    kind: "input_text",
                    text: build_prompt(summary),
                }],
            }],
        };

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(AppError::ExternalError(format!(
                "AI endpoint returned status {}",
                status.as_u16()
            )));
        }

        let reply: ResponsesReply = response.json().await?;
        let text = reply.first_text();
        if text.is_some() {
            info!("🤖 AI analysis received");
        }
        Ok(text)
    }
}
