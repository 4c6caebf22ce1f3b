use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{RateSource, RateTable, HOME_CURRENCY};
use crate::config::ExchangeConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
struct LiveResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    quotes: HashMap<String, f64>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Converts `CNYXXX` quotes (units of XXX per CNY) into CNY per unit of XXX.
fn invert_quotes(quotes: &HashMap<String, f64>) -> RateTable {
    let mut table: RateTable = quotes
        .iter()
        .filter_map(|(pair, per_cny)| {
            let code = pair.strip_prefix(HOME_CURRENCY)?;
            if code.len() != 3 || *per_cny <= 0.0 {
                return None;
            }
            Some((code.to_string(), 1.0 / per_cny))
        })
        .collect();
    table.insert(HOME_CURRENCY.to_string(), 1.0);
    table
}

/// exchangerate.host `/live` client
pub struct ExchangeRateHost {
    endpoint: String,
    access_key: Option<String>,
    currencies: Vec<String>,
    client: reqwest::Client,
}

impl ExchangeRateHost {
    pub fn new(config: &ExchangeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            endpoint: config.endpoint.clone(),
            access_key: config.access_key.clone().filter(|k| !k.trim().is_empty()),
            currencies: config.currencies.clone(),
            client,
        }
    }
}

#[async_trait]
impl RateSource for ExchangeRateHost {
    async fn fetch_rates(&self) -> AppResult<RateTable> {
        let currencies = self.currencies.join(",");
        let mut query = vec![("source", HOME_CURRENCY), ("currencies", currencies.as_str())];
        match self.access_key.as_deref() {
            Some(key) => query.push(("access_key", key)),
            None => warn!("⚠️  exchange.access_key is not set, the rate API may reject the request"),
        }

        debug!("💱 Fetching exchange rates for {}", currencies);
        let response = self.client.get(&self.endpoint).query(&query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ExternalError(format!(
                "Exchange rate API returned status {}",
                status.as_u16()
            )));
        }

        let body: LiveResponse = response.json().await?;
        if !body.success {
            let detail = body
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(AppError::ExternalError(format!("Exchange rate API error: {}", detail)));
        }

        Ok(invert_quotes(&body.quotes))
    }
}
