use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::warn;

use crate::error::AppResult;

pub const DEFAULT_BUSINESS_TZ: &str = "Asia/Jakarta";
pub const DEFAULT_SCHEDULE_TZ: &str = "Asia/Shanghai";

/// Process configuration, read once at startup.
///
/// Sources, lowest priority first: an optional `config.{yaml,toml,json}` file in
/// the working directory, then `PROFIT_DESK__SECTION__KEY` environment
/// variables, then the legacy plain environment variables handled by
/// [`AppConfig::apply_env_fallbacks`].
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub bind_address: String,
    pub wecom: WecomConfig,
    pub timezones: TimezoneConfig,
    pub ai: AiConfig,
    pub exchange: ExchangeConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WecomConfig {
    pub webhook: Option<String>,
    /// Daily order digest, `HH:MM` in the schedule timezone
    pub push_time: String,
    /// Daily settlement reminder, `HH:MM` in the schedule timezone
    pub settlement_push_time: String,
    pub weekly_push_time: String,
    pub monthly_push_time: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimezoneConfig {
    /// Timezone that defines "today" and "yesterday" for business dates
    pub business: String,
    /// Timezone the recurring jobs are scheduled in
    pub schedule: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AiConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub endpoint: String,
    pub access_key: Option<String>,
    pub currencies: Vec<String>,
    pub ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_address: "0.0.0.0:8080".to_string(),
            wecom: WecomConfig::default(),
            timezones: TimezoneConfig::default(),
            ai: AiConfig::default(),
            exchange: ExchangeConfig::default(),
        }
    }
}

impl Default for WecomConfig {
    fn default() -> Self {
        Self {
            webhook: None,
            push_time: "05:00".to_string(),
            settlement_push_time: "00:00".to_string(),
            weekly_push_time: "08:00".to_string(),
            monthly_push_time: "08:00".to_string(),
        }
    }
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            business: DEFAULT_BUSINESS_TZ.to_string(),
            schedule: DEFAULT_SCHEDULE_TZ.to_string(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://api.exchangerate.host/live".to_string(),
            access_key: None,
            currencies: vec!["PHP".to_string(), "IDR".to_string(), "MYR".to_string()],
            ttl_secs: 600,
        }
    }
}

impl AppConfig {
    pub fn load() -> AppResult<Self> {
        let mut cfg = Self::from_sources(environment())?;
        cfg.apply_env_fallbacks(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    fn from_sources(env: config::Environment) -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(env)
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Fill unset values from the plain environment variables older
    /// deployments use. Values already present are never overwritten.
    pub fn apply_env_fallbacks(&mut self, env: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if self.database_url.is_none() {
            self.database_url = non_empty("DATABASE_URL");
        }
        if let Some(addr) = non_empty("BIND_ADDRESS") {
            if self.bind_address == AppConfig::default().bind_address {
                self.bind_address = addr;
            }
        }
        if self.ai.api_key.is_none() {
            self.ai.api_key = non_empty("AI_API_KEY");
        }
        if self.ai.endpoint.is_none() {
            self.ai.endpoint = non_empty("AI_ENDPOINT");
        }
        if self.ai.model.is_none() {
            self.ai.model = non_empty("AI_MODEL");
        }
        if self.exchange.access_key.is_none() {
            self.exchange.access_key = non_empty("EXCHANGE_API_KEY");
        }
    }
}

/// `PROFIT_DESK__SECTION__KEY` variables; list keys take comma-separated values.
fn environment() -> config::Environment {
    config::Environment::with_prefix("PROFIT_DESK")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("exchange.currencies")
}

impl WecomConfig {
    pub fn order_digest_at(&self) -> NaiveTime {
        clock_or_default("push_time", &self.push_time, 5, 0)
    }

    pub fn settlement_reminder_at(&self) -> NaiveTime {
        clock_or_default("settlement_push_time", &self.settlement_push_time, 0, 0)
    }

    pub fn weekly_rollup_at(&self) -> NaiveTime {
        clock_or_default("weekly_push_time", &self.weekly_push_time, 8, 0)
    }

    pub fn monthly_rollup_at(&self) -> NaiveTime {
        clock_or_default("monthly_push_time", &self.monthly_push_time, 8, 0)
    }
}

impl TimezoneConfig {
    pub fn business_tz(&self) -> Tz {
        load_timezone(&self.business)
    }

    pub fn schedule_tz(&self) -> Tz {
        load_timezone(&self.schedule)
    }
}

/// Parse a strict `HH:MM` wall-clock time.
pub fn parse_clock(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    if value.len() != 5 {
        return None;
    }
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

fn clock_or_default(key: &str, value: &str, hour: u32, minute: u32) -> NaiveTime {
    let fallback = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default();
    match parse_clock(value) {
        Some(time) => time,
        None => {
            warn!(
                "⚠️  Invalid wecom.{} value {:?}, using {}",
                key,
                value,
                fallback.format("%H:%M")
            );
            fallback
        }
    }
}

/// Resolve an IANA timezone name, degrading to UTC when it is unknown.
pub fn load_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(e) => {
            warn!("⚠️  Failed to load timezone {:?} ({}), falling back to UTC", name, e);
            Tz::UTC
        }
    }
}
