use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::ledger::models::{SettlementRecord, WindowKind};
use crate::ledger::SettlementFilter;
use crate::settlement::formula::SettlementInputs;
use crate::settlement::{NotifyStatus, SaveSettlement};

// ========== REQUEST MODELS ==========

/// Settlement figures entered by an operator
/// POST /api/settlement
#[derive(Debug, Deserialize, Validate)]
pub struct SaveSettlementRequest {
    #[validate(range(min = 1, message = "owner_id is required"))]
    pub owner_id: i64,

    /// `YYYY-MM-DD`; today in the business timezone when absent
    pub date: Option<String>,

    #[validate(length(min = 1, max = 20, message = "country is required"))]
    pub country: String,

    #[serde(default)]
    #[validate(length(max = 10))]
    pub currency: String,

    #[serde(default)]
    pub sale_total: f64,
    #[serde(default)]
    pub ad_cost: f64,
    #[serde(default)]
    pub exchange_rate: f64,
    #[serde(default)]
    pub goods_cost: f64,
    #[serde(default)]
    pub misc_fee: f64,
    #[serde(default)]
    pub flat_cost: f64,

    #[serde(default)]
    #[validate(length(max = 255))]
    pub remark: String,
}

impl SaveSettlementRequest {
    pub fn into_command(self) -> AppResult<SaveSettlement> {
        let business_date = parse_optional_date("date", self.date.as_deref())?;

        Ok(SaveSettlement {
            owner_id: self.owner_id,
            business_date,
            country: self.country,
            currency: self.currency,
            inputs: SettlementInputs {
                sale_total: self.sale_total,
                ad_cost: self.ad_cost,
                exchange_rate: self.exchange_rate,
                goods_cost: self.goods_cost,
                misc_fee: self.misc_fee,
                flat_cost: self.flat_cost,
            },
            remark: self.remark,
        })
    }
}

/// Optional report date, from the query string or a JSON body
#[derive(Debug, Default, Deserialize)]
pub struct DateParam {
    pub date: Option<String>,
}

impl DateParam {
    pub fn parse(&self) -> AppResult<Option<NaiveDate>> {
        parse_optional_date("date", self.date.as_deref())
    }
}

/// POST /api/settlements/push-range
#[derive(Debug, Deserialize, Validate)]
pub struct PushRangeRequest {
    #[validate(length(min = 1, message = "start is required"))]
    pub start: String,
    #[validate(length(min = 1, message = "end is required"))]
    pub end: String,
    /// Only selects the report title
    #[serde(default = "default_range_kind")]
    pub kind: WindowKind,
}

fn default_range_kind() -> WindowKind {
    WindowKind::Weekly
}

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// GET /api/settlements
#[derive(Debug, Default, Deserialize)]
pub struct ListSettlementsQuery {
    pub date: Option<String>,
    pub country: Option<String>,
    pub owner_id: Option<i64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl ListSettlementsQuery {
    pub fn filter(&self) -> AppResult<SettlementFilter> {
        let mut filter = match parse_optional_date("date", self.date.as_deref())? {
            Some(date) => SettlementFilter::on(date),
            None => SettlementFilter::default(),
        };
        if let Some(owner_id) = self.owner_id {
            filter = filter.owner(owner_id);
        }
        if let Some(country) = self.country.as_deref().filter(|c| !c.trim().is_empty()) {
            filter = filter.country(country.trim());
        }
        Ok(filter)
    }

    /// 1-based page number and page size, with out-of-range values replaced
    pub fn page(&self) -> (i64, i64) {
        let page = self.page.filter(|p| *p >= 1).unwrap_or(1);
        let size = self
            .page_size
            .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        (page, size)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DailyStatsQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MonthlyStatsQuery {
    pub year: Option<i32>,
}

pub fn parse_date(field: &str, value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::InvalidInput(format!("{} must be YYYY-MM-DD, got '{}'", field, value))
    })
}

/// Blank or missing values mean "not given".
pub fn parse_optional_date(field: &str, value: Option<&str>) -> AppResult<Option<NaiveDate>> {
    value
        .filter(|d| !d.trim().is_empty())
        .map(|d| parse_date(field, d))
        .transpose()
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct SaveSettlementResponse {
    pub settlement: SettlementRecord,
    pub notification: NotifyStatus,
    /// Set when the settlement was saved but the group push failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_warning: Option<String>,
}

/// Result of a manual push
#[derive(Debug, Serialize)]
pub struct PushResponse<T> {
    pub ok: bool,
    pub summary: T,
}

impl<T> PushResponse<T> {
    pub fn sent(summary: T) -> Self {
        Self { ok: true, summary }
    }
}

#[derive(Debug, Serialize)]
pub struct ListSettlementsResponse {
    pub page: i64,
    pub page_size: i64,
    pub items: Vec<SettlementRecord>,
}

#[derive(Debug, Serialize)]
pub struct RateEntry {
    pub currency: String,
    pub name: String,
    /// CNY per one unit of `currency`
    pub rate: f64,
}

#[derive(Debug, Serialize)]
pub struct ExchangeRatesResponse {
    pub base: &'static str,
    pub rates: Vec<RateEntry>,
}

#[derive(Debug, Serialize)]
pub struct MonthlyStatsResponse {
    pub year: i32,
    pub monthly: [f64; 12],
}

/// Result of the AI connectivity check
#[derive(Debug, Serialize)]
pub struct AiCheckResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub store: &'static str,
    pub webhook_configured: bool,
}
