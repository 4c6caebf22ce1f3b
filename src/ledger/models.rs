use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use std::fmt;
use uuid::Uuid;

/// Product name of the "daily total" pseudo-order. Its amount is the
/// authoritative total sales figure for a day.
pub const DAILY_TOTAL_PRODUCT: &str = "今日总额汇总";

/// Older spelling of the daily total marker, still present in historical rows.
pub const LEGACY_DAILY_TOTAL_PRODUCT: &str = "今日总汇";

pub fn is_daily_total_marker(product_name: &str) -> bool {
    product_name == DAILY_TOTAL_PRODUCT || product_name == LEGACY_DAILY_TOTAL_PRODUCT
}

/// Identity of a settlement: one record per owner, business day and country.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SettlementKey {
    pub owner_id: i64,
    pub business_date: NaiveDate,
    pub country: String,
}

impl fmt::Display for SettlementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner={} date={} country={}", self.owner_id, self.business_date, self.country)
    }
}

/// Daily profit settlement for one owner and country.
///
/// Raw inputs are in the sales currency except `exchange_rate`, which converts
/// the ad spend to the home currency. Derived fields are produced by
/// [`crate::settlement::formula::compute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SettlementRecord {
    pub id: Uuid,
    pub owner_id: i64,
    pub business_date: NaiveDate,
    pub country: String,
    pub currency: String,

    pub sale_total: f64,
    pub ad_cost: f64,
    pub exchange_rate: f64,
    pub goods_cost: f64,
    pub misc_fee: f64,
    pub flat_cost: f64,

    pub ad_deduction: f64,
    pub platform_fee: f64,
    pub profit: f64,

    pub remark: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementRecord {
    pub fn key(&self) -> SettlementKey {
        SettlementKey {
            owner_id: self.owner_id,
            business_date: self.business_date,
            country: self.country.clone(),
        }
    }
}

/// Order row as entered by operators. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderRecord {
    pub id: i64,
    pub owner_id: i64,
    pub country: String,
    pub product_name: String,
    pub quantity: i32,
    pub total_amount: f64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn is_daily_total(&self) -> bool {
        is_daily_total_marker(&self.product_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Daily,
    Weekly,
    Monthly,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Daily => "daily",
            WindowKind::Weekly => "weekly",
            WindowKind::Monthly => "monthly",
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed date interval a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub kind: WindowKind,
}

impl ReportWindow {
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
            kind: WindowKind::Daily,
        }
    }

    /// The seven days ending on (and including) `last_day`.
    pub fn week_ending(last_day: NaiveDate) -> Self {
        Self {
            start: last_day - chrono::Duration::days(6),
            end: last_day,
            kind: WindowKind::Weekly,
        }
    }

    /// The full calendar month preceding the month of `date`.
    pub fn month_before(date: NaiveDate) -> Self {
        let first_of_this_month = date.with_day(1).unwrap_or(date);
        let end = first_of_this_month.pred_opt().unwrap_or(first_of_this_month);
        let start = end.with_day(1).unwrap_or(end);
        Self {
            start,
            end,
            kind: WindowKind::Monthly,
        }
    }

    pub fn is_multi_day(&self) -> bool {
        self.end > self.start
    }
}

impl fmt::Display for ReportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_multi_day() {
            write!(f, "{} ~ {}", self.start, self.end)
        } else {
            write!(f, "{}", self.start)
        }
    }
}

/// Per-period totals returned by [`crate::ledger::SettlementStore::aggregate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GroupTotal {
    /// First day of the period (the day itself, or the first of the month)
    pub period_start: NaiveDate,
    pub sale_total: f64,
    pub ad_deduction: f64,
    pub profit: f64,
    pub records: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Day,
    Month,
}

impl GroupBy {
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            GroupBy::Day => date,
            GroupBy::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_week_ending_spans_seven_days() {
        let window = ReportWindow::week_ending(date(2024, 3, 10));
        assert_eq!(window.start, date(2024, 3, 4));
        assert_eq!(window.end, date(2024, 3, 10));
        assert_eq!((window.end - window.start).num_days() + 1, 7);
        assert!(window.is_multi_day());
    }

    #[test]
    fn test_month_before_handles_year_boundary_and_leap_years() {
        let jan = ReportWindow::month_before(date(2024, 1, 1));
        assert_eq!(jan.start, date(2023, 12, 1));
        assert_eq!(jan.end, date(2023, 12, 31));

        let feb = ReportWindow::month_before(date(2024, 3, 15));
        assert_eq!(feb.start, date(2024, 2, 1));
        assert_eq!(feb.end, date(2024, 2, 29));
        assert_eq!(feb.kind, WindowKind::Monthly);
    }

    #[test]
    fn test_daily_total_markers() {
        assert!(is_daily_total_marker(DAILY_TOTAL_PRODUCT));
        assert!(is_daily_total_marker(LEGACY_DAILY_TOTAL_PRODUCT));
        assert!(!is_daily_total_marker("Phone case"));
    }

    #[test]
    fn test_window_display() {
        assert_eq!(ReportWindow::day(date(2024, 5, 1)).to_string(), "2024-05-01");
        assert_eq!(
            ReportWindow::week_ending(date(2024, 5, 7)).to_string(),
            "2024-05-01 ~ 2024-05-07"
        );
    }
}
