use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::analyst::ReportAnalyst;
use super::orders::OrderDigest;
use super::settlement::{analysis_section, AnalysisPayload, SettlementDigest};
use crate::clock::{day_bounds, Clock};
use crate::error::{AppError, AppResult};
use crate::ledger::models::{GroupBy, ReportWindow, SettlementRecord, DAILY_TOTAL_PRODUCT};
use crate::ledger::{OrderFilter, OrderStore, Page, SettlementFilter, SettlementOrder, SettlementStore};
use crate::notify::NotificationSink;
use crate::settlement::resolver::SettlementHook;

pub const DEFAULT_STAT_DAYS: i64 = 7;
pub const MAX_STAT_DAYS: i64 = 60;

/// Ad deduction summed over one period
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdDeductionPoint {
    pub period_start: NaiveDate,
    pub total: f64,
}

/// Builds report text from stored records and hands it to the sink.
///
/// Shared by the recurring jobs and the manual trigger endpoints.
pub struct ReportService {
    settlements: Arc<dyn SettlementStore>,
    orders: Arc<dyn OrderStore>,
    sink: Arc<dyn NotificationSink>,
    analyst: Option<Arc<dyn ReportAnalyst>>,
    clock: Arc<dyn Clock>,
    business_tz: Tz,
}

impl ReportService {
    pub fn new(
        settlements: Arc<dyn SettlementStore>,
        orders: Arc<dyn OrderStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        business_tz: Tz,
    ) -> Self {
        Self {
            settlements,
            orders,
            sink,
            analyst: None,
            clock,
            business_tz,
        }
    }

    pub fn with_analyst(mut self, analyst: Arc<dyn ReportAnalyst>) -> Self {
        self.analyst = Some(analyst);
        self
    }

    pub fn business_tz(&self) -> Tz {
        self.business_tz
    }

    pub fn business_today(&self) -> NaiveDate {
        self.clock.today_in(self.business_tz)
    }

    pub fn business_yesterday(&self) -> NaiveDate {
        self.business_today() - Duration::days(1)
    }

    pub async fn order_digest(&self, date: NaiveDate) -> AppResult<OrderDigest> {
        let (created_from, created_to) = day_bounds(date, self.business_tz);
        let filter = OrderFilter {
            created_from,
            created_to,
        };

        let orders = self.orders.query_orders(&filter).await?;
        let daily_total = self
            .orders
            .latest_order_for_product(DAILY_TOTAL_PRODUCT, &filter)
            .await?;

        Ok(OrderDigest::build(date, &orders, daily_total.as_ref()))
    }

    /// Per-country product counts for `date`, pushed to the chat group.
    pub async fn push_order_digest(&self, date: NaiveDate) -> AppResult<OrderDigest> {
        let digest = self.order_digest(date).await?;
        self.sink.send(&digest.render()).await?;
        info!(
            "📦 Order digest for {} pushed ({} countries)",
            date,
            digest.countries.len()
        );
        Ok(digest)
    }

    pub async fn settlement_digest(&self, window: ReportWindow) -> AppResult<SettlementDigest> {
        if window.start > window.end {
            return Err(AppError::InvalidInput(format!(
                "start date {} is after end date {}",
                window.start, window.end
            )));
        }

        let records = self
            .settlements
            .query(
                &SettlementFilter::between(window.start, window.end),
                SettlementOrder::Chronological,
                Page::all(),
            )
            .await?;

        Ok(SettlementDigest::build(window, records))
    }

    /// All owners' settlements for `date`.
    pub async fn push_settlement_day(&self, date: NaiveDate) -> AppResult<SettlementDigest> {
        let digest = self.settlement_digest(ReportWindow::day(date)).await?;
        self.sink.send(&digest.render()).await?;
        info!(
            "📊 Settlement summary for {} pushed ({} records)",
            date,
            digest.records.len()
        );
        Ok(digest)
    }

    /// Settlements in `window`, with the AI section when an analyst is
    /// configured and returns text.
    pub async fn push_settlement_range(&self, window: ReportWindow) -> AppResult<SettlementDigest> {
        let digest = self.settlement_digest(window).await?;

        let mut text = digest.render();
        if !digest.is_empty() {
            if let Some(analysis) = self.analysis_for(&digest).await {
                text.push_str(&analysis_section(&analysis));
            }
        }

        self.sink.send(&text).await?;
        info!(
            "📊 {} settlement summary for {} pushed ({} records)",
            window.kind,
            window,
            digest.records.len()
        );
        Ok(digest)
    }

    /// Reminder to finish the settlement check for `date`.
    pub async fn push_settlement_reminder(&self, date: NaiveDate) -> AppResult<String> {
        let text = format!(
            "**Daily settlement reminder** {}\n\nPlease complete the settlement check.\n",
            date
        );
        self.sink.send(&text).await?;
        info!("⏰ Settlement reminder for {} pushed", date);
        Ok(text)
    }

    async fn analysis_for(&self, digest: &SettlementDigest) -> Option<String> {
        let analyst = self.analyst.as_ref()?;

        let payload = match serde_json::to_value(AnalysisPayload::from(digest)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("⚠️  Could not encode summary for AI analysis: {}", e);
                return None;
            }
        };

        match analyst.analyze(&payload).await {
            Ok(text) => text,
            Err(e) => {
                warn!("⚠️  AI analysis failed, section omitted: {}", e);
                None
            }
        }
    }

    /// Stored settlements, newest business date first.
    pub async fn list_settlements(
        &self,
        filter: &SettlementFilter,
        page: Page,
    ) -> AppResult<Vec<SettlementRecord>> {
        self.settlements
            .query(filter, SettlementOrder::NewestFirst, page)
            .await
    }

    /// Daily ad deduction over the last `days` business days, today included.
    /// Days without settlements are absent. Out-of-range counts use the default.
    pub async fn ad_deduction_daily(&self, days: Option<i64>) -> AppResult<Vec<AdDeductionPoint>> {
        let days = days
            .filter(|d| (1..=MAX_STAT_DAYS).contains(d))
            .unwrap_or(DEFAULT_STAT_DAYS);
        let today = self.business_today();
        let filter = SettlementFilter::between(today - Duration::days(days - 1), today);

        let totals = self.settlements.aggregate(GroupBy::Day, &filter).await?;
        Ok(totals
            .into_iter()
            .map(|t| AdDeductionPoint {
                period_start: t.period_start,
                total: t.ad_deduction,
            })
            .collect())
    }

    /// Ad deduction per calendar month of `year` (defaults to the current
    /// business year), January first.
    pub async fn ad_deduction_monthly(&self, year: Option<i32>) -> AppResult<(i32, [f64; 12])> {
        use chrono::Datelike;

        let year = year.unwrap_or_else(|| self.business_today().year());
        let (Some(start), Some(end)) = (
            NaiveDate::from_ymd_opt(year, 1, 1),
            NaiveDate::from_ymd_opt(year, 12, 31),
        ) else {
            return Err(AppError::InvalidInput(format!("invalid year {}", year)));
        };

        let totals = self
            .settlements
            .aggregate(GroupBy::Month, &SettlementFilter::between(start, end))
            .await?;

        let mut monthly = [0.0; 12];
        for t in totals {
            if let Some(slot) = monthly.get_mut(t.period_start.month0() as usize) {
                *slot += t.ad_deduction;
            }
        }
        Ok((year, monthly))
    }
}

#[async_trait]
impl SettlementHook for ReportService {
    async fn after_save(&self, record: &SettlementRecord) -> AppResult<()> {
        self.push_settlement_day(record.business_date).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::NotifyError;
    use crate::ledger::models::{OrderRecord, WindowKind, LEGACY_DAILY_TOTAL_PRODUCT};
    use crate::ledger::MemoryLedger;
    use crate::settlement::formula::SettlementInputs;
    use crate::settlement::resolver::{NotifyStatus, SaveSettlement, SettlementResolver};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        fail: bool,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, text: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(text.to_string());
            if self.fail {
                Err(NotifyError::Status(500))
            } else {
                Ok(())
            }
        }
    }

    struct CannedAnalyst(AppResult<Option<String>>);

    #[async_trait]
    impl ReportAnalyst for CannedAnalyst {
        async fn analyze(&self, _summary: &Value) -> AppResult<Option<String>> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(AppError::ExternalError(e.to_string())),
            }
        }
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    // 2024-04-10 03:00 UTC = 10:00 in Jakarta
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 10, 3, 0, 0).unwrap()
    }

    fn service(ledger: Arc<MemoryLedger>, sink: Arc<RecordingSink>) -> ReportService {
        ReportService::new(
            ledger.clone(),
            ledger,
            sink,
            Arc::new(FixedClock(now())),
            chrono_tz::Asia::Jakarta,
        )
    }

    async fn save(ledger: &Arc<MemoryLedger>, day: NaiveDate, country: &str, sale_total: f64) {
        SettlementResolver::new(ledger.clone(), Arc::new(FixedClock(now())), Tz::UTC)
            .resolve(SaveSettlement {
                owner_id: 1,
                business_date: Some(day),
                country: country.to_string(),
                currency: "PHP".to_string(),
                inputs: SettlementInputs {
                    sale_total,
                    ad_cost: 100.0,
                    exchange_rate: 0.5,
                    ..SettlementInputs::default()
                },
                remark: String::new(),
            })
            .await
            .unwrap();
    }

    fn order(id: i64, product: &str, quantity: i32, amount: f64, at: DateTime<Utc>) -> OrderRecord {
        OrderRecord {
            id,
            owner_id: 1,
            country: "PH".to_string(),
            product_name: product.to_string(),
            quantity,
            total_amount: amount,
            currency: "CNY".to_string(),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_order_digest_uses_business_day_bounds() {
        let ledger = Arc::new(MemoryLedger::new());
        // April 9th in Jakarta runs from 04-08 17:00 UTC to 04-09 17:00 UTC
        let inside = Utc.with_ymd_and_hms(2024, 4, 8, 18, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2024, 4, 9, 17, 0, 0).unwrap();
        ledger.insert_order(order(1, "Cable", 2, 10.0, inside)).await;
        ledger.insert_order(order(2, "Cable", 7, 10.0, outside)).await;
        ledger
            .insert_order(order(3, DAILY_TOTAL_PRODUCT, 1, 100.0, inside))
            .await;
        ledger
            .insert_order(order(4, DAILY_TOTAL_PRODUCT, 1, 250.0, inside + Duration::hours(1)))
            .await;
        ledger
            .insert_order(order(5, LEGACY_DAILY_TOTAL_PRODUCT, 1, 999.0, inside + Duration::hours(2)))
            .await;

        let sink = Arc::new(RecordingSink::default());
        let digest = service(ledger, sink.clone())
            .push_order_digest(date(4, 9))
            .await
            .unwrap();

        assert_eq!(digest.country("PH").unwrap().quantity_of("Cable"), Some(2));
        assert_eq!(digest.country("PH").unwrap().products.len(), 1);
        assert_eq!(digest.headline_total, 250.0);
        assert_eq!(sink.messages().len(), 1);
        assert!(sink.messages()[0].contains("¥250.00"));
    }

    #[tokio::test]
    async fn test_empty_day_still_sends_no_data_message() {
        let sink = Arc::new(RecordingSink::default());
        let digest = service(Arc::new(MemoryLedger::new()), sink.clone())
            .push_settlement_day(date(4, 9))
            .await
            .unwrap();

        assert!(digest.is_empty());
        assert!(sink.messages()[0].contains("No settlement records for this day."));
    }

    #[tokio::test]
    async fn test_range_push_appends_analysis() {
        let ledger = Arc::new(MemoryLedger::new());
        save(&ledger, date(4, 2), "PH", 1000.0).await;
        save(&ledger, date(4, 8), "MY", 500.0).await;
        save(&ledger, date(3, 31), "MY", 500.0).await;

        let sink = Arc::new(RecordingSink::default());
        let svc = service(ledger, sink.clone())
            .with_analyst(Arc::new(CannedAnalyst(Ok(Some("Solid week.".to_string())))));

        let digest = svc
            .push_settlement_range(ReportWindow::week_ending(date(4, 8)))
            .await
            .unwrap();

        assert_eq!(digest.records.len(), 2);
        assert_eq!(digest.days.len(), 2);
        let text = &sink.messages()[0];
        assert!(text.contains("Weekly settlement summary"));
        assert!(text.contains("AI analysis"));
        assert!(text.contains("Solid week."));
    }

    #[tokio::test]
    async fn test_failed_analysis_omits_section() {
        let ledger = Arc::new(MemoryLedger::new());
        save(&ledger, date(3, 5), "PH", 1000.0).await;

        let sink = Arc::new(RecordingSink::default());
        let svc = service(ledger, sink.clone()).with_analyst(Arc::new(CannedAnalyst(Err(
            AppError::ExternalError("boom".to_string()),
        ))));

        let window = ReportWindow::month_before(date(4, 1));
        assert_eq!(window.kind, WindowKind::Monthly);
        let digest = svc.push_settlement_range(window).await.unwrap();

        assert_eq!(digest.records.len(), 1);
        assert!(!sink.messages()[0].contains("AI analysis"));
    }

    #[tokio::test]
    async fn test_inverted_range_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let err = service(Arc::new(MemoryLedger::new()), sink.clone())
            .push_settlement_range(ReportWindow {
                start: date(4, 9),
                end: date(4, 1),
                kind: WindowKind::Daily,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(sink.messages().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_is_returned() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let err = service(Arc::new(MemoryLedger::new()), sink)
            .push_settlement_reminder(date(4, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Notify(NotifyError::Status(500))));
    }

    #[tokio::test]
    async fn test_reminder_text_names_the_date() {
        let sink = Arc::new(RecordingSink::default());
        let text = service(Arc::new(MemoryLedger::new()), sink.clone())
            .push_settlement_reminder(date(4, 9))
            .await
            .unwrap();
        assert!(text.contains("2024-04-09"));
        assert_eq!(sink.messages(), vec![text]);
    }

    #[tokio::test]
    async fn test_resolver_hook_pushes_the_saved_day() {
        let ledger = Arc::new(MemoryLedger::new());
        let sink = Arc::new(RecordingSink::default());
        let svc = Arc::new(service(ledger.clone(), sink.clone()));
        let resolver = SettlementResolver::new(ledger, Arc::new(FixedClock(now())), Tz::UTC)
            .with_hook(svc);

        let outcome = resolver
            .save(SaveSettlement {
                owner_id: 3,
                business_date: Some(date(4, 9)),
                country: "ID".to_string(),
                currency: "IDR".to_string(),
                inputs: SettlementInputs {
                    sale_total: 1000.0,
                    ..SettlementInputs::default()
                },
                remark: String::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.notification, NotifyStatus::Delivered);
        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("2024-04-09"));
        assert!(messages[0].contains("> ID 2024-04-09"));
    }

    #[tokio::test]
    async fn test_ad_deduction_stats() {
        let ledger = Arc::new(MemoryLedger::new());
        // ad deduction per save: (100 + 11) * 0.5 = 55.5
        save(&ledger, date(4, 10), "PH", 10.0).await;
        save(&ledger, date(4, 10), "MY", 10.0).await;
        save(&ledger, date(4, 4), "PH", 10.0).await;
        save(&ledger, date(4, 3), "PH", 10.0).await;
        save(&ledger, date(1, 15), "PH", 10.0).await;

        let svc = service(ledger, Arc::new(RecordingSink::default()));

        let daily = svc.ad_deduction_daily(None).await.unwrap();
        assert_eq!(
            daily,
            vec![
                AdDeductionPoint {
                    period_start: date(4, 4),
                    total: 55.5
                },
                AdDeductionPoint {
                    period_start: date(4, 10),
                    total: 111.0
                },
            ]
        );
        // Out of range falls back to seven days
        assert_eq!(svc.ad_deduction_daily(Some(0)).await.unwrap(), daily);
        assert_eq!(svc.ad_deduction_daily(Some(8)).await.unwrap().len(), 3);

        let (year, monthly) = svc.ad_deduction_monthly(None).await.unwrap();
        assert_eq!(year, 2024);
        assert_eq!(monthly[0], 55.5);
        assert_eq!(monthly[3], 55.5 * 4.0);
        assert_eq!(monthly[11], 0.0);
    }
}
