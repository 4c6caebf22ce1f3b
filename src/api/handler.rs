use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use super::models::*;
use crate::{
    error::{AppError, AppResult},
    exchange::{currency_name, RateCache, HOME_CURRENCY},
    ledger::{models::ReportWindow, Page},
    report::{
        analyst::ReportAnalyst, AdDeductionPoint, OrderDigest, ReportService, SettlementDigest,
    },
    settlement::{NotifyStatus, SettlementResolver},
};

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<SettlementResolver>,
    pub reports: Arc<ReportService>,
    pub rates: Arc<RateCache>,
    /// Also used without a report by the AI connectivity check
    pub analyst: Arc<dyn ReportAnalyst>,
    /// "postgres" or "memory"
    pub store_kind: &'static str,
    pub webhook_configured: bool,
}

/// Save (create or overwrite) a settlement, then push that day's summary
/// POST /api/settlement
///
/// - A failed push still returns 200 with `notify_warning` set
pub async fn save_settlement(
    State(state): State<AppState>,
    Json(request): Json<SaveSettlementRequest>,
) -> AppResult<Json<SaveSettlementResponse>> {
    request.validate()?;
    let command = request.into_command()?;

    let outcome = state.resolver.save(command).await?;

    let notify_warning = match &outcome.notification {
        NotifyStatus::Failed { reason } => {
            Some(format!("Settlement saved, but the group notification failed: {}", reason))
        }
        NotifyStatus::Delivered | NotifyStatus::Skipped => None,
    };

    Ok(Json(SaveSettlementResponse {
        settlement: outcome.record,
        notification: outcome.notification,
        notify_warning,
    }))
}

/// Push the order digest for a day (default: today)
/// POST /api/notify/orders
pub async fn push_order_digest(
    State(state): State<AppState>,
    Query(query): Query<DateParam>,
    body: Option<Json<DateParam>>,
) -> AppResult<Json<PushResponse<OrderDigest>>> {
    let date = match query.parse()? {
        Some(date) => date,
        None => body
            .map(|Json(b)| b.parse())
            .transpose()?
            .flatten()
            .unwrap_or_else(|| state.reports.business_today()),
    };

    info!("📨 Manual order digest push for {}", date);
    let digest = state.reports.push_order_digest(date).await?;
    Ok(Json(PushResponse::sent(digest)))
}

/// Push the settlement summary for a day (default: yesterday)
/// POST /api/settlements/push
pub async fn push_settlement_day(
    State(state): State<AppState>,
    Query(query): Query<DateParam>,
    body: Option<Json<DateParam>>,
) -> AppResult<Json<PushResponse<SettlementDigest>>> {
    let date = match query.parse()? {
        Some(date) => date,
        None => body
            .map(|Json(b)| b.parse())
            .transpose()?
            .flatten()
            .unwrap_or_else(|| state.reports.business_yesterday()),
    };

    info!("📨 Manual settlement push for {}", date);
    let digest = state.reports.push_settlement_day(date).await?;
    Ok(Json(PushResponse::sent(digest)))
}

/// Push a settlement summary over an arbitrary date range
/// POST /api/settlements/push-range
pub async fn push_settlement_range(
    State(state): State<AppState>,
    Json(request): Json<PushRangeRequest>,
) -> AppResult<Json<PushResponse<SettlementDigest>>> {
    request.validate()?;
    let window = ReportWindow {
        start: parse_date("start", &request.start)?,
        end: parse_date("end", &request.end)?,
        kind: request.kind,
    };

    info!("📨 Manual {} settlement push for {}", window.kind, window);
    let digest = state.reports.push_settlement_range(window).await?;
    Ok(Json(PushResponse::sent(digest)))
}

/// Stored settlements, newest date first
/// GET /api/settlements?date=&country=&owner_id=&page=&page_size=
pub async fn list_settlements(
    State(state): State<AppState>,
    Query(query): Query<ListSettlementsQuery>,
) -> AppResult<Json<ListSettlementsResponse>> {
    let filter = query.filter()?;
    let (page, page_size) = query.page();

    let items = state
        .reports
        .list_settlements(&filter, Page::new(page_size, (page - 1) * page_size))
        .await?;

    Ok(Json(ListSettlementsResponse {
        page,
        page_size,
        items,
    }))
}

/// Current CNY conversion rates
/// GET /api/exchange/rates
pub async fn get_exchange_rates(
    State(state): State<AppState>,
) -> AppResult<Json<ExchangeRatesResponse>> {
    let table = state.rates.rates().await?;

    let mut rates: Vec<RateEntry> = table
        .iter()
        .map(|(code, rate)| RateEntry {
            currency: code.clone(),
            name: currency_name(code).to_string(),
            rate: *rate,
        })
        .collect();
    rates.sort_by(|a, b| a.currency.cmp(&b.currency));

    Ok(Json(ExchangeRatesResponse {
        base: HOME_CURRENCY,
        rates,
    }))
}

/// CNY rate for a single currency
/// GET /api/exchange/rates/:currency
pub async fn get_exchange_rate(
    State(state): State<AppState>,
    Path(currency): Path<String>,
) -> AppResult<Json<RateEntry>> {
    let code = currency.trim().to_uppercase();
    let rate = state
        .rates
        .get(&code)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No exchange rate for {}", code)))?;

    Ok(Json(RateEntry {
        name: currency_name(&code).to_string(),
        currency: code,
        rate,
    }))
}

/// Ad deduction per day over the last N days
/// GET /api/stats/ad-deduction/daily?days=N
pub async fn ad_deduction_daily(
    State(state): State<AppState>,
    Query(query): Query<DailyStatsQuery>,
) -> AppResult<Json<Vec<AdDeductionPoint>>> {
    let points = state.reports.ad_deduction_daily(query.days).await?;
    Ok(Json(points))
}

/// Ad deduction per month of a year
/// GET /api/stats/ad-deduction/monthly?year=Y
pub async fn ad_deduction_monthly(
    State(state): State<AppState>,
    Query(query): Query<MonthlyStatsQuery>,
) -> AppResult<Json<MonthlyStatsResponse>> {
    let (year, monthly) = state.reports.ad_deduction_monthly(query.year).await?;
    Ok(Json(MonthlyStatsResponse { year, monthly }))
}

/// Send a tiny payload to the configured model to check endpoint, key and model
/// POST /api/ai/test
///
/// - Transport or status failures surface as errors
/// - A reply without text is `ok: false` with a hint
pub async fn check_ai_config(State(state): State<AppState>) -> AppResult<Json<AiCheckResponse>> {
    let now = Utc::now().with_timezone(&state.reports.business_tz());
    let payload = serde_json::json!({
        "type": "config_test",
        "time": now.format("%Y-%m-%d %H:%M:%S").to_string(),
    });

    info!("🤖 Checking AI configuration");
    let response = match state.analyst.analyze(&payload).await? {
        Some(analysis) => AiCheckResponse {
            ok: true,
            analysis: Some(analysis),
            message: None,
        },
        None => AiCheckResponse {
            ok: false,
            analysis: None,
            message: Some(
                "The call succeeded but returned no text. Check the AI endpoint, key, model and permissions."
                    .to_string(),
            ),
        },
    };
    Ok(Json(response))
}

/// GET /health - Health check
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    if !state.webhook_configured {
        warn!("⚠️  Health check: no webhook destination configured");
    }

    Json(HealthResponse {
        status: if state.webhook_configured {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        timestamp: Utc::now(),
        store: state.store_kind,
        webhook_configured: state.webhook_configured,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::AiConfig;
    use crate::report::AiAnalyst;
    use crate::error::NotifyError;
    use crate::exchange::{RateSource, RateTable};
    use crate::ledger::MemoryLedger;
    use crate::notify::NotificationSink;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use chrono_tz::Tz;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Sink {
        down: bool,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for Sink {
        async fn send(&self, text: &str) -> Result<(), NotifyError> {
            if self.down {
                return Err(NotifyError::Transport("connection refused".to_string()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct FixedRates;

    #[async_trait]
    impl RateSource for FixedRates {
        async fn fetch_rates(&self) -> AppResult<RateTable> {
            Ok(RateTable::from([
                ("PHP".to_string(), 0.125),
                ("CNY".to_string(), 1.0),
            ]))
        }
    }

    fn state(sink: Arc<Sink>) -> AppState {
        let ledger = Arc::new(MemoryLedger::new());
        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2024, 4, 10, 3, 0, 0).unwrap(),
        ));
        let reports = Arc::new(ReportService::new(
            ledger.clone(),
            ledger.clone(),
            sink,
            clock.clone(),
            Tz::UTC,
        ));
        let resolver = Arc::new(
            SettlementResolver::new(ledger, clock, Tz::UTC).with_hook(reports.clone()),
        );

        AppState {
            resolver,
            reports,
            rates: Arc::new(RateCache::new(Arc::new(FixedRates), Duration::from_secs(600))),
            analyst: Arc::new(AiAnalyst::new(&AiConfig::default())),
            store_kind: "memory",
            webhook_configured: true,
        }
    }

    fn save_request(date: &str) -> SaveSettlementRequest {
        serde_json::from_value(serde_json::json!({
            "owner_id": 1,
            "date": date,
            "country": "PH",
            "currency": "PHP",
            "sale_total": 1000.0,
            "ad_cost": 100.0,
            "exchange_rate": 0.5,
            "goods_cost": 200.0,
            "misc_fee": 10.0,
            "flat_cost": 20.0
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_reports_notify_failure_as_warning() {
        let sink = Arc::new(Sink {
            down: true,
            ..Sink::default()
        });
        let Json(response) = save_settlement(State(state(sink)), Json(save_request("2024-04-09")))
            .await
            .unwrap();

        assert!((response.settlement.profit - 644.5).abs() < 1e-9);
        assert!(response.notification.is_failed());
        assert!(response
            .notify_warning
            .unwrap()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn test_save_rejects_malformed_date() {
        let sink = Arc::new(Sink::default());
        let err = save_settlement(State(state(sink.clone())), Json(save_request("9 April")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settlement_push_defaults_to_yesterday() {
        let sink = Arc::new(Sink::default());
        let Json(response) = push_settlement_day(
            State(state(sink.clone())),
            Query(DateParam::default()),
            None,
        )
        .await
        .unwrap();

        assert!(response.ok);
        assert_eq!(response.summary.window.start, NaiveDate::from_ymd_opt(2024, 4, 9).unwrap());
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_order_push_reads_date_from_body() {
        let sink = Arc::new(Sink::default());
        let Json(response) = push_order_digest(
            State(state(sink)),
            Query(DateParam::default()),
            Some(Json(DateParam {
                date: Some("2024-03-01".to_string()),
            })),
        )
        .await
        .unwrap();
        assert_eq!(response.summary.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[tokio::test]
    async fn test_range_push_rejects_inverted_range() {
        let sink = Arc::new(Sink::default());
        let request: PushRangeRequest =
            serde_json::from_str(r#"{"start":"2024-04-07","end":"2024-04-01"}"#).unwrap();
        let err = push_settlement_range(State(state(sink)), Json(request))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_list_pages_newest_first() {
        let state = state(Arc::new(Sink::default()));
        for date in ["2024-04-07", "2024-04-08", "2024-04-09"] {
            save_settlement(State(state.clone()), Json(save_request(date)))
                .await
                .unwrap();
        }

        let Json(response) = list_settlements(
            State(state),
            Query(ListSettlementsQuery {
                page: Some(2),
                page_size: Some(2),
                ..ListSettlementsQuery::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.page, 2);
        assert_eq!(response.items.len(), 1);
        assert_eq!(
            response.items[0].business_date,
            NaiveDate::from_ymd_opt(2024, 4, 7).unwrap()
        );
    }

    #[tokio::test]
    async fn test_exchange_rates_are_sorted_and_named() {
        let Json(response) = get_exchange_rates(State(state(Arc::new(Sink::default()))))
            .await
            .unwrap();
        assert_eq!(response.base, "CNY");
        let codes: Vec<&str> = response.rates.iter().map(|r| r.currency.as_str()).collect();
        assert_eq!(codes, vec!["CNY", "PHP"]);
        assert_eq!(response.rates[1].name, "Philippine peso");
        assert_eq!(response.rates[1].rate, 0.125);
    }

    struct EchoAnalyst;

    #[async_trait]
    impl ReportAnalyst for EchoAnalyst {
        async fn analyze(&self, summary: &serde_json::Value) -> AppResult<Option<String>> {
            Ok(Some(format!("saw {}", summary["type"])))
        }
    }

    #[tokio::test]
    async fn test_ai_check_reports_reply_or_hint() {
        let mut state = state(Arc::new(Sink::default()));

        // Unconfigured analyst returns no text
        let Json(response) = check_ai_config(State(state.clone())).await.unwrap();
        assert!(!response.ok);
        assert!(response.analysis.is_none());
        assert!(response.message.unwrap().contains("no text"));

        state.analyst = Arc::new(EchoAnalyst);
        let Json(response) = check_ai_config(State(state)).await.unwrap();
        assert!(response.ok);
        assert_eq!(response.analysis.as_deref(), Some("saw \"config_test\""));
    }

    #[tokio::test]
    async fn test_single_rate_lookup() {
        let state = state(Arc::new(Sink::default()));
        let Json(entry) = get_exchange_rate(State(state.clone()), Path("php".to_string()))
            .await
            .unwrap();
        assert_eq!(entry.currency, "PHP");
        assert_eq!(entry.rate, 0.125);

        let err = get_exchange_rate(State(state), Path("XYZ".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
