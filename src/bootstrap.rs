use std::{sync::Arc, time::Duration};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    api::handler::AppState,
    clock::{Clock, SystemClock},
    config::AppConfig,
    error::AppResult,
    exchange::{ExchangeRateHost, RateCache},
    ledger::{MemoryLedger, OrderStore, PgLedger, SettlementStore},
    notify::WecomNotifier,
    report::{AiAnalyst, ReportService},
    settlement::{scheduler::default_jobs, ReportScheduler, SettlementResolver},
};

/// Everything `main` needs: request state plus the background scheduler
pub struct App {
    pub state: AppState,
    pub scheduler: ReportScheduler,
}

pub async fn initialize_app(config: &AppConfig, shutdown: CancellationToken) -> AppResult<App> {
    info!("Initializing application components ...");

    let business_tz = config.timezones.business_tz();
    let schedule_tz = config.timezones.schedule_tz();
    info!("🕐 Business timezone: {}, schedule timezone: {}", business_tz, schedule_tz);

    // Record store
    let (settlements, orders, store_kind): (Arc<dyn SettlementStore>, Arc<dyn OrderStore>, &'static str) =
        match config.database_url.as_deref() {
            Some(url) => {
                let ledger = Arc::new(PgLedger::new(initialize_database(url).await?));
                (
                    ledger.clone() as Arc<dyn SettlementStore>,
                    ledger as Arc<dyn OrderStore>,
                    "postgres",
                )
            }
            None => {
                warn!("⚠️  DATABASE_URL not set - using in-memory store, data is lost on restart");
                let ledger = Arc::new(MemoryLedger::new());
                (
                    ledger.clone() as Arc<dyn SettlementStore>,
                    ledger as Arc<dyn OrderStore>,
                    "memory",
                )
            }
        };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Chat webhook
    let notifier = Arc::new(WecomNotifier::from_config(config.wecom.webhook.as_deref()));
    let webhook_configured = notifier.is_configured();
    if webhook_configured {
        info!("✅ Webhook notifier configured");
    } else {
        warn!("⚠️  No webhook destination configured - report pushes will fail");
    }

    // Reports, with the optional AI section
    let mut reports = ReportService::new(
        settlements.clone(),
        orders,
        notifier,
        clock.clone(),
        business_tz,
    );
    let analyst = Arc::new(AiAnalyst::new(&config.ai));
    if analyst.is_enabled() {
        info!("✅ AI analysis enabled");
        reports = reports.with_analyst(analyst.clone());
    } else {
        info!("AI analysis disabled (ai.endpoint, ai.api_key and ai.model are all required)");
    }
    let reports = Arc::new(reports);

    let resolver = Arc::new(
        SettlementResolver::new(settlements, clock.clone(), business_tz).with_hook(reports.clone()),
    );

    let rates = Arc::new(RateCache::new(
        Arc::new(ExchangeRateHost::new(&config.exchange)),
        Duration::from_secs(config.exchange.ttl_secs),
    ));

    let scheduler = ReportScheduler::new(
        reports.clone(),
        clock,
        default_jobs(&config.wecom),
        schedule_tz,
        shutdown,
    );

    info!("✓ Application components initialized");
    Ok(App {
        state: AppState {
            resolver,
            reports,
            rates,
            analyst,
            store_kind,
            webhook_configured,
        },
        scheduler,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
