// Recurring report jobs
//
// Four independent tasks, each computing its next fire instant in the
// scheduling timezone, sleeping until then, pushing its report and looping.
// Report windows are derived from the fire instant in the business timezone.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::clock::Clock;
use crate::config::WecomConfig;
use crate::error::AppResult;
use crate::ledger::models::ReportWindow;
use crate::report::ReportService;

/// Days scanned when looking for the next matching date
const SEARCH_HORIZON_DAYS: i64 = 400;

/// Recurrence rule, interpreted in the scheduling timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Daily { at: NaiveTime },
    Weekly { weekday: Weekday, at: NaiveTime },
    /// Months without `day` are skipped
    Monthly { day: u32, at: NaiveTime },
}

impl Schedule {
    fn at(&self) -> NaiveTime {
        match self {
            Schedule::Daily { at } | Schedule::Weekly { at, .. } | Schedule::Monthly { at, .. } => *at,
        }
    }

    fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Schedule::Daily { .. } => true,
            Schedule::Weekly { weekday, .. } => date.weekday() == *weekday,
            Schedule::Monthly { day, .. } => date.day() == *day,
        }
    }

    /// First instant strictly after `now` that matches the rule in `tz`.
    ///
    /// A wall time skipped by a DST jump fires an hour later that day; an
    /// ambiguous one fires at its first occurrence.
    pub fn next_fire(&self, now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        let today = now.with_timezone(&tz).date_naive();

        (0..SEARCH_HORIZON_DAYS)
            .filter_map(|offset| today.checked_add_signed(ChronoDuration::days(offset)))
            .filter(|date| self.matches(*date))
            .filter_map(|date| local_instant(date, self.at(), tz))
            .find(|fire| *fire > now)
            .unwrap_or_else(|| now + ChronoDuration::days(1))
    }
}

fn local_instant(date: NaiveDate, at: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = date.and_time(at);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + ChronoDuration::hours(1))).earliest())
        .map(|local| local.with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    OrderDigest,
    SettlementReminder,
    WeeklyRollup,
    MonthlyRollup,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::OrderDigest => "order digest",
            JobKind::SettlementReminder => "settlement reminder",
            JobKind::WeeklyRollup => "weekly settlement rollup",
            JobKind::MonthlyRollup => "monthly settlement rollup",
        };
        f.write_str(name)
    }
}

impl JobKind {
    /// Dates the job reports on when it fires at `fired_at`.
    pub fn window(&self, fired_at: DateTime<Utc>, business_tz: Tz) -> ReportWindow {
        let today = fired_at.with_timezone(&business_tz).date_naive();
        let yesterday = today.pred_opt().unwrap_or(today);

        match self {
            JobKind::OrderDigest | JobKind::SettlementReminder => ReportWindow::day(yesterday),
            JobKind::WeeklyRollup => ReportWindow::week_ending(yesterday),
            JobKind::MonthlyRollup => ReportWindow::month_before(today),
        }
    }

    async fn fire(&self, service: &ReportService, window: ReportWindow) -> AppResult<()> {
        match self {
            JobKind::OrderDigest => service.push_order_digest(window.start).await.map(|_| ()),
            JobKind::SettlementReminder => {
                service.push_settlement_reminder(window.start).await.map(|_| ())
            }
            JobKind::WeeklyRollup | JobKind::MonthlyRollup => {
                service.push_settlement_range(window).await.map(|_| ())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledJob {
    pub kind: JobKind,
    pub schedule: Schedule,
}

impl ScheduledJob {
    /// Next fire instant strictly after both `now` and the previous fire.
    pub fn next_fire(
        &self,
        now: DateTime<Utc>,
        last_fired: Option<DateTime<Utc>>,
        tz: Tz,
    ) -> DateTime<Utc> {
        let from = last_fired.map_or(now, |last| now.max(last));
        self.schedule.next_fire(from, tz)
    }
}

/// The standard job set built from the webhook push times.
pub fn default_jobs(config: &WecomConfig) -> Vec<ScheduledJob> {
    vec![
        ScheduledJob {
            kind: JobKind::OrderDigest,
            schedule: Schedule::Daily {
                at: config.order_digest_at(),
            },
        },
        ScheduledJob {
            kind: JobKind::SettlementReminder,
            schedule: Schedule::Daily {
                at: config.settlement_reminder_at(),
            },
        },
        ScheduledJob {
            kind: JobKind::WeeklyRollup,
            schedule: Schedule::Weekly {
                weekday: Weekday::Mon,
                at: config.weekly_rollup_at(),
            },
        },
        ScheduledJob {
            kind: JobKind::MonthlyRollup,
            schedule: Schedule::Monthly {
                day: 1,
                at: config.monthly_rollup_at(),
            },
        },
    ]
}

/// Runs report jobs until its cancellation token fires
pub struct ReportScheduler {
    service: Arc<ReportService>,
    clock: Arc<dyn Clock>,
    jobs: Vec<ScheduledJob>,
    schedule_tz: Tz,
    cancel: CancellationToken,
}

impl ReportScheduler {
    pub fn new(
        service: Arc<ReportService>,
        clock: Arc<dyn Clock>,
        jobs: Vec<ScheduledJob>,
        schedule_tz: Tz,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            clock,
            jobs,
            schedule_tz,
            cancel,
        }
    }

    /// Spawn one task per job.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.jobs
            .iter()
            .map(|job| {
                let job = *job;
                let service = self.service.clone();
                let clock = self.clock.clone();
                let schedule_tz = self.schedule_tz;
                let cancel = self.cancel.clone();

                tokio::spawn(async move {
                    Self::run_job(job, service, clock, schedule_tz, cancel).await
                })
            })
            .collect()
    }

    async fn run_job(
        job: ScheduledJob,
        service: Arc<ReportService>,
        clock: Arc<dyn Clock>,
        schedule_tz: Tz,
        cancel: CancellationToken,
    ) {
        let mut last_fired = None;
        loop {
            let now = clock.now();
            let next = job.next_fire(now, last_fired, schedule_tz);
            let wait = (next - now).to_std().unwrap_or_default();

            info!(
                "⏰ Next {} scheduled for {}",
                job.kind,
                next.with_timezone(&schedule_tz).format("%Y-%m-%d %H:%M %Z")
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("🛑 {} job stopped", job.kind);
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            last_fired = Some(next);
            let window = job.kind.window(next, service.business_tz());
            info!("🔄 Running {} for {}", job.kind, window);

            if let Err(e) = job.kind.fire(&service, window).await {
                error!("❌ {} failed: {}", job.kind, e);
            }
        }
    }
}
