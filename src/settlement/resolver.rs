use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::formula::{self, SettlementInputs};
use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::ledger::models::{SettlementKey, SettlementRecord};
use crate::ledger::SettlementStore;

/// One settlement computation as submitted by an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveSettlement {
    pub owner_id: i64,
    /// Defaults to today in the business timezone
    pub business_date: Option<NaiveDate>,
    pub country: String,
    pub currency: String,
    pub inputs: SettlementInputs,
    pub remark: String,
}

/// Runs after a settlement has been committed.
#[async_trait]
pub trait SettlementHook: Send + Sync {
    async fn after_save(&self, record: &SettlementRecord) -> AppResult<()>;
}

/// Result of the post-write notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotifyStatus {
    Delivered,
    Skipped,
    Failed { reason: String },
}

#[cfg(test)]
impl NotifyStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, NotifyStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub record: SettlementRecord,
    pub notification: NotifyStatus,
}

/// Creates or overwrites the single settlement stored per
/// (owner, business date, country).
///
/// Read-then-write without a transaction: concurrent saves for the same key
/// resolve last-writer-wins in the store.
pub struct SettlementResolver {
    store: Arc<dyn SettlementStore>,
    clock: Arc<dyn Clock>,
    business_tz: Tz,
    hook: Option<Arc<dyn SettlementHook>>,
}

impl SettlementResolver {
    pub fn new(store: Arc<dyn SettlementStore>, clock: Arc<dyn Clock>, business_tz: Tz) -> Self {
        Self {
            store,
            clock,
            business_tz,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn SettlementHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Upsert only. Store failures are returned as-is.
    pub async fn resolve(&self, request: SaveSettlement) -> AppResult<SettlementRecord> {
        let key = self.key_for(&request)?;
        let figures = formula::compute(&request.inputs);
        let now = self.clock.now();

        let existing = self.store.find_one(&key).await?;
        let created = existing.is_none();

        let (id, created_at) = match &existing {
            Some(prior) => (prior.id, prior.created_at),
            None => (Uuid::new_v4(), now),
        };

        let record = SettlementRecord {
            id,
            owner_id: key.owner_id,
            business_date: key.business_date,
            country: key.country,
            currency: request.currency.trim().to_string(),
            sale_total: request.inputs.sale_total,
            ad_cost: request.inputs.ad_cost,
            exchange_rate: request.inputs.exchange_rate,
            goods_cost: request.inputs.goods_cost,
            misc_fee: request.inputs.misc_fee,
            flat_cost: request.inputs.flat_cost,
            ad_deduction: figures.ad_deduction,
            platform_fee: figures.platform_fee,
            profit: figures.profit,
            remark: request.remark,
            created_at,
            updated_at: now,
        };

        let stored = self.store.upsert(record).await?;
        info!(
            "✓ Settlement {}: {} profit={:.2}",
            if created { "created" } else { "updated" },
            stored.key(),
            stored.profit
        );
        Ok(stored)
    }

    /// Upsert, then run the post-write hook. A hook failure never undoes the
    /// write; it is reported in [`SaveOutcome::notification`].
    pub async fn save(&self, request: SaveSettlement) -> AppResult<SaveOutcome> {
        let record = self.resolve(request).await?;

        let notification = match &self.hook {
            None => NotifyStatus::Skipped,
            Some(hook) => match hook.after_save(&record).await {
                Ok(()) => NotifyStatus::Delivered,
                Err(e) => {
                    warn!("⚠️  Settlement saved but notification failed: {}", e);
                    NotifyStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            },
        };

        Ok(SaveOutcome {
            record,
            notification,
        })
    }

    fn key_for(&self, request: &SaveSettlement) -> AppResult<SettlementKey> {
        if request.owner_id <= 0 {
            return Err(AppError::InvalidInput("owner_id is required".into()));
        }
        let country = request.country.trim();
        if country.is_empty() {
            return Err(AppError::InvalidInput("country is required".into()));
        }

        let business_date = request
            .business_date
            .unwrap_or_else(|| self.clock.today_in(self.business_tz));

        Ok(SettlementKey {
            owner_id: request.owner_id,
            business_date,
            country: country.to_string(),
        })
    }
}
