// Record store: settlement rows are read and written, order rows are read-only.
pub mod memory;
pub mod models;
pub mod repository;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::AppResult;
use models::{GroupBy, GroupTotal, OrderRecord, SettlementKey, SettlementRecord};

pub use memory::MemoryLedger;
pub use repository::PgLedger;

/// Settlement query filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub owner_id: Option<i64>,
    pub country: Option<String>,
}

impl SettlementFilter {
    pub fn on(date: NaiveDate) -> Self {
        Self::between(date, date)
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            date_from: Some(start),
            date_to: Some(end),
            ..Self::default()
        }
    }

    pub fn owner(mut self, owner_id: i64) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn matches(&self, record: &SettlementRecord) -> bool {
        self.date_from.map_or(true, |d| record.business_date >= d)
            && self.date_to.map_or(true, |d| record.business_date <= d)
            && self.owner_id.map_or(true, |o| record.owner_id == o)
            && self.country.as_deref().map_or(true, |c| record.country == c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettlementOrder {
    /// date asc, country asc, created_at asc
    #[default]
    Chronological,
    /// date desc, created_at asc
    NewestFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: i64,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }
}

/// Orders created in `[created_from, created_to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderFilter {
    pub created_from: DateTime<Utc>,
    pub created_to: DateTime<Utc>,
}

impl OrderFilter {
    pub fn matches(&self, order: &OrderRecord) -> bool {
        order.created_at >= self.created_from && order.created_at < self.created_to
    }
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn find_one(&self, key: &SettlementKey) -> AppResult<Option<SettlementRecord>>;

    /// Persist `record`, replacing whatever is stored under its key.
    /// Returns the row as stored.
    async fn upsert(&self, record: SettlementRecord) -> AppResult<SettlementRecord>;

    async fn query(
        &self,
        filter: &SettlementFilter,
        order: SettlementOrder,
        page: Page,
    ) -> AppResult<Vec<SettlementRecord>>;

    /// Totals per period, sorted by period.
    async fn aggregate(
        &self,
        group_by: GroupBy,
        filter: &SettlementFilter,
    ) -> AppResult<Vec<GroupTotal>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn query_orders(&self, filter: &OrderFilter) -> AppResult<Vec<OrderRecord>>;

    /// Most recently created order for `product_name` within the filter window.
    async fn latest_order_for_product(
        &self,
        product_name: &str,
        filter: &OrderFilter,
    ) -> AppResult<Option<OrderRecord>>;
}
