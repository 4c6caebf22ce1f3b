use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::models::{GroupBy, GroupTotal, OrderRecord, SettlementKey, SettlementRecord};
use super::{OrderFilter, OrderStore, Page, SettlementFilter, SettlementOrder, SettlementStore};
use crate::error::AppResult;

/// In-process ledger used when no database is configured, and by tests.
pub struct MemoryLedger {
    settlements: RwLock<HashMap<SettlementKey, SettlementRecord>>,
    orders: RwLock<Vec<OrderRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            settlements: RwLock::new(HashMap::new()),
            orders: RwLock::new(Vec::new()),
        }
    }

    #[cfg(test)]
    pub async fn insert_order(&self, order: OrderRecord) {
        self.orders.write().await.push(order);
    }

    #[cfg(test)]
    pub async fn settlement_count(&self) -> usize {
        self.settlements.read().await.len()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_settlements(list: &mut [SettlementRecord], order: SettlementOrder) {
    match order {
        SettlementOrder::Chronological => list.sort_by(|a, b| {
            a.business_date
                .cmp(&b.business_date)
                .then_with(|| a.country.cmp(&b.country))
                .then_with(|| a.created_at.cmp(&b.created_at))
        }),
        SettlementOrder::NewestFirst => list.sort_by(|a, b| {
            b.business_date
                .cmp(&a.business_date)
                .then_with(|| a.created_at.cmp(&b.created_at))
        }),
    }
}

#[async_trait]
impl SettlementStore for MemoryLedger {
    async fn find_one(&self, key: &SettlementKey) -> AppResult<Option<SettlementRecord>> {
        Ok(self.settlements.read().await.get(key).cloned())
    }

    async fn upsert(&self, record: SettlementRecord) -> AppResult<SettlementRecord> {
        let mut settlements = self.settlements.write().await;
        let stored = match settlements.get(&record.key()) {
            // Concurrent first writes race on the key; keep the surviving row's identity
            Some(existing) => SettlementRecord {
                id: existing.id,
                created_at: existing.created_at,
                ..record
            },
            None => record,
        };
        settlements.insert(stored.key(), stored.clone());
        Ok(stored)
    }

    async fn query(
        &self,
        filter: &SettlementFilter,
        order: SettlementOrder,
        page: Page,
    ) -> AppResult<Vec<SettlementRecord>> {
        let settlements = self.settlements.read().await;
        let mut list: Vec<SettlementRecord> = settlements
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sort_settlements(&mut list, order);

        let offset = page.offset.max(0) as usize;
        let list = list.into_iter().skip(offset);
        Ok(match page.limit {
            Some(limit) => list.take(limit.max(0) as usize).collect(),
            None => list.collect(),
        })
    }

    async fn aggregate(
        &self,
        group_by: GroupBy,
        filter: &SettlementFilter,
    ) -> AppResult<Vec<GroupTotal>> {
        let settlements = self.settlements.read().await;
        let mut groups: BTreeMap<chrono::NaiveDate, GroupTotal> = BTreeMap::new();

        for s in settlements.values().filter(|s| filter.matches(s)) {
            let period_start = group_by.period_start(s.business_date);
            let group = groups.entry(period_start).or_insert_with(|| GroupTotal {
                period_start,
                sale_total: 0.0,
                ad_deduction: 0.0,
                profit: 0.0,
                records: 0,
            });
            group.sale_total += s.sale_total;
            group.ad_deduction += s.ad_deduction;
            group.profit += s.profit;
            group.records += 1;
        }

        Ok(groups.into_values().collect())
    }
}

#[async_trait]
impl OrderStore for MemoryLedger {
    async fn query_orders(&self, filter: &OrderFilter) -> AppResult<Vec<OrderRecord>> {
        let orders = self.orders.read().await;
        let mut list: Vec<OrderRecord> = orders.iter().filter(|o| filter.matches(o)).cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    async fn latest_order_for_product(
        &self,
        product_name: &str,
        filter: &OrderFilter,
    ) -> AppResult<Option<OrderRecord>> {
        let orders = self.orders.read().await;
        Ok(orders
            .iter()
            .filter(|o| o.product_name == product_name && filter.matches(o))
            .max_by_key(|o| o.created_at)
            .cloned())
    }
}
