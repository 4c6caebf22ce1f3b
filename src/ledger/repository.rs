use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::models::{GroupBy, GroupTotal, OrderRecord, SettlementKey, SettlementRecord};
use super::{OrderFilter, OrderStore, Page, SettlementFilter, SettlementOrder, SettlementStore};
use crate::error::AppResult;

const SETTLEMENT_COLUMNS: &str = "id, owner_id, business_date, country, currency, \
     sale_total, ad_cost, exchange_rate, goods_cost, misc_fee, flat_cost, \
     ad_deduction, platform_fee, profit, remark, created_at, updated_at";

const ORDER_COLUMNS: &str =
    "id, owner_id, country, product_name, quantity, total_amount, currency, created_at";

/// Postgres-backed ledger
pub struct PgLedger {
    pub pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_settlement_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &SettlementFilter) {
    qb.push(" WHERE TRUE");
    if let Some(from) = filter.date_from {
        qb.push(" AND business_date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND business_date <= ").push_bind(to);
    }
    if let Some(owner) = filter.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner);
    }
    if let Some(country) = &filter.country {
        qb.push(" AND country = ").push_bind(country.clone());
    }
}

#[async_trait]
impl SettlementStore for PgLedger {
    async fn find_one(&self, key: &SettlementKey) -> AppResult<Option<SettlementRecord>> {
        let record = sqlx::query_as::<_, SettlementRecord>(&format!(
            "SELECT {} FROM daily_settlements \
             WHERE owner_id = $1 AND business_date = $2 AND country = $3",
            SETTLEMENT_COLUMNS
        ))
        .bind(key.owner_id)
        .bind(key.business_date)
        .bind(&key.country)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert(&self, record: SettlementRecord) -> AppResult<SettlementRecord> {
        // The unique key makes racing first writes collapse into one row; the
        // later statement wins every non-identity column.
        let stored = sqlx::query_as::<_, SettlementRecord>(&format!(
            r#"
            INSERT INTO daily_settlements ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (owner_id, business_date, country) DO UPDATE SET
                currency = EXCLUDED.currency,
                sale_total = EXCLUDED.sale_total,
                ad_cost = EXCLUDED.ad_cost,
                exchange_rate = EXCLUDED.exchange_rate,
                goods_cost = EXCLUDED.goods_cost,
                misc_fee = EXCLUDED.misc_fee,
                flat_cost = EXCLUDED.flat_cost,
                ad_deduction = EXCLUDED.ad_deduction,
                platform_fee = EXCLUDED.platform_fee,
                profit = EXCLUDED.profit,
                remark = EXCLUDED.remark,
                updated_at = EXCLUDED.updated_at
            RETURNING {cols}
            "#,
            cols = SETTLEMENT_COLUMNS
        ))
        .bind(record.id)
        .bind(record.owner_id)
        .bind(record.business_date)
        .bind(&record.country)
        .bind(&record.currency)
        .bind(record.sale_total)
        .bind(record.ad_cost)
        .bind(record.exchange_rate)
        .bind(record.goods_cost)
        .bind(record.misc_fee)
        .bind(record.flat_cost)
        .bind(record.ad_deduction)
        .bind(record.platform_fee)
        .bind(record.profit)
        .bind(&record.remark)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await?;

        debug!("💾 Settlement stored: {}", stored.key());
        Ok(stored)
    }

    async fn query(
        &self,
        filter: &SettlementFilter,
        order: SettlementOrder,
        page: Page,
    ) -> AppResult<Vec<SettlementRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM daily_settlements",
            SETTLEMENT_COLUMNS
        ));
        push_settlement_filter(&mut qb, filter);

        qb.push(match order {
            SettlementOrder::Chronological => {
                " ORDER BY business_date ASC, country ASC, created_at ASC"
            }
            SettlementOrder::NewestFirst => " ORDER BY business_date DESC, created_at ASC",
        });
        if let Some(limit) = page.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }
        if page.offset > 0 {
            qb.push(" OFFSET ").push_bind(page.offset);
        }

        let list = qb
            .build_query_as::<SettlementRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(list)
    }

    async fn aggregate(
        &self,
        group_by: GroupBy,
        filter: &SettlementFilter,
    ) -> AppResult<Vec<GroupTotal>> {
        let period = match group_by {
            GroupBy::Day => "business_date",
            GroupBy::Month => "date_trunc('month', business_date)::date",
        };

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {period} AS period_start, \
             COALESCE(SUM(sale_total), 0) AS sale_total, \
             COALESCE(SUM(ad_deduction), 0) AS ad_deduction, \
             COALESCE(SUM(profit), 0) AS profit, \
             COUNT(*) AS records \
             FROM daily_settlements",
            period = period
        ));
        push_settlement_filter(&mut qb, filter);
        qb.push(" GROUP BY period_start ORDER BY period_start ASC");

        let totals = qb
            .build_query_as::<GroupTotal>()
            .fetch_all(&self.pool)
            .await?;

        Ok(totals)
    }
}

#[async_trait]
impl OrderStore for PgLedger {
    async fn query_orders(&self, filter: &OrderFilter) -> AppResult<Vec<OrderRecord>> {
        let orders = sqlx::query_as::<_, OrderRecord>(&format!(
            "SELECT {} FROM orders \
             WHERE created_at >= $1 AND created_at < $2 \
             ORDER BY created_at ASC",
            ORDER_COLUMNS
        ))
        .bind(filter.created_from)
        .bind(filter.created_to)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn latest_order_for_product(
        &self,
        product_name: &str,
        filter: &OrderFilter,
    ) -> AppResult<Option<OrderRecord>> {
        let order = sqlx::query_as::<_, OrderRecord>(&format!(
            "SELECT {} FROM orders \
             WHERE product_name = $1 AND created_at >= $2 AND created_at < $3 \
             ORDER BY created_at DESC \
             LIMIT 1",
            ORDER_COLUMNS
        ))
        .bind(product_name)
        .bind(filter.created_from)
        .bind(filter.created_to)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }
}
