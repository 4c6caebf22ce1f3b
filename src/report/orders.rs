use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

use super::money;
use crate::ledger::models::OrderRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductCount {
    pub product_name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryOrders {
    pub country: String,
    /// Quantity descending, then product name
    pub products: Vec<ProductCount>,
}

#[cfg(test)]
impl CountryOrders {
    pub fn quantity_of(&self, product_name: &str) -> Option<i64> {
        self.products
            .iter()
            .find(|p| p.product_name == product_name)
            .map(|p| p.quantity)
    }
}

/// Per-country product quantities for one business day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderDigest {
    pub date: NaiveDate,
    /// Amount of the day's daily-total record, 0 when none was entered
    pub headline_total: f64,
    /// Countries in alphabetical order
    pub countries: Vec<CountryOrders>,
}

impl OrderDigest {
    /// Group `orders` by country and product.
    ///
    /// Daily-total marker rows and rows with a non-positive quantity are left
    /// out; `daily_total` supplies the headline figure.
    pub fn build(date: NaiveDate, orders: &[OrderRecord], daily_total: Option<&OrderRecord>) -> Self {
        let mut grouped: BTreeMap<&str, BTreeMap<&str, i64>> = BTreeMap::new();
        for order in orders {
            if order.is_daily_total() || order.quantity <= 0 {
                continue;
            }
            *grouped
                .entry(order.country.as_str())
                .or_default()
                .entry(order.product_name.as_str())
                .or_default() += i64::from(order.quantity);
        }

        let countries = grouped
            .into_iter()
            .map(|(country, products)| {
                let mut products: Vec<ProductCount> = products
                    .into_iter()
                    .map(|(name, quantity)| ProductCount {
                        product_name: name.to_string(),
                        quantity,
                    })
                    .collect();
                products.sort_by(|a, b| {
                    b.quantity
                        .cmp(&a.quantity)
                        .then_with(|| a.product_name.cmp(&b.product_name))
                });
                CountryOrders {
                    country: country.to_string(),
                    products,
                }
            })
            .collect();

        Self {
            date,
            headline_total: daily_total.map(|o| o.total_amount).unwrap_or(0.0),
            countries,
        }
    }

    #[cfg(test)]
    pub fn country(&self, country: &str) -> Option<&CountryOrders> {
        self.countries.iter().find(|c| c.country == country)
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut buf = String::new();
        let _ = writeln!(buf, "**Order digest** {}", self.date);

        if self.headline_total > 0.0 {
            let _ = writeln!(buf, "\nDaily total (CNY): **{}**", money(self.headline_total));
        } else {
            buf.push_str("\nDaily total (CNY): **no daily total recorded**\n");
        }

        if self.is_empty() {
            buf.push_str("\nNo order details recorded for this day.\n");
            return buf;
        }

        for country in &self.countries {
            let _ = writeln!(buf, "\n> {}:", country.country);
            for product in &country.products {
                let _ = writeln!(buf, "> - {}: {} orders", product.product_name, product.quantity);
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::{DAILY_TOTAL_PRODUCT, LEGACY_DAILY_TOTAL_PRODUCT};
    use chrono::{TimeZone, Utc};

    fn order(id: i64, country: &str, product: &str, quantity: i32, amount: f64) -> OrderRecord {
        OrderRecord {
            id,
            owner_id: 1,
            country: country.to_string(),
            product_name: product.to_string(),
            quantity,
            total_amount: amount,
            currency: "CNY".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 4, 1, 3, id as u32, 0).unwrap(),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
    }

    #[test]
    fn test_groups_quantities_and_skips_daily_total() {
        let total = order(3, "A", DAILY_TOTAL_PRODUCT, 1, 888.0);
        let orders = vec![
            order(1, "A", "X", 3, 30.0),
            order(2, "A", "X", 2, 20.0),
            total.clone(),
        ];

        let digest = OrderDigest::build(day(), &orders, Some(&total));

        let a = digest.country("A").unwrap();
        assert_eq!(a.quantity_of("X"), Some(5));
        assert_eq!(a.quantity_of(DAILY_TOTAL_PRODUCT), None);
        assert_eq!(a.products.len(), 1);
        assert_eq!(digest.headline_total, 888.0);
    }

    #[test]
    fn test_skips_non_positive_quantities_and_legacy_marker() {
        let orders = vec![
            order(1, "B", "Y", 0, 10.0),
            order(2, "B", "Y", -1, 10.0),
            order(3, "B", LEGACY_DAILY_TOTAL_PRODUCT, 4, 10.0),
        ];
        let digest = OrderDigest::build(day(), &orders, None);
        assert!(digest.is_empty());
        assert_eq!(digest.headline_total, 0.0);
    }

    #[test]
    fn test_countries_sorted_and_products_by_quantity() {
        let orders = vec![
            order(1, "Philippines", "Case", 1, 1.0),
            order(2, "Indonesia", "Cable", 2, 1.0),
            order(3, "Philippines", "Charger", 4, 1.0),
            order(4, "Philippines", "Bag", 1, 1.0),
        ];
        let digest = OrderDigest::build(day(), &orders, None);

        let countries: Vec<&str> = digest.countries.iter().map(|c| c.country.as_str()).collect();
        assert_eq!(countries, vec!["Indonesia", "Philippines"]);

        let ph: Vec<&str> = digest.countries[1]
            .products
            .iter()
            .map(|p| p.product_name.as_str())
            .collect();
        assert_eq!(ph, vec!["Charger", "Bag", "Case"]);
    }

    #[test]
    fn test_render_empty_day_says_so() {
        let digest = OrderDigest::build(day(), &[], None);
        let text = digest.render();
        assert!(text.contains("2024-04-01"));
        assert!(text.contains("No order details recorded"));
        assert!(text.contains("no daily total recorded"));
    }

    #[test]
    fn test_render_lists_products() {
        let total = order(9, "A", DAILY_TOTAL_PRODUCT, 1, 1234.5);
        let digest = OrderDigest::build(day(), &[order(1, "A", "X", 3, 1.0)], Some(&total));
        let text = digest.render();
        assert!(text.contains("**¥1234.50**"));
        assert!(text.contains("> A:"));
        assert!(text.contains("> - X: 3 orders"));
    }
}
