use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

use super::{money, plain};
use crate::ledger::models::{ReportWindow, SettlementRecord, WindowKind};

/// Column sums over a set of settlements
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SettlementTotals {
    pub sale_total: f64,
    pub ad_cost: f64,
    pub ad_deduction: f64,
    pub goods_cost: f64,
    pub platform_fee: f64,
    pub misc_fee: f64,
    pub flat_cost: f64,
    pub profit: f64,
}

impl SettlementTotals {
    pub fn add(&mut self, s: &SettlementRecord) {
        self.sale_total += s.sale_total;
        self.ad_cost += s.ad_cost;
        self.ad_deduction += s.ad_deduction;
        self.goods_cost += s.goods_cost;
        self.platform_fee += s.platform_fee;
        self.misc_fee += s.misc_fee;
        self.flat_cost += s.flat_cost;
        self.profit += s.profit;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryTotals {
    pub country: String,
    pub totals: SettlementTotals,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DayProfit {
    pub date: NaiveDate,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extreme<K> {
    pub key: K,
    pub profit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyAverage {
    pub days_with_data: usize,
    pub average_profit: f64,
}

/// Settlement rollup for a report window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementDigest {
    pub window: ReportWindow,
    /// Records in the order they were supplied
    pub records: Vec<SettlementRecord>,
    pub totals: SettlementTotals,
    /// Alphabetical by country
    pub countries: Vec<CountryTotals>,
    /// Chronological
    pub days: Vec<DayProfit>,
    pub best_country: Option<Extreme<String>>,
    pub worst_country: Option<Extreme<String>>,
    pub best_day: Option<Extreme<NaiveDate>>,
    pub worst_day: Option<Extreme<NaiveDate>>,
    /// Only for windows longer than one day
    pub average: Option<DailyAverage>,
}

/// Highest and lowest entries. Ties keep the earliest entry, so callers must
/// pass items in their display order.
fn extrema<K: Clone>(items: impl IntoIterator<Item = (K, f64)>) -> (Option<Extreme<K>>, Option<Extreme<K>>) {
    let mut best: Option<Extreme<K>> = None;
    let mut worst: Option<Extreme<K>> = None;

    for (key, profit) in items {
        if best.as_ref().map_or(true, |b| profit > b.profit) {
            best = Some(Extreme {
                key: key.clone(),
                profit,
            });
        }
        if worst.as_ref().map_or(true, |w| profit < w.profit) {
            worst = Some(Extreme { key, profit });
        }
    }

    (best, worst)
}

impl SettlementDigest {
    pub fn build(window: ReportWindow, records: Vec<SettlementRecord>) -> Self {
        let mut totals = SettlementTotals::default();
        let mut by_country: BTreeMap<String, SettlementTotals> = BTreeMap::new();
        let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();

        for s in &records {
            totals.add(s);
            by_country.entry(s.country.clone()).or_default().add(s);
            *by_day.entry(s.business_date).or_default() += s.profit;
        }

        let countries: Vec<CountryTotals> = by_country
            .into_iter()
            .map(|(country, totals)| CountryTotals { country, totals })
            .collect();
        let days: Vec<DayProfit> = by_day
            .into_iter()
            .map(|(date, profit)| DayProfit { date, profit })
            .collect();

        let (best_country, worst_country) =
            extrema(countries.iter().map(|c| (c.country.clone(), c.totals.profit)));
        let (best_day, worst_day) = extrema(days.iter().map(|d| (d.date, d.profit)));

        let average = window.is_multi_day().then(|| {
            let days_with_data = days.len();
            let average_profit = if days_with_data > 0 {
                totals.profit / days_with_data as f64
            } else {
                0.0
            };
            DailyAverage {
                days_with_data,
                average_profit,
            }
        });

        Self {
            window,
            records,
            totals,
            countries,
            days,
            best_country,
            worst_country,
            best_day,
            worst_day,
            average,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn country(&self, country: &str) -> Option<&CountryTotals> {
        self.countries.iter().find(|c| c.country == country)
    }

    fn title(&self) -> &'static str {
        match (self.window.kind, self.window.is_multi_day()) {
            (WindowKind::Weekly, _) => "Weekly settlement summary",
            (WindowKind::Monthly, _) => "Monthly settlement summary",
            (WindowKind::Daily, false) => "Daily settlement summary",
            (WindowKind::Daily, true) => "Settlement summary",
        }
    }

    pub fn render(&self) -> String {
        if self.window.is_multi_day() || self.window.kind != WindowKind::Daily {
            self.render_range()
        } else {
            self.render_day()
        }
    }

    fn render_day(&self) -> String {
        let mut buf = String::new();
        let _ = writeln!(buf, "**{}** {}", self.title(), self.window);

        if self.is_empty() {
            buf.push_str("\nNo settlement records for this day.\n");
            return buf;
        }

        let t = &self.totals;
        buf.push_str("\n**Overall (CNY)**\n");
        let _ = writeln!(buf, "> Sales: {}", money(t.sale_total));
        let _ = writeln!(
            buf,
            "> Ad cost: {}, Goods cost: {}",
            money(t.ad_deduction),
            money(t.goods_cost)
        );
        let _ = writeln!(
            buf,
            "> Platform fee: {}, Misc fee: {}, Flat cost: {}",
            money(t.platform_fee),
            money(t.misc_fee),
            money(t.flat_cost)
        );
        let _ = writeln!(buf, "> **Total profit: {}**", money(t.profit));

        buf.push_str("\n**By country**\n");
        for s in &self.records {
            let _ = writeln!(buf, "\n> {} {}", s.country, s.business_date);
            let _ = writeln!(
                buf,
                "> Sales: {} | Ad cost: {} | Goods: {}",
                money(s.sale_total),
                money(s.ad_deduction),
                money(s.goods_cost)
            );
            let _ = writeln!(
                buf,
                "> Platform: {} | Misc: {} | Flat: {} | Profit: **{}**",
                money(s.platform_fee),
                money(s.misc_fee),
                money(s.flat_cost),
                money(s.profit)
            );
        }
        buf
    }

    fn render_range(&self) -> String {
        let mut buf = String::new();
        let _ = writeln!(buf, "**{}** {} ~ {}", self.title(), self.window.start, self.window.end);

        if self.is_empty() {
            buf.push_str("\nNo settlement records in this period.\n");
            return buf;
        }

        buf.push_str("\n**1. Details**\n");
        buf.push_str("\n| Date | Country | Sales | Ad cost | Goods | Platform | Misc | Flat | Profit |\n");
        buf.push_str("| --- | --- | --- | --- | --- | --- | --- | --- | --- |\n");
        for s in &self.records {
            let _ = writeln!(
                buf,
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                s.business_date,
                s.country,
                plain(s.sale_total),
                plain(s.ad_deduction),
                plain(s.goods_cost),
                plain(s.platform_fee),
                plain(s.misc_fee),
                plain(s.flat_cost),
                plain(s.profit)
            );
        }

        let t = &self.totals;
        buf.push_str("\n**2. Totals (CNY)**\n\n");
        let _ = writeln!(buf, "- Sales: {}", plain(t.sale_total));
        let _ = writeln!(buf, "- Ad cost: {}", plain(t.ad_deduction));
        let _ = writeln!(buf, "- Goods cost: {}", plain(t.goods_cost));
        let _ = writeln!(buf, "- Platform fee: {}", plain(t.platform_fee));
        let _ = writeln!(buf, "- Misc fee: {}", plain(t.misc_fee));
        let _ = writeln!(buf, "- Flat cost: {}", plain(t.flat_cost));
        let _ = writeln!(buf, "- Profit: {}", plain(t.profit));

        buf.push_str("\n**3. By country (CNY)**\n");
        buf.push_str("\n| Country | Sales | Ad cost | Goods | Platform | Misc | Flat | Profit |\n");
        buf.push_str("| --- | --- | --- | --- | --- | --- | --- | --- |\n");
        for c in &self.countries {
            let ct = &c.totals;
            let _ = writeln!(
                buf,
                "| {} | {} | {} | {} | {} | {} | {} | {} |",
                c.country,
                plain(ct.sale_total),
                plain(ct.ad_deduction),
                plain(ct.goods_cost),
                plain(ct.platform_fee),
                plain(ct.misc_fee),
                plain(ct.flat_cost),
                plain(ct.profit)
            );
        }

        buf.push_str("\n**4. Analysis**\n\n");
        if let Some(avg) = &self.average {
            let _ = writeln!(
                buf,
                "- Days settled: {}, total profit: {}, average per day: {}.",
                avg.days_with_data,
                plain(t.profit),
                plain(avg.average_profit)
            );
        }
        if let Some(best) = &self.best_country {
            let _ = writeln!(buf, "- Most profitable country: {} ({}).", best.key, plain(best.profit));
            if let Some(worst) = self.worst_country.as_ref().filter(|w| w.key != best.key) {
                let _ = writeln!(buf, "- Least profitable country: {} ({}).", worst.key, plain(worst.profit));
            }
        }
        if let Some(best) = &self.best_day {
            let _ = writeln!(buf, "- Best day: {} ({}).", best.key, plain(best.profit));
            if let Some(worst) = self.worst_day.as_ref().filter(|w| w.key != best.key) {
                let _ = writeln!(buf, "- Worst day: {} ({}).", worst.key, plain(worst.profit));
            }
        }
        buf
    }
}

/// Section appended to a range report when an analysis was produced.
pub fn analysis_section(analysis: &str) -> String {
    format!("\n**5. AI analysis**\n\n{}\n", analysis.trim())
}

/// Compact figures handed to the analysis model
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisPayload<'a> {
    pub report_type: &'static str,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total: &'a SettlementTotals,
    pub countries: BTreeMap<&'a str, &'a SettlementTotals>,
    pub day_profit: BTreeMap<NaiveDate, f64>,
}

impl<'a> From<&'a SettlementDigest> for AnalysisPayload<'a> {
    fn from(digest: &'a SettlementDigest) -> Self {
        Self {
            report_type: digest.window.kind.as_str(),
            start_date: digest.window.start,
            end_date: digest.window.end,
            total: &digest.totals,
            countries: digest
                .countries
                .iter()
                .map(|c| (c.country.as_str(), &c.totals))
                .collect(),
            day_profit: digest.days.iter().map(|d| (d.date, d.profit)).collect(),
        }
    }
}
