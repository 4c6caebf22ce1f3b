// Read -> format -> dispatch for the chat reports
pub mod analyst;
pub mod orders;
pub mod service;
pub mod settlement;

pub use analyst::AiAnalyst;
pub use orders::OrderDigest;
pub use service::{AdDeductionPoint, ReportService};
pub use settlement::SettlementDigest;

/// Two-decimal CNY amount, sign in front of the currency symbol.
pub fn money(value: f64) -> String {
    if value < 0.0 {
        format!("-¥{:.2}", -value)
    } else {
        format!("¥{:.2}", value)
    }
}

/// Two-decimal figure for table cells.
pub fn plain(value: f64) -> String {
    format!("{:.2}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(12.0), "¥12.00");
        assert_eq!(money(-12.0), "-¥12.00");
        assert_eq!(money(644.499), "¥644.50");
        assert_eq!(plain(-0.5), "-0.50");
    }
}
