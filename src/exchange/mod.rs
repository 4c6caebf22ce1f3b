// Home-currency (CNY) conversion rates
pub mod cache;
pub mod client;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::AppResult;

pub use cache::RateCache;
pub use client::ExchangeRateHost;

pub const HOME_CURRENCY: &str = "CNY";

/// CNY per one unit of each currency, keyed by ISO code.
pub type RateTable = HashMap<String, f64>;

/// Upstream rate provider
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rates(&self) -> AppResult<RateTable>;
}

/// Display name for the currencies the stores sell in.
pub fn currency_name(code: &str) -> &str {
    match code {
        "PHP" => "Philippine peso",
        "IDR" => "Indonesian rupiah",
        "MYR" => "Malaysian ringgit",
        "CNY" => "Chinese yuan",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_name_falls_back_to_code() {
        assert_eq!(currency_name("MYR"), "Malaysian ringgit");
        assert_eq!(currency_name("THB"), "THB");
    }
}
