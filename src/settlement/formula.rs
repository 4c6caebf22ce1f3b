use serde::{Deserialize, Serialize};

/// Ad platforms bill an 11% service charge on top of the spend.
pub const AD_SERVICE_RATE: f64 = 0.11;
/// Marketplace commission on gross sales.
pub const PLATFORM_FEE_RATE: f64 = 0.07;

/// Raw figures entered for one settlement
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SettlementInputs {
    pub sale_total: f64,
    pub ad_cost: f64,
    pub exchange_rate: f64,
    pub goods_cost: f64,
    pub misc_fee: f64,
    pub flat_cost: f64,
}

/// Figures derived from [`SettlementInputs`]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SettlementFigures {
    pub ad_deduction: f64,
    pub platform_fee: f64,
    pub profit: f64,
}

/// Settlement profit formula.
///
/// The ad spend is converted with `exchange_rate`; the platform fee is taken on
/// the sale total as-is. Negative profit is a loss, not an error.
pub fn compute(inputs: &SettlementInputs) -> SettlementFigures {
    let ad_deduction = (inputs.ad_cost + inputs.ad_cost * AD_SERVICE_RATE) * inputs.exchange_rate;
    let platform_fee = inputs.sale_total * PLATFORM_FEE_RATE;
    let profit = inputs.sale_total
        - ad_deduction
        - inputs.goods_cost
        - platform_fee
        - inputs.misc_fee
        - inputs.flat_cost;

    SettlementFigures {
        ad_deduction,
        platform_fee,
        profit,
    }
}
