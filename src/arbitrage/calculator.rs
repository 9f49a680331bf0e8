//! Arbitrage cycle economics

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

use crate::{
    types::{ArbitrageOpportunity, MevRisk, Quote},
    utils::{bps, wei_to_gwei},
};

/// Cumulative price impact at which confidence reaches zero, in percent.
const ZERO_CONFIDENCE_IMPACT_PCT: Decimal = dec!(3);
const HIGH_MEV_LEG_IMPACT_PCT: Decimal = dec!(1);
/// Confidence multiplier when any leg was priced on an off-peg stable pool.
const OFF_PEG_CONFIDENCE_FACTOR: Decimal = dec!(0.5);

/// Market inputs that turn a priced cycle into dollars.
#[derive(Debug, Clone)]
pub struct CycleEconomics {
    pub token_a_usd: Decimal,
    pub native_usd: Decimal,
    pub gas_price_wei: u128,
    pub flash_loan_fee_bps: u32,
    pub flash_loan_gas_overhead: u64,
    pub large_trade_usd: Decimal,
    pub ttl: Duration,
}

/// Price the cycle described by `legs` (A→B, B→C, C→A). Returns `None` for
/// anything other than three chained legs.
pub fn calculate_cycle(
    chain: &str,
    legs: Vec<Quote>,
    economics: &CycleEconomics,
    now: DateTime<Utc>,
) -> Option<ArbitrageOpportunity> {
    let [first, second, third] = legs.as_slice() else {
        return None;
    };
    if first.token_out != second.token_in || second.token_out != third.token_in || third.token_out != first.token_in {
        return None;
    }

    let amount_in = first.amount_in;
    let amount_out = third.amount_out;
    let gross_tokens = amount_out - amount_in;

    let amount_in_usd = amount_in * economics.token_a_usd;
    let gross_profit_usd = gross_tokens * economics.token_a_usd;
    let flash_loan_fee_usd = amount_in_usd * Decimal::from(economics.flash_loan_fee_bps) / dec!(10_000);

    let gas_estimate = legs.iter().map(|l| l.gas_estimate).sum::<u64>() + economics.flash_loan_gas_overhead;
    let gas_cost_native = Decimal::from(gas_estimate) * wei_to_gwei(economics.gas_price_wei) / dec!(1_000_000_000);
    let gas_cost_usd = gas_cost_native * economics.native_usd;

    let net_profit_usd = gross_profit_usd - flash_loan_fee_usd - gas_cost_usd;
    let spread_bps = bps(gross_tokens, amount_in).round_dp(2);
    let roi_after_gas_pct = if amount_in_usd > Decimal::ZERO {
        (net_profit_usd / amount_in_usd * dec!(100)).round_dp(4)
    } else {
        Decimal::ZERO
    };

    let total_impact: Decimal = legs.iter().map(|l| l.price_impact_pct).sum();
    let peg_factor = if legs.iter().any(|l| l.off_peg) {
        OFF_PEG_CONFIDENCE_FACTOR
    } else {
        Decimal::ONE
    };
    let confidence = ((Decimal::ONE - total_impact / ZERO_CONFIDENCE_IMPACT_PCT).clamp(Decimal::ZERO, Decimal::ONE)
        * peg_factor)
        .round_dp(4);
    let max_impact = legs.iter().map(|l| l.price_impact_pct).max().unwrap_or_default();
    let mev_risk = mev_risk(net_profit_usd, max_impact, economics.large_trade_usd);

    Some(ArbitrageOpportunity {
        id: uuid::Uuid::new_v4().to_string(),
        chain: chain.to_string(),
        token_a: first.token_in.clone(),
        token_b: second.token_in.clone(),
        token_c: third.token_in.clone(),
        dex_a: first.dex.clone(),
        dex_b: second.dex.clone(),
        dex_c: third.dex.clone(),
        amount_in,
        amount_out,
        amount_in_usd,
        gross_profit_usd,
        flash_loan_fee_usd,
        gas_cost_usd,
        net_profit_usd,
        spread_bps,
        roi_after_gas_pct,
        confidence,
        mev_risk,
        gas_estimate,
        detected_at: now,
        expires_at: now + economics.ttl,
        legs,
    })
}

pub fn mev_risk(net_profit_usd: Decimal, max_leg_impact_pct: Decimal, large_trade_usd: Decimal) -> MevRisk {
    if net_profit_usd > large_trade_usd || max_leg_impact_pct > HIGH_MEV_LEG_IMPACT_PCT {
        MevRisk::High
    } else if net_profit_usd > large_trade_usd / dec!(2) || max_leg_impact_pct > HIGH_MEV_LEG_IMPACT_PCT / dec!(2) {
        MevRisk::Medium
    } else {
        MevRisk::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(dex: &str, token_in: &str, token_out: &str, amount_in: Decimal, amount_out: Decimal, impact: Decimal) -> Quote {
        Quote {
            dex: dex.into(),
            token_in: token_in.into(),
            token_out: token_out.into(),
            amount_in,
            amount_out,
            price_impact_pct: impact,
            gas_estimate: 120_000,
            off_peg: false,
        }
    }

    fn economics() -> CycleEconomics {
        CycleEconomics {
            token_a_usd: dec!(3_000),
            native_usd: dec!(3_000),
            gas_price_wei: 1_000_000_000, // 1 gwei
            flash_loan_fee_bps: 9,
            flash_loan_gas_overhead: 250_000,
            large_trade_usd: dec!(250),
            ttl: Duration::seconds(45),
        }
    }

    #[test]
    fn prices_a_profitable_cycle() {
        let legs = vec![
            leg("a", "WETH", "USDC", dec!(10), dec!(30_150), dec!(0.1)),
            leg("b", "USDC", "DAI", dec!(30_150), dec!(30_140), dec!(0.05)),
            leg("c", "DAI", "WETH", dec!(30_140), dec!(10.05), dec!(0.1)),
        ];
        let now = Utc::now();
        let opp = calculate_cycle("base", legs, &economics(), now).unwrap();

        assert_eq!(opp.spread_bps, dec!(50));
        assert_eq!(opp.gross_profit_usd, dec!(150));
        assert_eq!(opp.flash_loan_fee_usd, dec!(27));
        assert_eq!(opp.gas_estimate, 610_000);
        // 610k gas at 1 gwei is 0.00061 ETH
        assert_eq!(opp.gas_cost_usd, dec!(1.83));
        assert_eq!(opp.net_profit_usd, dec!(121.17));
        assert_eq!(opp.mev_risk, MevRisk::Low);
        assert_eq!(opp.expires_at - opp.detected_at, Duration::seconds(45));
        assert!(opp.confidence > dec!(0.9) && opp.confidence < Decimal::ONE);
        assert_eq!((opp.token_b.as_str(), opp.token_c.as_str()), ("USDC", "DAI"));
    }

    #[test]
    fn off_peg_leg_halves_confidence() {
        let legs = |off_peg: bool| {
            let mut legs = vec![
                leg("a", "WETH", "USDC", dec!(10), dec!(30_150), dec!(0.1)),
                leg("curve", "USDC", "DAI", dec!(30_150), dec!(30_140), dec!(0.05)),
                leg("c", "DAI", "WETH", dec!(30_140), dec!(10.05), dec!(0.1)),
            ];
            legs[1].off_peg = off_peg;
            legs
        };
        let now = Utc::now();
        let pegged = calculate_cycle("base", legs(false), &economics(), now).unwrap();
        let off = calculate_cycle("base", legs(true), &economics(), now).unwrap();
        assert!((off.confidence - pegged.confidence / dec!(2)).abs() <= dec!(0.0001));
        assert_eq!(off.net_profit_usd, pegged.net_profit_usd);
    }

    #[test]
    fn broken_chain_is_rejected() {
        let legs = vec![
            leg("a", "WETH", "USDC", dec!(1), dec!(3_000), dec!(0)),
            leg("b", "DAI", "USDC", dec!(3_000), dec!(3_000), dec!(0)),
            leg("c", "USDC", "WETH", dec!(3_000), dec!(1), dec!(0)),
        ];
        assert!(calculate_cycle("base", legs, &economics(), Utc::now()).is_none());
    }

    #[test]
    fn mev_risk_levels() {
        assert_eq!(mev_risk(dec!(300), dec!(0.1), dec!(250)), MevRisk::High);
        assert_eq!(mev_risk(dec!(10), dec!(1.5), dec!(250)), MevRisk::High);
        assert_eq!(mev_risk(dec!(130), dec!(0.1), dec!(250)), MevRisk::Medium);
        assert_eq!(mev_risk(dec!(10), dec!(0.6), dec!(250)), MevRisk::Medium);
        assert_eq!(mev_risk(dec!(10), dec!(0.1), dec!(250)), MevRisk::Low);
    }
}
