//! Profitability and risk gates

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{
    config::Thresholds,
    types::{ArbitrageOpportunity, ValidationMetrics, ValidationResult},
};

/// Run every gate against `opportunity`. Pure: the same input and `now`
/// always give the same result, so re-validation is safe anywhere.
pub fn validate_opportunity(
    opportunity: &ArbitrageOpportunity,
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let max_leg_slippage_pct = opportunity.max_leg_slippage_pct();
    let hops = opportunity.legs.len();

    // Spread
    let min_spread = Decimal::from(thresholds.min_spread_bps);
    if opportunity.spread_bps < min_spread {
        errors.push(format!(
            "Spread too low: {:.2} bps (min: {} bps)",
            opportunity.spread_bps, min_spread
        ));
    }

    // ROI after gas
    if opportunity.roi_after_gas_pct < thresholds.min_roi_after_gas_pct {
        errors.push(format!(
            "ROI after gas too low: {:.4}% (min: {}%)",
            opportunity.roi_after_gas_pct, thresholds.min_roi_after_gas_pct
        ));
    }

    // Per-leg slippage
    for leg in &opportunity.legs {
        if leg.price_impact_pct > thresholds.max_slippage_per_leg_pct {
            errors.push(format!(
                "Slippage too high on {} {}→{}: {:.3}% (max: {}%)",
                leg.dex, leg.token_in, leg.token_out, leg.price_impact_pct, thresholds.max_slippage_per_leg_pct
            ));
        }
    }

    for leg in opportunity.legs.iter().filter(|l| l.off_peg) {
        warnings.push(format!(
            "{} {}→{} priced on a pool off its peg",
            leg.dex, leg.token_in, leg.token_out
        ));
    }

    // Profit after costs
    if opportunity.net_profit_usd <= Decimal::ZERO {
        errors.push(format!("Not profitable: net ${:.2}", opportunity.net_profit_usd));
    }
    if opportunity.gas_cost_usd >= opportunity.gross_profit_usd {
        errors.push(format!(
            "Gas ${:.2} eats the gross profit ${:.2}",
            opportunity.gas_cost_usd, opportunity.gross_profit_usd
        ));
    }

    // Path
    if hops == 0 {
        errors.push("Empty swap path".to_string());
    } else if hops > thresholds.max_hops_before_warning {
        warnings.push(format!(
            "Long path: {} hops (warn above {})",
            hops, thresholds.max_hops_before_warning
        ));
    }

    // Freshness
    if opportunity.is_expired(now) {
        errors.push(format!("Expired at {}", opportunity.expires_at.format("%H:%M:%S%.3f")));
    }

    ValidationResult {
        opportunity_id: opportunity.id.clone(),
        valid: errors.is_empty(),
        errors,
        warnings,
        metrics: ValidationMetrics {
            spread_bps: opportunity.spread_bps,
            roi_after_gas_pct: opportunity.roi_after_gas_pct,
            max_leg_slippage_pct,
            net_profit_usd: opportunity.net_profit_usd,
            gas_cost_usd: opportunity.gas_cost_usd,
            hops,
        },
        validated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::testing::opportunity;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn profitable_cycle_passes() {
        let opp = opportunity(dec!(120));
        let result = validate_opportunity(&opp, &Thresholds::default(), opp.detected_at);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
        assert_eq!(result.metrics.hops, 3);
        assert_eq!(result.metrics.max_leg_slippage_pct, dec!(0.1));
    }

    #[test]
    fn thin_spread_is_rejected() {
        let mut opp = opportunity(dec!(120));
        opp.spread_bps = dec!(22.99);
        let result = validate_opportunity(&opp, &Thresholds::default(), opp.detected_at);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("Spread too low"));
    }

    #[test]
    fn loss_making_cycle_is_rejected() {
        let opp = opportunity(dec!(-5));
        let result = validate_opportunity(&opp, &Thresholds::default(), opp.detected_at);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("Not profitable")));
        assert!(result.errors.iter().any(|e| e.contains("ROI after gas")));
    }

    #[test]
    fn gas_above_gross_is_rejected() {
        let mut opp = opportunity(dec!(120));
        opp.gas_cost_usd = opp.gross_profit_usd;
        let result = validate_opportunity(&opp, &Thresholds::default(), opp.detected_at);
        assert!(result.errors.iter().any(|e| e.contains("eats the gross profit")));
    }

    #[test]
    fn each_slippy_leg_gets_a_reason() {
        let mut opp = opportunity(dec!(120));
        opp.legs[0].price_impact_pct = dec!(0.6);
        opp.legs[2].price_impact_pct = dec!(0.51);
        let result = validate_opportunity(&opp, &Thresholds::default(), opp.detected_at);
        assert_eq!(result.errors.iter().filter(|e| e.contains("Slippage")).count(), 2);
        assert_eq!(result.metrics.max_leg_slippage_pct, dec!(0.6));
    }

    #[test]
    fn long_paths_only_warn() {
        let mut opp = opportunity(dec!(120));
        let extra = opp.legs.clone();
        opp.legs.extend(extra);
        let result = validate_opportunity(&opp, &Thresholds::default(), opp.detected_at);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn off_peg_leg_warns_without_rejecting() {
        let mut opp = opportunity(dec!(120));
        opp.legs[1].off_peg = true;
        let result = validate_opportunity(&opp, &Thresholds::default(), opp.detected_at);
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("off its peg"));
    }

    #[test]
    fn empty_path_is_rejected() {
        let mut opp = opportunity(dec!(120));
        opp.legs.clear();
        let result = validate_opportunity(&opp, &Thresholds::default(), opp.detected_at);
        assert!(result.errors.iter().any(|e| e.contains("Empty swap path")));
    }

    #[test]
    fn expiry_is_exclusive() {
        let opp = opportunity(dec!(120));
        let thresholds = Thresholds::default();
        let just_before = opp.expires_at - chrono::Duration::milliseconds(1);
        assert!(validate_opportunity(&opp, &thresholds, just_before).valid);
        assert!(!validate_opportunity(&opp, &thresholds, opp.expires_at).valid);
    }

    proptest! {
        #[test]
        fn revalidation_is_idempotent(net in -500i64..500, spread in 0u32..200, offset in 0i64..90) {
            let mut opp = opportunity(Decimal::from(net));
            opp.spread_bps = Decimal::from(spread);
            let now = opp.detected_at + chrono::Duration::seconds(offset);
            let thresholds = Thresholds::default();
            let first = validate_opportunity(&opp, &thresholds, now);
            let second = validate_opportunity(&opp, &thresholds, now);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn losses_never_pass(net in -10_000i64..=0) {
            let opp = opportunity(Decimal::from(net));
            let result = validate_opportunity(&opp, &Thresholds::default(), opp.detected_at);
            prop_assert!(!result.valid);
        }
    }
}
