//! AMM pricing formulas
//!
//! Pure functions over pool state. "No quote" is `None`.

pub mod constant_product;
pub mod stable_swap;
pub mod weighted;

pub use stable_swap::StableSwapPool;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Shortfall of the effective price against the spot price, in percent.
pub fn price_impact_pct(amount_in: Decimal, amount_out: Decimal, spot_price: Decimal) -> Decimal {
    if amount_in <= Decimal::ZERO || spot_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    // A ratio too large for Decimal is a price far above spot: no shortfall.
    let Some(ratio) = amount_out.checked_div(amount_in).and_then(|effective| effective.checked_div(spot_price)) else {
        return Decimal::ZERO;
    };
    ((Decimal::ONE - ratio) * dec!(100)).max(Decimal::ZERO)
}
