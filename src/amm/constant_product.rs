//! Uniswap V2 style `x * y = k` pricing

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Output for `amount_in` after the pool fee.
///
/// `None` when any input is non-positive or the fee takes everything.
pub fn get_amount_out(amount_in: Decimal, reserve_in: Decimal, reserve_out: Decimal, fee_bps: u32) -> Option<Decimal> {
    if amount_in <= Decimal::ZERO || reserve_in <= Decimal::ZERO || reserve_out <= Decimal::ZERO {
        return None;
    }
    let fee_multiplier = fee_multiplier(fee_bps)?;
    let amount_in_after_fee = amount_in * fee_multiplier;

    let numerator = amount_in_after_fee.checked_mul(reserve_out)?;
    let denominator = reserve_in.checked_add(amount_in_after_fee)?;
    if denominator <= Decimal::ZERO {
        return None;
    }
    let out = numerator / denominator;
    (out > Decimal::ZERO).then_some(out)
}

/// Marginal price of `token_out` per `token_in` for an infinitesimal trade, fee included.
pub fn spot_price(reserve_in: Decimal, reserve_out: Decimal, fee_bps: u32) -> Option<Decimal> {
    if reserve_in <= Decimal::ZERO || reserve_out <= Decimal::ZERO {
        return None;
    }
    reserve_out.checked_div(reserve_in)?.checked_mul(fee_multiplier(fee_bps)?)
}

fn fee_multiplier(fee_bps: u32) -> Option<Decimal> {
    if fee_bps >= 10_000 {
        return None;
    }
    Some(Decimal::from(10_000 - fee_bps) / dec!(10_000))
}
