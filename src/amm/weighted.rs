//! Balancer weighted-pool pricing

use rust_decimal::{Decimal, MathematicalOps};

/// `balance_out * (1 - (balance_in / (balance_in + amount_in * (1 - fee)))^(weight_in / weight_out))`
///
/// `fee` is a fraction, e.g. `0.003`. Weights only matter as a ratio.
pub fn get_amount_out(
    amount_in: Decimal,
    balance_in: Decimal,
    balance_out: Decimal,
    weight_in: Decimal,
    weight_out: Decimal,
    fee: Decimal,
) -> Option<Decimal> {
    if amount_in <= Decimal::ZERO
        || balance_in <= Decimal::ZERO
        || balance_out <= Decimal::ZERO
        || weight_in <= Decimal::ZERO
        || weight_out <= Decimal::ZERO
        || fee < Decimal::ZERO
        || fee >= Decimal::ONE
    {
        return None;
    }
    let amount_in_after_fee = amount_in * (Decimal::ONE - fee);
    let base = balance_in.checked_div(balance_in.checked_add(amount_in_after_fee)?)?;
    let exponent = weight_in.checked_div(weight_out)?;
    let power = if exponent == Decimal::ONE {
        base
    } else {
        base.checked_powd(exponent)?
    };
    let out = balance_out * (Decimal::ONE - power);
    (out > Decimal::ZERO && out < balance_out).then_some(out)
}

/// Marginal price of `token_out` per `token_in`, fee included.
pub fn spot_price(
    balance_in: Decimal,
    balance_out: Decimal,
    weight_in: Decimal,
    weight_out: Decimal,
    fee: Decimal,
) -> Option<Decimal> {
    if balance_in <= Decimal::ZERO || balance_out <= Decimal::ZERO || weight_in <= Decimal::ZERO || weight_out <= Decimal::ZERO {
        return None;
    }
    let price = balance_out
        .checked_div(weight_out)?
        .checked_div(balance_in.checked_div(weight_in)?)?;
    price.checked_mul(Decimal::ONE - fee)
}
