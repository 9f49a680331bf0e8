//! Mathematical utility functions

use alloy::primitives::U256;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

/// `10^n`, or `None` once it no longer fits a Decimal.
pub fn pow10(n: u32) -> Option<Decimal> {
    match n {
        0 => Some(dec!(1)),
        6 => Some(dec!(1_000_000)),
        18 => Some(dec!(1_000_000_000_000_000_000)),
        _ => (0..n).try_fold(dec!(1), |acc, _| acc.checked_mul(dec!(10))),
    }
}

/// Whole-token amount to base units, truncating below one unit.
/// `None` for negative amounts.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Option<U256> {
    if amount.is_sign_negative() {
        return None;
    }
    let mantissa = U256::from(amount.mantissa().unsigned_abs());
    let scaled = mantissa.checked_mul(U256::from(10u64).pow(U256::from(decimals)))?;
    Some(scaled / U256::from(10u64).pow(U256::from(amount.scale())))
}

/// Base units to whole tokens. Digits beyond Decimal's 96-bit mantissa are
/// dropped from the least significant end. `None` above `Decimal::MAX`,
/// which only a broken or hostile contract reports.
pub fn from_base_units(value: U256, decimals: u8) -> Option<Decimal> {
    let limit = U256::from(1u128 << 96);
    let ten = U256::from(10u64);
    let mut mantissa = value;
    let decimals = u32::from(decimals);
    let mut dropped: u32 = 0;
    while mantissa >= limit || decimals.saturating_sub(dropped) > 28 {
        mantissa /= ten;
        dropped += 1;
    }
    let m = mantissa.to::<u128>() as i128;
    if dropped >= decimals {
        Decimal::from_i128_with_scale(m, 0).checked_mul(pow10(dropped - decimals)?)
    } else {
        Some(Decimal::from_i128_with_scale(m, decimals - dropped))
    }
}

pub fn gwei_to_wei(gwei: Decimal) -> u128 {
    (gwei * dec!(1_000_000_000)).trunc().to_u128().unwrap_or(0)
}

pub fn wei_to_gwei(wei: u128) -> Decimal {
    Decimal::from_u128(wei).unwrap_or(Decimal::MAX) / dec!(1_000_000_000)
}

/// Basis points of `part` relative to `whole`, zero when `whole` is zero.
pub fn bps(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    part / whole * dec!(10_000)
}
