//! Curve stable-swap invariant and swap output
//!
//! Balances are normalised to 18 decimals before they get here. Both solvers
//! run Newton's method for at most [`MAX_ITERATIONS`] steps and stop once two
//! consecutive estimates are within one unit; a solver that fails to converge
//! produces no quote.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::utils::{from_base_units, to_base_units};

pub const MAX_ITERATIONS: usize = 255;
/// Curve expresses fees in units of 1e-10.
pub const FEE_DENOMINATOR: u64 = 10_000_000_000;
pub const DEPEG_THRESHOLD_PCT: Decimal = dec!(2);

const NORMALISED_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StableSwapPool {
    pub balances: Vec<U256>,
    pub amp: U256,
    pub fee: U256,
    pub total_supply: U256,
}

impl StableSwapPool {
    pub fn invariant(&self) -> Option<U256> {
        compute_d(&self.balances, self.amp)
    }

    /// `D / total_supply`, `None` for an empty pool.
    pub fn virtual_price(&self) -> Option<Decimal> {
        if self.total_supply.is_zero() {
            return None;
        }
        let d = self.invariant()?;
        let scaled = d.checked_mul(U256::from(10u64).pow(U256::from(NORMALISED_DECIMALS)))? / self.total_supply;
        from_base_units(scaled, NORMALISED_DECIMALS)
    }

    /// True when any balance sits more than 2 % away from the mean balance.
    /// Balances too large to compare count as off peg.
    pub fn is_depegged(&self) -> bool {
        if self.balances.is_empty() {
            return false;
        }
        let Some(balances) = self
            .balances
            .iter()
            .map(|b| from_base_units(*b, NORMALISED_DECIMALS))
            .collect::<Option<Vec<Decimal>>>()
        else {
            return true;
        };
        let Some(total) = balances.iter().try_fold(Decimal::ZERO, |acc, b| acc.checked_add(*b)) else {
            return true;
        };
        let mean = total / Decimal::from(balances.len());
        if mean.is_zero() {
            return true;
        }
        balances
            .iter()
            .any(|b| ((*b - mean) / mean * dec!(100)).abs() > DEPEG_THRESHOLD_PCT)
    }

    /// Output of coin `j` for `dx` of coin `i`, after the pool fee.
    pub fn get_dy(&self, i: usize, j: usize, dx: U256) -> Option<U256> {
        let n = self.balances.len();
        if i == j || i >= n || j >= n || dx.is_zero() {
            return None;
        }
        let d = self.invariant()?;
        let x = self.balances[i].checked_add(dx)?;
        let y = compute_y(i, j, x, &self.balances, self.amp, d)?;
        let dy = self.balances[j].checked_sub(y)?.checked_sub(U256::from(1u64))?;
        let fee = dy * self.fee / U256::from(FEE_DENOMINATOR);
        let out = dy.checked_sub(fee)?;
        (!out.is_zero()).then_some(out)
    }

    /// [`get_dy`](Self::get_dy) in whole tokens.
    pub fn quote(&self, i: usize, j: usize, amount_in: Decimal) -> Option<Decimal> {
        let dx = to_base_units(amount_in, NORMALISED_DECIMALS)?;
        let dy = self.get_dy(i, j, dx)?;
        from_base_units(dy, NORMALISED_DECIMALS)
    }

    /// Price of a trade one millionth the size of the input balance, fee included.
    pub fn spot_price(&self, i: usize, j: usize) -> Option<Decimal> {
        let dx = (*self.balances.get(i)? / U256::from(1_000_000u64)).max(U256::from(1u64));
        let dy = self.get_dy(i, j, dx)?;
        let dx = from_base_units(dx, NORMALISED_DECIMALS)?;
        let dy = from_base_units(dy, NORMALISED_DECIMALS)?;
        dy.checked_div(dx)
    }
}

/// The stable-swap invariant `D` for `balances` and amplification `amp`.
pub fn compute_d(balances: &[U256], amp: U256) -> Option<U256> {
    let n = U256::from(balances.len());
    if balances.len() < 2 || amp.is_zero() || balances.iter().any(|b| b.is_zero()) {
        return None;
    }
    let sum = balances.iter().try_fold(U256::ZERO, |acc, b| acc.checked_add(*b))?;
    let ann = amp.checked_mul(n)?;

    let mut d = sum;
    for _ in 0..MAX_ITERATIONS {
        let mut d_p = d;
        for balance in balances {
            d_p = d_p.checked_mul(d)? / balance.checked_mul(n)?;
        }
        let prev = d;
        let numerator = ann.checked_mul(sum)?.checked_add(d_p.checked_mul(n)?)?.checked_mul(d)?;
        let denominator = (ann - U256::from(1u64))
            .checked_mul(d)?
            .checked_add((n + U256::from(1u64)).checked_mul(d_p)?)?;
        if denominator.is_zero() {
            return None;
        }
        d = numerator / denominator;
        if abs_diff(d, prev) <= U256::from(1u64) {
            return Some(d);
        }
    }
    None
}

/// Balance of coin `j` that keeps `d` constant when coin `i` holds `x`.
pub fn compute_y(i: usize, j: usize, x: U256, balances: &[U256], amp: U256, d: U256) -> Option<U256> {
    let n_coins = balances.len();
    if i == j || i >= n_coins || j >= n_coins || amp.is_zero() {
        return None;
    }
    let n = U256::from(n_coins);
    let ann = amp.checked_mul(n)?;

    let mut c = d;
    let mut s = U256::ZERO;
    for (k, balance) in balances.iter().enumerate() {
        let value = if k == i {
            x
        } else if k != j {
            *balance
        } else {
            continue;
        };
        if value.is_zero() {
            return None;
        }
        s = s.checked_add(value)?;
        c = c.checked_mul(d)? / value.checked_mul(n)?;
    }
    c = c.checked_mul(d)? / ann.checked_mul(n)?;
    let b = s.checked_add(d / ann)?;

    let mut y = d;
    for _ in 0..MAX_ITERATIONS {
        let prev = y;
        let numerator = y.checked_mul(y)?.checked_add(c)?;
        let denominator = (y.checked_mul(U256::from(2u64))?.checked_add(b)?).checked_sub(d)?;
        if denominator.is_zero() {
            return None;
        }
        y = numerator / denominator;
        if abs_diff(y, prev) <= U256::from(1u64) {
            return Some(y);
        }
    }
    None
}

fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b { a - b } else { b - a }
}
