//! Pool state oriented along one swap direction

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    amm::{self, StableSwapPool, constant_product, weighted},
    config::DexKind,
};

/// Reserves are in whole tokens except for stable-swap pools, which keep
/// 18-decimal normalised integer balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PoolState {
    ConstantProduct {
        reserve_in: Decimal,
        reserve_out: Decimal,
        fee_bps: u32,
    },
    Weighted {
        balance_in: Decimal,
        balance_out: Decimal,
        weight_in: Decimal,
        weight_out: Decimal,
        /// Fraction, e.g. `0.003`.
        fee: Decimal,
    },
    StableSwap {
        pool: StableSwapPool,
        i: usize,
        j: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolQuote {
    pub amount_out: Decimal,
    pub price_impact_pct: Decimal,
    /// Stable pool with a balance more than 2 % off the mean.
    pub off_peg: bool,
}

impl PoolState {
    pub fn kind(&self) -> DexKind {
        match self {
            PoolState::ConstantProduct { .. } => DexKind::ConstantProduct,
            PoolState::Weighted { .. } => DexKind::Weighted,
            PoolState::StableSwap { .. } => DexKind::StableSwap,
        }
    }

    pub fn quote(&self, amount_in: Decimal) -> Option<PoolQuote> {
        let off_peg = matches!(self, PoolState::StableSwap { pool, .. } if pool.is_depegged());
        let (amount_out, spot) = match self {
            PoolState::ConstantProduct { reserve_in, reserve_out, fee_bps } => (
                constant_product::get_amount_out(amount_in, *reserve_in, *reserve_out, *fee_bps)?,
                constant_product::spot_price(*reserve_in, *reserve_out, *fee_bps)?,
            ),
            PoolState::Weighted { balance_in, balance_out, weight_in, weight_out, fee } => (
                weighted::get_amount_out(amount_in, *balance_in, *balance_out, *weight_in, *weight_out, *fee)?,
                weighted::spot_price(*balance_in, *balance_out, *weight_in, *weight_out, *fee)?,
            ),
            PoolState::StableSwap { pool, i, j } => (pool.quote(*i, *j, amount_in)?, pool.spot_price(*i, *j)?),
        };
        Some(PoolQuote {
            amount_out,
            price_impact_pct: amm::price_impact_pct(amount_in, amount_out, spot),
            off_peg,
        })
    }

    /// The same pool seen from the other side.
    pub fn reversed(&self) -> Self {
        match self.clone() {
            PoolState::ConstantProduct { reserve_in, reserve_out, fee_bps } => PoolState::ConstantProduct {
                reserve_in: reserve_out,
                reserve_out: reserve_in,
                fee_bps,
            },
            PoolState::Weighted { balance_in, balance_out, weight_in, weight_out, fee } => PoolState::Weighted {
                balance_in: balance_out,
                balance_out: balance_in,
                weight_in: weight_out,
                weight_out: weight_in,
                fee,
            },
            PoolState::StableSwap { pool, i, j } => PoolState::StableSwap { pool, i: j, j: i },
        }
    }
}
