//! Arbitrage opportunity types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MevRisk {
    Low,
    Medium,
    High,
}

impl fmt::Display for MevRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MevRisk::Low => write!(f, "low"),
            MevRisk::Medium => write!(f, "medium"),
            MevRisk::High => write!(f, "high"),
        }
    }
}

/// A priced A→B→C→A cycle.
///
/// `expires_at` is always after `detected_at`. Once expired the record is
/// dropped wherever it sits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub id: String,
    pub chain: String,
    pub token_a: String,
    pub token_b: String,
    pub token_c: String,
    pub dex_a: String,
    pub dex_b: String,
    pub dex_c: String,
    pub legs: Vec<Quote>,
    /// Borrowed amount, in units of `token_a`.
    pub amount_in: Decimal,
    /// Amount of `token_a` after the last leg.
    pub amount_out: Decimal,
    pub amount_in_usd: Decimal,
    pub gross_profit_usd: Decimal,
    pub flash_loan_fee_usd: Decimal,
    pub gas_cost_usd: Decimal,
    pub net_profit_usd: Decimal,
    pub spread_bps: Decimal,
    pub roi_after_gas_pct: Decimal,
    /// In `[0, 1]`.
    pub confidence: Decimal,
    pub mev_risk: MevRisk,
    pub gas_estimate: u64,
    pub detected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ArbitrageOpportunity {
    /// Expiry is exclusive: at `expires_at` the opportunity is already gone.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Worst price impact over all legs, in percent.
    pub fn max_leg_slippage_pct(&self) -> Decimal {
        self.legs
            .iter()
            .map(|l| l.price_impact_pct)
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn dex_path(&self) -> Vec<&str> {
        self.legs.iter().map(|l| l.dex.as_str()).collect()
    }

    /// Gas cost as a fraction of gross profit. `None` when there is no profit.
    pub fn gas_to_profit_ratio(&self) -> Option<Decimal> {
        if self.gross_profit_usd <= Decimal::ZERO {
            return None;
        }
        Some(self.gas_cost_usd / self.gross_profit_usd)
    }

    pub fn route_label(&self) -> String {
        format!(
            "{}→{}→{}→{} via {}/{}/{}",
            self.token_a, self.token_b, self.token_c, self.token_a, self.dex_a, self.dex_b, self.dex_c
        )
    }
}
