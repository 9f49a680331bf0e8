//! Validation result types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ValidationMetrics {
    pub spread_bps: Decimal,
    pub roi_after_gas_pct: Decimal,
    pub max_leg_slippage_pct: Decimal,
    pub net_profit_usd: Decimal,
    pub gas_cost_usd: Decimal,
    pub hops: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub opportunity_id: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metrics: ValidationMetrics,
    pub validated_at: DateTime<Utc>,
}
