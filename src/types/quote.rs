//! Swap quotes

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One priced swap leg. Produced per request and never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub dex: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    /// Spot versus effective price, in percent.
    pub price_impact_pct: Decimal,
    pub gas_estimate: u64,
    /// Priced on a stable pool that is off its peg.
    #[serde(default)]
    pub off_peg: bool,
}
