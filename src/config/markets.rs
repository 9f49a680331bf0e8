//! Chains, tokens, DEX pools, triangles and workers

use alloy::primitives::{Address, B256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    /// Priority order: primary first, then backups.
    pub rpc_urls: Vec<String>,
    /// Symbol of the token used to price gas in USD.
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
}

fn default_native_symbol() -> String {
    "WETH".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    /// Fallback USD price used until the price feed answers.
    pub usd_price: Decimal,
    /// Ticker on the price feed, e.g. `ETHUSDT`.
    #[serde(default)]
    pub feed_symbol: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DexKind {
    /// Uniswap V2 style constant product pairs discovered through a factory.
    ConstantProduct,
    /// Balancer weighted pools.
    Weighted,
    /// Curve stable-swap pools.
    StableSwap,
}

impl fmt::Display for DexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DexKind::ConstantProduct => write!(f, "constant-product"),
            DexKind::Weighted => write!(f, "weighted"),
            DexKind::StableSwap => write!(f, "stable-swap"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DexConfig {
    pub name: String,
    pub kind: DexKind,
    /// Address the flash-loan contract calls for this DEX's hops.
    pub router: Address,
    /// Pair factory, constant-product DEXs only.
    #[serde(default)]
    pub factory: Option<Address>,
    /// Swap fee for constant-product pairs.
    #[serde(default = "default_v2_fee_bps")]
    pub fee_bps: u32,
    /// Explicit pools, weighted and stable-swap DEXs only.
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

fn default_v2_fee_bps() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub address: Address,
    /// Balancer vault pool id.
    #[serde(default)]
    pub pool_id: Option<B256>,
    /// Token symbols in pool index order.
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriangleConfig {
    pub tokens: [String; 3],
    /// Flash-loan size, in units of the first token.
    pub amount_in: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Leveraged execution for large or MEV-exposed trades.
    FlashLoan,
    /// Cheap execution path for trades where gas dominates.
    SimpleArbitrage,
    Default,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::FlashLoan => write!(f, "flash-loan"),
            WorkerRole::SimpleArbitrage => write!(f, "simple-arbitrage"),
            WorkerRole::Default => write!(f, "default"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    pub role: WorkerRole,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// When the execution dispatcher moves on to the next wallet slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RotationPolicy {
    Never,
    EveryTrade,
    ProfitAbove(Decimal),
}

impl Default for RotationPolicy {
    fn default() -> Self {
        RotationPolicy::ProfitAbove(Decimal::TEN)
    }
}

impl FromStr for RotationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "never" => Ok(RotationPolicy::Never),
            "every_trade" => Ok(RotationPolicy::EveryTrade),
            other => {
                let usd = other
                    .strip_prefix("profit_above:")
                    .ok_or_else(|| format!("unknown rotation policy `{}`", other))?;
                Decimal::from_str(usd.trim())
                    .map(RotationPolicy::ProfitAbove)
                    .map_err(|e| format!("bad profit threshold `{}`: {}", usd, e))
            }
        }
    }
}

impl TryFrom<String> for RotationPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RotationPolicy> for String {
    fn from(policy: RotationPolicy) -> Self {
        match policy {
            RotationPolicy::Never => "never".to_string(),
            RotationPolicy::EveryTrade => "every_trade".to_string(),
            RotationPolicy::ProfitAbove(usd) => format!("profit_above:{}", usd),
        }
    }
}
