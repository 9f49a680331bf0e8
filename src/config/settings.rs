//! Engine configuration settings and environment variable handling

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::{
    ChainConfig, ConfigError, DexConfig, DexKind, RotationPolicy, TokenConfig, TriangleConfig,
    WorkerConfig,
};

// Validation gate defaults
pub const DEFAULT_MIN_SPREAD_BPS: u32 = 23; // 0.23%
pub const DEFAULT_MIN_ROI_AFTER_GAS_PCT: Decimal = dec!(0.25);
pub const DEFAULT_MAX_SLIPPAGE_PER_LEG_PCT: Decimal = dec!(0.5);
pub const MAX_HOPS_BEFORE_WARNING: usize = 5;
pub const MAX_SLIPPAGE_CEILING_PCT: Decimal = dec!(5);

// Detector defaults
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_OPPORTUNITY_TTL_SECS: u64 = 45;
pub const DEFAULT_QUOTE_TIMEOUT_MS: u64 = 1500;
pub const DEFAULT_FLASH_LOAN_FEE_BPS: u32 = 9; // Aave v3 premium
pub const DEFAULT_FLASH_LOAN_GAS_OVERHEAD: u64 = 250_000;

// RPC defaults
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2000;

// Trade Execution Constants
pub const DEFAULT_MAX_GAS_PRICE_GWEI: Decimal = dec!(50);
pub const MAX_GAS_PRICE_CEILING_GWEI: Decimal = dec!(500);
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_HEALTH_TTL_SECS: u64 = 30;

// Orchestrator defaults
pub const DEFAULT_MAX_RESTARTS: u32 = 3;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_RESTART_BREAKER_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub min_spread_bps: u32,
    pub min_roi_after_gas_pct: Decimal,
    pub max_slippage_per_leg_pct: Decimal,
    pub max_hops_before_warning: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_spread_bps: DEFAULT_MIN_SPREAD_BPS,
            min_roi_after_gas_pct: DEFAULT_MIN_ROI_AFTER_GAS_PCT,
            max_slippage_per_leg_pct: DEFAULT_MAX_SLIPPAGE_PER_LEG_PCT,
            max_hops_before_warning: MAX_HOPS_BEFORE_WARNING,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub probe_interval_secs: u64,
    pub probe_timeout_ms: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub scan_interval_secs: u64,
    pub opportunity_ttl_secs: u64,
    pub quote_timeout_ms: u64,
    pub flash_loan_fee_bps: u32,
    pub flash_loan_gas_overhead: u64,
    /// Used when the node's gas price cannot be read.
    pub fallback_gas_price_gwei: Decimal,
    /// Net profit above which a trade counts as large.
    pub large_trade_usd: Decimal,
    pub price_feed_url: Option<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            opportunity_ttl_secs: DEFAULT_OPPORTUNITY_TTL_SECS,
            quote_timeout_ms: DEFAULT_QUOTE_TIMEOUT_MS,
            flash_loan_fee_bps: DEFAULT_FLASH_LOAN_FEE_BPS,
            flash_loan_gas_overhead: DEFAULT_FLASH_LOAN_GAS_OVERHEAD,
            fallback_gas_price_gwei: dec!(0.05),
            large_trade_usd: dec!(250),
            price_feed_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// When false, validated trades are logged but never submitted.
    pub enable_trade_execution: bool,
    pub max_gas_price_gwei: Decimal,
    pub priority_fee_gwei: Decimal,
    pub gas_limit_buffer_pct: u64,
    pub confirmation_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    pub health_ttl_secs: u64,
    /// Minimum native balance the flash-loan contract must hold, in ether.
    pub min_contract_balance_eth: Decimal,
    pub rotation: RotationPolicy,
    /// Trades whose borrowed amount exceeds this USD value need manual approval.
    pub manual_approval_above_usd: Option<Decimal>,
    pub manual_approval_on_high_mev: bool,
    pub approval_timeout_secs: u64,
    pub approval_dir: PathBuf,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            enable_trade_execution: false,
            max_gas_price_gwei: DEFAULT_MAX_GAS_PRICE_GWEI,
            priority_fee_gwei: dec!(0.01),
            gas_limit_buffer_pct: 20,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            receipt_poll_interval_ms: 1500,
            health_ttl_secs: DEFAULT_HEALTH_TTL_SECS,
            min_contract_balance_eth: Decimal::ZERO,
            rotation: RotationPolicy::default(),
            manual_approval_above_usd: None,
            manual_approval_on_high_mev: false,
            approval_timeout_secs: DEFAULT_APPROVAL_TIMEOUT_SECS,
            approval_dir: PathBuf::from("output/approvals"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub workers: Vec<WorkerConfig>,
    pub max_restarts: u32,
    pub heartbeat_interval_secs: u64,
    /// Heartbeat timeout as a multiple of the interval.
    pub heartbeat_timeout_factor: u32,
    pub restart_breaker_threshold: u32,
    pub monitor_interval_secs: u64,
    pub route_interval_ms: u64,
    pub large_trade_usd: Decimal,
    /// Gas cost over profit above which the cheap execution path is preferred.
    pub high_gas_ratio: Decimal,
    pub ipc_dir: PathBuf,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            max_restarts: DEFAULT_MAX_RESTARTS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            heartbeat_timeout_factor: 3,
            restart_breaker_threshold: DEFAULT_RESTART_BREAKER_THRESHOLD,
            monitor_interval_secs: 2,
            route_interval_ms: 500,
            large_trade_usd: dec!(250),
            high_gas_ratio: dec!(0.5),
            ipc_dir: PathBuf::from("output/ipc"),
        }
    }
}

impl OrchestratorSettings {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs * u64::from(self.heartbeat_timeout_factor))
    }
}

/// A wallet private key. Never printed.
#[derive(Clone)]
pub struct WalletKey(String);

impl WalletKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletKey(<redacted>)")
    }
}

#[derive(Debug, Clone, Deserialize)]
struct EngineSection {
    chain: Option<String>,
    flash_loan_contract: Option<alloy::primitives::Address>,
}

/// Shape of the TOML file. Every section is optional here so that
/// validation can name the missing field.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    engine: Option<EngineSection>,
    #[serde(default)]
    chains: Vec<ChainConfig>,
    #[serde(default)]
    tokens: Vec<TokenConfig>,
    #[serde(default)]
    dexes: Vec<DexConfig>,
    #[serde(default)]
    triangles: Vec<TriangleConfig>,
    #[serde(default)]
    thresholds: Thresholds,
    #[serde(default)]
    rpc: RpcSettings,
    #[serde(default)]
    detector: DetectorSettings,
    #[serde(default)]
    execution: ExecutionSettings,
    #[serde(default)]
    orchestrator: OrchestratorSettings,
    #[serde(default)]
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub chain: String,
    pub flash_loan_contract: alloy::primitives::Address,
    pub chains: Vec<ChainConfig>,
    pub tokens: Vec<TokenConfig>,
    pub dexes: Vec<DexConfig>,
    pub triangles: Vec<TriangleConfig>,
    pub thresholds: Thresholds,
    pub rpc: RpcSettings,
    pub detector: DetectorSettings,
    pub execution: ExecutionSettings,
    pub orchestrator: OrchestratorSettings,
    pub wallet_keys: Vec<WalletKey>,
    pub output_dir: PathBuf,
}

impl Config {
    /// Load from `ENGINE_CONFIG` (default `config/engine.toml`) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ENGINE_CONFIG").unwrap_or_else(|_| "config/engine.toml".to_string());
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Unreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&text, |key| std::env::var(key).ok())
    }

    pub fn from_toml<F>(text: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: FileConfig = toml::from_str(text)
            .map_err(|e| ConfigError::invalid("config file", e.message().to_string()))?;
        Self::from_parts(file, env)
    }

    pub fn from_parts<F>(file: FileConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let engine = file.engine.ok_or_else(|| ConfigError::missing("engine"))?;
        let chain = engine.chain.ok_or_else(|| ConfigError::missing("engine.chain"))?;
        let flash_loan_contract = engine
            .flash_loan_contract
            .ok_or_else(|| ConfigError::missing("engine.flash_loan_contract"))?;

        let wallet_keys: Vec<WalletKey> = env("WALLET_PRIVATE_KEYS")
            .ok_or_else(|| ConfigError::missing("WALLET_PRIVATE_KEYS"))?
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(WalletKey::new)
            .collect();
        if wallet_keys.is_empty() {
            return Err(ConfigError::invalid("WALLET_PRIVATE_KEYS", "no keys provided"));
        }

        let mut thresholds = file.thresholds;
        let mut detector = file.detector;
        let mut execution = file.execution;

        if let Some(v) = env_parse::<u32>(&env, "MIN_SPREAD_BPS")? {
            thresholds.min_spread_bps = v;
        }
        if let Some(v) = env_parse::<Decimal>(&env, "MIN_ROI_AFTER_GAS_PCT")? {
            thresholds.min_roi_after_gas_pct = v;
        }
        if let Some(v) = env_parse::<Decimal>(&env, "MAX_SLIPPAGE_PER_LEG_PCT")? {
            thresholds.max_slippage_per_leg_pct = v;
        }
        thresholds.max_slippage_per_leg_pct = thresholds.max_slippage_per_leg_pct.min(MAX_SLIPPAGE_CEILING_PCT);

        if let Some(v) = env_parse::<u64>(&env, "SCAN_INTERVAL_SECS")? {
            detector.scan_interval_secs = v;
        }
        if let Some(v) = env("PRICE_FEED_URL") {
            detector.price_feed_url = Some(v);
        }
        if let Some(v) = env_parse::<Decimal>(&env, "MAX_GAS_PRICE_GWEI")? {
            execution.max_gas_price_gwei = v;
        }
        execution.max_gas_price_gwei = execution.max_gas_price_gwei.min(MAX_GAS_PRICE_CEILING_GWEI);
        if let Some(v) = env_parse::<bool>(&env, "ENABLE_TRADE_EXECUTION")? {
            execution.enable_trade_execution = v;
        }
        if let Some(v) = env_parse::<RotationPolicy>(&env, "ROTATION_POLICY")? {
            execution.rotation = v;
        }

        let config = Self {
            chain,
            flash_loan_contract,
            chains: file.chains,
            tokens: file.tokens,
            dexes: file.dexes,
            triangles: file.triangles,
            thresholds,
            rpc: file.rpc,
            detector,
            execution,
            orchestrator: file.orchestrator,
            wallet_keys,
            output_dir: file.output_dir.unwrap_or_else(|| PathBuf::from("output")),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::missing("chains"));
        }
        let active = self
            .chain_config(&self.chain)
            .ok_or_else(|| ConfigError::invalid("engine.chain", format!("`{}` is not in [[chains]]", self.chain)))?;
        for chain in &self.chains {
            if chain.rpc_urls.is_empty() {
                return Err(ConfigError::missing(format!("chains.{}.rpc_urls", chain.name)));
            }
        }
        if self.tokens.is_empty() {
            return Err(ConfigError::missing("tokens"));
        }
        if self.token(&active.native_symbol).is_none() {
            return Err(ConfigError::invalid(
                "chains.native_symbol",
                format!("`{}` is not a configured token", active.native_symbol),
            ));
        }
        if self.dexes.is_empty() {
            return Err(ConfigError::missing("dexes"));
        }
        let mut names = HashSet::new();
        for dex in &self.dexes {
            if !names.insert(dex.name.as_str()) {
                return Err(ConfigError::invalid("dexes.name", format!("duplicate dex `{}`", dex.name)));
            }
            match dex.kind {
                DexKind::ConstantProduct if dex.factory.is_none() => {
                    return Err(ConfigError::missing(format!("dexes.{}.factory", dex.name)));
                }
                DexKind::Weighted | DexKind::StableSwap if dex.pools.is_empty() => {
                    return Err(ConfigError::missing(format!("dexes.{}.pools", dex.name)));
                }
                DexKind::Weighted => {
                    if dex.pools.iter().any(|p| p.pool_id.is_none()) {
                        return Err(ConfigError::missing(format!("dexes.{}.pools.pool_id", dex.name)));
                    }
                }
                _ => {}
            }
            for pool in &dex.pools {
                for symbol in &pool.tokens {
                    self.ensure_token(symbol, &format!("dexes.{}.pools.tokens", dex.name))?;
                }
            }
        }
        if self.triangles.is_empty() {
            return Err(ConfigError::missing("triangles"));
        }
        for triangle in &self.triangles {
            for symbol in &triangle.tokens {
                self.ensure_token(symbol, "triangles.tokens")?;
            }
            if triangle.amount_in <= Decimal::ZERO {
                return Err(ConfigError::invalid("triangles.amount_in", "must be positive"));
            }
        }
        if self.detector.opportunity_ttl_secs == 0 {
            return Err(ConfigError::invalid("detector.opportunity_ttl_secs", "must be positive"));
        }
        if self.orchestrator.heartbeat_interval_secs == 0 {
            return Err(ConfigError::invalid("orchestrator.heartbeat_interval_secs", "must be positive"));
        }
        Ok(())
    }

    fn ensure_token(&self, symbol: &str, field: &str) -> Result<(), ConfigError> {
        if self.token(symbol).is_none() {
            return Err(ConfigError::invalid(field, format!("unknown token `{}`", symbol)));
        }
        Ok(())
    }

    pub fn token(&self, symbol: &str) -> Option<&TokenConfig> {
        self.tokens.iter().find(|t| t.symbol == symbol)
    }

    pub fn chain_config(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.name == name)
    }

    /// The chain the engine trades on. Presence is checked by `validate`.
    pub fn active_chain(&self) -> &ChainConfig {
        self.chain_config(&self.chain).unwrap_or(&self.chains[0])
    }

    pub fn dex(&self, name: &str) -> Option<&DexConfig> {
        self.dexes.iter().find(|d| d.name == name)
    }
}

fn env_parse<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, e.to_string())),
    }
}
