//! Triangular opportunity detection

use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CycleEconomics, PriceQuoter, calculate_cycle};
use crate::{
    config::{Config, TriangleConfig},
    errors::EngineResult,
    network::{ChainClient, PriceBook},
    queue::{QueueRecord, WorkQueue},
    types::{ArbitrageOpportunity, Quote},
    utils::{gwei_to_wei, print_arbitrage_opportunity},
};

/// Ordered DEX triples to try for each triangle: distinct DEXs when at least
/// three are configured, otherwise every ordered triple with repetition.
pub fn dex_permutations(names: &[String]) -> Vec<[String; 3]> {
    let mut out = Vec::new();
    let distinct = names.len() >= 3;
    for a in names {
        for b in names {
            for c in names {
                if distinct && (a == b || b == c || a == c) {
                    continue;
                }
                out.push([a.clone(), b.clone(), c.clone()]);
            }
        }
    }
    out
}

pub struct OpportunityDetector {
    config: Arc<Config>,
    quoter: Arc<PriceQuoter>,
    prices: PriceBook,
    chain: Arc<dyn ChainClient>,
    candidates: Arc<dyn WorkQueue>,
    scans: AtomicU64,
    emitted: AtomicU64,
}

impl OpportunityDetector {
    pub fn new(
        config: Arc<Config>,
        quoter: Arc<PriceQuoter>,
        prices: PriceBook,
        chain: Arc<dyn ChainClient>,
        candidates: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            config,
            quoter,
            prices,
            chain,
            candidates,
            scans: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    async fn gas_price_wei(&self) -> u128 {
        match self.chain.gas_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!("⚠️ Using fallback gas price: {}", e);
                gwei_to_wei(self.config.detector.fallback_gas_price_gwei)
            }
        }
    }

    async fn economics(&self, triangle: &TriangleConfig, gas_price_wei: u128) -> Option<CycleEconomics> {
        let token_a_usd = self.prices.usd_price(&triangle.tokens[0]).await?;
        let native_usd = self.prices.usd_price(&self.config.active_chain().native_symbol).await?;
        Some(CycleEconomics {
            token_a_usd,
            native_usd,
            gas_price_wei,
            flash_loan_fee_bps: self.config.detector.flash_loan_fee_bps,
            flash_loan_gas_overhead: self.config.detector.flash_loan_gas_overhead,
            large_trade_usd: self.config.detector.large_trade_usd,
            ttl: chrono::Duration::seconds(self.config.detector.opportunity_ttl_secs as i64),
        })
    }

    async fn quote_leg(&self, dex: &str, token_in: &str, token_out: &str, amount_in: Decimal) -> Option<Quote> {
        let timeout = Duration::from_millis(self.config.detector.quote_timeout_ms);
        match tokio::time::timeout(timeout, self.quoter.quote(dex, token_in, token_out, amount_in)).await {
            Ok(Ok(quote)) => quote,
            Ok(Err(e)) => {
                debug!("quote {}→{} on {} skipped: {}", token_in, token_out, dex, e);
                None
            }
            Err(_) => {
                debug!("quote {}→{} on {} timed out", token_in, token_out, dex);
                None
            }
        }
    }

    async fn price_path(&self, dexes: &[String; 3], triangle: &TriangleConfig) -> Option<Vec<Quote>> {
        let [a, b, c] = &triangle.tokens;
        let first = self.quote_leg(&dexes[0], a, b, triangle.amount_in).await?;
        let second = self.quote_leg(&dexes[1], b, c, first.amount_out).await?;
        let third = self.quote_leg(&dexes[2], c, a, second.amount_out).await?;
        Some(vec![first, second, third])
    }

    /// Best emitting permutation for one triangle, if any.
    pub async fn scan_triangle(
        &self,
        triangle: &TriangleConfig,
        gas_price_wei: u128,
    ) -> Option<ArbitrageOpportunity> {
        let Some(economics) = self.economics(triangle, gas_price_wei).await else {
            warn!("⚠️ No USD price for triangle {:?}", triangle.tokens);
            return None;
        };
        let names: Vec<String> = self.config.dexes.iter().map(|d| d.name.clone()).collect();
        let permutations = dex_permutations(&names);
        let paths = join_all(permutations.iter().map(|p| self.price_path(p, triangle))).await;

        let now = Utc::now();
        let min_spread = Decimal::from(self.config.thresholds.min_spread_bps);
        paths
            .into_iter()
            .flatten()
            .filter_map(|legs| calculate_cycle(&self.config.chain, legs, &economics, now))
            .filter(|opp| opp.spread_bps >= min_spread && opp.net_profit_usd > Decimal::ZERO)
            .max_by(|a, b| a.net_profit_usd.cmp(&b.net_profit_usd))
    }

    /// One pass over every triangle. Returns how many candidates were queued.
    pub async fn scan_once(&self) -> EngineResult<usize> {
        let scan = self.scans.fetch_add(1, Ordering::Relaxed) + 1;
        let gas_price_wei = self.gas_price_wei().await;
        let mut queued = 0;
        for triangle in &self.config.triangles {
            if let Some(opportunity) = self.scan_triangle(triangle, gas_price_wei).await {
                print_arbitrage_opportunity(&opportunity);
                self.candidates.push(QueueRecord::new(opportunity)).await?;
                queued += 1;
            }
        }
        self.emitted.fetch_add(queued as u64, Ordering::Relaxed);
        debug!("scan #{} queued {} candidates", scan, queued);
        Ok(queued)
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> EngineResult<()> {
        let interval = Duration::from_secs(self.config.detector.scan_interval_secs.max(1));
        info!(
            "🔍 Scanning {} triangles across {} DEXs every {}s",
            self.config.triangles.len(),
            self.config.dexes.len(),
            interval.as_secs()
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        warn!("⚠️ Scan failed: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::tests::sample_config;
    use crate::network::chain::mock::MockChain;
    use crate::pools::{PoolState, StaticPoolSource};
    use crate::queue::MemoryQueue;
    use alloy::primitives::U256;
    use rust_decimal_macros::dec;

    #[test]
    fn distinct_permutations_with_three_dexes() {
        let names: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let perms = dex_permutations(&names);
        assert_eq!(perms.len(), 6);
        assert!(perms.iter().all(|p| p[0] != p[1] && p[1] != p[2] && p[0] != p[2]));
    }

    #[test]
    fn repetition_with_fewer_dexes() {
        let names: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dex_permutations(&names).len(), 8);
        assert_eq!(dex_permutations(&names[..1]).len(), 1);
    }

    fn unit() -> U256 {
        U256::from(10u64).pow(U256::from(18u64))
    }

    /// WETH is cheap on uniswap's WETH/USDC pair and expensive on its DAI/WETH
    /// pair, so WETH→USDC→DAI→WETH is profitable through curve.
    fn mispriced_source() -> StaticPoolSource {
        StaticPoolSource::new()
            .with_pair(
                "uniswap",
                "WETH",
                "USDC",
                PoolState::ConstantProduct {
                    reserve_in: dec!(10_000),
                    reserve_out: dec!(30_600_000),
                    fee_bps: 30,
                },
            )
            .with_pair(
                "uniswap",
                "DAI",
                "WETH",
                PoolState::ConstantProduct {
                    reserve_in: dec!(30_000_000),
                    reserve_out: dec!(10_000),
                    fee_bps: 30,
                },
            )
            .with_pair(
                "curve",
                "USDC",
                "DAI",
                PoolState::StableSwap {
                    pool: crate::amm::StableSwapPool {
                        balances: vec![U256::from(50_000_000u64) * unit(), U256::from(50_000_000u64) * unit()],
                        amp: U256::from(1_000u64),
                        fee: U256::from(1_000_000u64),
                        total_supply: U256::from(100_000_000u64) * unit(),
                    },
                    i: 0,
                    j: 1,
                },
            )
    }

    fn detector(source: StaticPoolSource, queue: Arc<MemoryQueue>) -> OpportunityDetector {
        let config = Arc::new(sample_config());
        let quoter = Arc::new(PriceQuoter::new(Arc::new(source), &config));
        let prices = PriceBook::new(&config.tokens);
        OpportunityDetector::new(config, quoter, prices, Arc::new(MockChain::new()), queue)
    }

    #[tokio::test]
    async fn queues_best_profitable_cycle() {
        let queue = Arc::new(MemoryQueue::new("candidates"));
        let detector = detector(mispriced_source(), queue.clone());

        assert_eq!(detector.scan_once().await.unwrap(), 1);
        let record = queue.pop().await.unwrap().unwrap();
        let opp = record.opportunity;
        assert_eq!(opp.dex_path(), vec!["uniswap", "curve", "uniswap"]);
        assert!(opp.spread_bps >= dec!(23));
        assert!(opp.net_profit_usd > Decimal::ZERO);
        assert!(opp.expires_at > opp.detected_at);
        assert_eq!(opp.legs.len(), 3);
    }

    #[tokio::test]
    async fn balanced_markets_queue_nothing() {
        let source = StaticPoolSource::new()
            .with_pair(
                "uniswap",
                "WETH",
                "USDC",
                PoolState::ConstantProduct {
                    reserve_in: dec!(10_000),
                    reserve_out: dec!(30_000_000),
                    fee_bps: 30,
                },
            )
            .with_pair(
                "uniswap",
                "DAI",
                "WETH",
                PoolState::ConstantProduct {
                    reserve_in: dec!(30_000_000),
                    reserve_out: dec!(10_000),
                    fee_bps: 30,
                },
            );
        let queue = Arc::new(MemoryQueue::new("candidates"));
        let detector = detector(source, queue.clone());

        assert_eq!(detector.scan_once().await.unwrap(), 0);
        assert!(queue.is_empty().await);
    }
}
