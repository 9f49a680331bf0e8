//! System health preconditions for forwarding and executing trades

use alloy::primitives::{Address, U256};
use alloy::rpc::types::eth::TransactionRequest;
use alloy::network::TransactionBuilder;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    execution::{decode_health_counters, health_counters_calldata},
    network::{ChainClient, PriceBook, PriceFeed},
    types::SystemHealth,
    utils::to_base_units,
};

/// Checks RPC reachability, the flash-loan contract and the price feed.
/// Results are cached for `ttl`; an older result is stale and re-checked
/// inline by [`HealthMonitor::current`].
pub struct HealthMonitor {
    chain: Arc<dyn ChainClient>,
    contract: Address,
    min_contract_balance: U256,
    prices: PriceBook,
    feed: Option<Arc<dyn PriceFeed>>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, SystemHealth)>>,
}

impl HealthMonitor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        contract: Address,
        min_contract_balance_eth: Decimal,
        prices: PriceBook,
        feed: Option<Arc<dyn PriceFeed>>,
        ttl: Duration,
    ) -> Self {
        Self {
            chain,
            contract,
            min_contract_balance: to_base_units(min_contract_balance_eth, 18).unwrap_or_default(),
            prices,
            feed,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Cached health if fresh, otherwise a new check.
    pub async fn current(&self) -> SystemHealth {
        let mut cached = self.cached.lock().await;
        if let Some((at, health)) = cached.as_ref() {
            if at.elapsed() < self.ttl {
                return health.clone();
            }
        }
        let health = self.check_now().await;
        *cached = Some((Instant::now(), health.clone()));
        health
    }

    pub async fn is_healthy(&self) -> bool {
        self.current().await.is_healthy()
    }

    pub async fn check_now(&self) -> SystemHealth {
        let mut problems = Vec::new();

        let block_number = match self.chain.block_number().await {
            Ok(block) => Some(block),
            Err(e) => {
                problems.push(format!("RPC unreachable: {}", e));
                None
            }
        };
        let rpc_reachable = block_number.is_some();

        let contract_ok = rpc_reachable && self.check_contract(&mut problems).await;
        let price_feed_reachable = self.check_price_feed(&mut problems).await;

        let health = SystemHealth {
            rpc_reachable,
            contract_ok,
            price_feed_reachable,
            block_number,
            checked_at: Utc::now(),
            problems,
        };
        if health.is_healthy() {
            debug!("💚 System healthy at block {:?}", health.block_number);
        } else {
            warn!("🩺 System unhealthy: {}", health.problems.join("; "));
        }
        health
    }

    async fn check_contract(&self, problems: &mut Vec<String>) -> bool {
        let request = TransactionRequest::default()
            .with_to(self.contract)
            .with_input(health_counters_calldata());
        let counters = match self.chain.call(&request).await {
            Ok(data) => decode_health_counters(&data),
            Err(e) => {
                problems.push(format!("health counters unavailable: {}", e));
                return false;
            }
        };
        match counters {
            Ok((total, successful, failed)) => {
                if successful + failed > total {
                    problems.push(format!(
                        "contract counters inconsistent: {} ok + {} failed > {} total",
                        successful, failed, total
                    ));
                    return false;
                }
            }
            Err(e) => {
                problems.push(format!("health counters undecodable: {}", e));
                return false;
            }
        }

        match self.chain.balance(self.contract).await {
            Ok(balance) if balance >= self.min_contract_balance => true,
            Ok(balance) => {
                problems.push(format!(
                    "contract balance {} wei below minimum {} wei",
                    balance, self.min_contract_balance
                ));
                false
            }
            Err(e) => {
                problems.push(format!("contract balance unavailable: {}", e));
                false
            }
        }
    }

    async fn check_price_feed(&self, problems: &mut Vec<String>) -> bool {
        let (Some(feed), Some(ticker)) = (&self.feed, self.prices.probe_ticker()) else {
            // static prices only
            return true;
        };
        match feed.fetch(ticker).await {
            Ok(_) => true,
            Err(e) => {
                problems.push(format!("price feed unreachable: {}", e));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::tests::sample_config;
    use crate::errors::{EngineError, EngineResult};
    use crate::network::chain::mock::MockChain;
    use alloy::sol_types::SolValue;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;

    struct DeadFeed;

    #[async_trait]
    impl PriceFeed for DeadFeed {
        async fn fetch(&self, ticker: &str) -> EngineResult<Decimal> {
            Err(EngineError::Network {
                message: format!("{} unreachable", ticker),
                source: None,
                retry_count: 0,
            })
        }
    }

    fn healthy_chain(contract: Address) -> Arc<MockChain> {
        let chain = Arc::new(MockChain::new());
        let counters = (U256::from(5u64), U256::from(4u64), U256::from(1u64)).abi_encode_params();
        chain.respond(contract, health_counters_calldata(), counters);
        chain.balances.lock().unwrap().insert(contract, U256::from(10u64).pow(U256::from(17u64)));
        chain
    }

    fn monitor(chain: Arc<MockChain>, feed: Option<Arc<dyn PriceFeed>>, ttl: Duration) -> HealthMonitor {
        let config = sample_config();
        HealthMonitor::new(
            chain,
            config.flash_loan_contract,
            dec!(0.05),
            PriceBook::new(&config.tokens),
            feed,
            ttl,
        )
    }

    #[tokio::test]
    async fn healthy_when_every_check_passes() {
        let config = sample_config();
        let monitor = monitor(healthy_chain(config.flash_loan_contract), None, Duration::from_secs(30));
        let health = monitor.check_now().await;
        assert!(health.is_healthy(), "{:?}", health.problems);
        assert_eq!(health.block_number, Some(1_000));
    }

    #[tokio::test]
    async fn low_contract_balance_is_unhealthy() {
        let config = sample_config();
        let chain = healthy_chain(config.flash_loan_contract);
        chain.balances.lock().unwrap().insert(config.flash_loan_contract, U256::from(1u64));
        let health = monitor(chain, None, Duration::from_secs(30)).check_now().await;
        assert!(health.rpc_reachable);
        assert!(!health.contract_ok);
    }

    #[tokio::test]
    async fn unreachable_feed_is_unhealthy() {
        let config = sample_config();
        let health = monitor(
            healthy_chain(config.flash_loan_contract),
            Some(Arc::new(DeadFeed)),
            Duration::from_secs(30),
        )
        .check_now()
        .await;
        assert!(!health.price_feed_reachable);
        assert!(health.problems.iter().any(|p| p.contains("price feed")));
    }

    #[tokio::test]
    async fn fresh_result_is_reused_and_stale_result_rechecked() {
        let config = sample_config();
        let chain = healthy_chain(config.flash_loan_contract);

        let cached = monitor(chain.clone(), None, Duration::from_secs(30));
        assert!(cached.is_healthy().await);
        chain.offline.store(true, Ordering::SeqCst);
        assert!(cached.is_healthy().await);

        let stale = monitor(chain.clone(), None, Duration::ZERO);
        assert!(!stale.is_healthy().await);
    }
}
