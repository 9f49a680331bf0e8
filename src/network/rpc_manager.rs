//! Ranked RPC endpoints per chain with failover

use alloy::providers::ProviderBuilder;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    ConcreteProvider,
    config::{ChainConfig, ConfigError},
    errors::{EngineError, EngineResult},
    types::{Endpoint, EndpointHealth},
};

/// A handle on the active endpoint of a chain.
///
/// Handles are cheap to clone. A handle stays usable after a failover, but
/// failures reported through it only count while it still names the active
/// endpoint.
#[derive(Clone)]
pub struct Connection {
    pub chain: String,
    pub url: String,
    pub rank: usize,
    provider: Arc<ConcreteProvider>,
}

impl Connection {
    pub fn provider(&self) -> &ConcreteProvider {
        &self.provider
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("chain", &self.chain)
            .field("url", &self.url)
            .field("rank", &self.rank)
            .finish()
    }
}

/// Outcome of a single call made through [`RpcManager::call_with_failover`].
#[derive(Debug)]
pub enum CallError {
    /// The endpoint itself misbehaved (transport error, timeout, garbage).
    Endpoint(anyhow::Error),
    /// The node answered and refused the request, e.g. a revert.
    Rejected(String),
}

impl CallError {
    /// Sort an alloy transport error into endpoint failure or node rejection.
    pub fn from_transport(err: alloy::transports::TransportError) -> Self {
        match err {
            alloy::transports::RpcError::ErrorResp(payload) => {
                CallError::Rejected(payload.message.to_string())
            }
            other => CallError::Endpoint(anyhow::Error::new(other)),
        }
    }
}

struct ChainEndpoints {
    endpoints: Vec<Endpoint>,
    active: Option<usize>,
    connection: Option<Connection>,
    failovers: u64,
}

impl ChainEndpoints {
    fn first_alive(&self) -> Option<usize> {
        self.endpoints.iter().position(|e| e.is_alive)
    }

    /// Next live endpoint after `from` in rank order, wrapping around.
    fn next_alive_after(&self, from: usize) -> Option<usize> {
        let n = self.endpoints.len();
        (1..n)
            .map(|step| (from + step) % n)
            .find(|&idx| self.endpoints[idx].is_alive)
    }
}

pub struct RpcManager {
    chains: RwLock<HashMap<String, ChainEndpoints>>,
    closed: AtomicBool,
}

impl RpcManager {
    pub fn new(chains: &[ChainConfig]) -> EngineResult<Self> {
        let mut map = HashMap::new();
        for chain in chains {
            for url in &chain.rpc_urls {
                url.parse::<reqwest::Url>().map_err(|e| {
                    ConfigError::invalid(format!("chains.{}.rpc_urls", chain.name), format!("{}: {}", url, e))
                })?;
            }
            let endpoints = chain
                .rpc_urls
                .iter()
                .enumerate()
                .map(|(rank, url)| Endpoint::new(&chain.name, url, rank))
                .collect();
            map.insert(
                chain.name.clone(),
                ChainEndpoints {
                    endpoints,
                    active: None,
                    connection: None,
                    failovers: 0,
                },
            );
        }
        Ok(Self {
            chains: RwLock::new(map),
            closed: AtomicBool::new(false),
        })
    }

    /// Connection to the highest-ranked live endpoint of `chain`.
    pub async fn get_connection(&self, chain: &str) -> EngineResult<Connection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::NoProviderAvailable { chain: chain.to_string() });
        }

        {
            let chains = self.chains.read().await;
            let state = chains
                .get(chain)
                .ok_or_else(|| EngineError::NoProviderAvailable { chain: chain.to_string() })?;
            if let (Some(idx), Some(conn)) = (state.active, &state.connection) {
                if state.endpoints[idx].is_alive {
                    return Ok(conn.clone());
                }
            }
        }

        let mut chains = self.chains.write().await;
        let state = chains
            .get_mut(chain)
            .ok_or_else(|| EngineError::NoProviderAvailable { chain: chain.to_string() })?;
        // Another caller may have connected while we waited for the lock.
        if let (Some(idx), Some(conn)) = (state.active, &state.connection) {
            if state.endpoints[idx].is_alive {
                return Ok(conn.clone());
            }
        }
        let Some(idx) = state.first_alive() else {
            state.active = None;
            state.connection = None;
            error!("❌ No live RPC endpoint for {}", chain);
            return Err(EngineError::NoProviderAvailable { chain: chain.to_string() });
        };
        let conn = open_connection(&state.endpoints[idx])?;
        info!("🔗 {} connected via {} (rank {})", chain, conn.url, conn.rank);
        state.active = Some(idx);
        state.connection = Some(conn.clone());
        Ok(conn)
    }

    /// Report that a call through `conn` failed. Fails over only when `conn`
    /// still names the active endpoint; stale reports are ignored.
    ///
    /// Returns the URL of the endpoint now active, if any.
    pub async fn report_failure(&self, conn: &Connection) -> Option<String> {
        let mut chains = self.chains.write().await;
        let state = chains.get_mut(&conn.chain)?;
        let active_url = state.active.map(|idx| state.endpoints[idx].url.clone());
        if active_url.as_deref() != Some(conn.url.as_str()) {
            debug!("Ignoring stale failure report for {} on {}", conn.url, conn.chain);
            return active_url;
        }
        let failed = conn.rank;
        state.endpoints[failed].record_failure();
        warn!(
            "⚠️ {} endpoint {} failed ({} consecutive)",
            conn.chain, conn.url, state.endpoints[failed].consecutive_failures
        );
        failover(state, failed)
    }

    /// Feed a probe result back. A failing active endpoint triggers an
    /// immediate failover; a recovered endpoint becomes eligible again but
    /// does not preempt the active one.
    pub async fn record_probe(&self, chain: &str, url: &str, outcome: Result<Duration, String>) {
        let mut chains = self.chains.write().await;
        let Some(state) = chains.get_mut(chain) else {
            return;
        };
        let Some(idx) = state.endpoints.iter().position(|e| e.url == url) else {
            return;
        };
        match outcome {
            Ok(latency) => {
                let was_dead = !state.endpoints[idx].is_alive;
                state.endpoints[idx].record_success(latency);
                if was_dead {
                    info!("✅ {} endpoint {} is back ({}ms)", chain, url, latency.as_millis());
                }
            }
            Err(reason) => {
                let was_alive = state.endpoints[idx].is_alive;
                state.endpoints[idx].record_failure();
                if was_alive {
                    warn!("⚠️ Probe failed for {} endpoint {}: {}", chain, url, reason);
                }
                if state.active == Some(idx) {
                    failover(state, idx);
                }
            }
        }
    }

    /// Run `op` against the active endpoint, failing over on endpoint errors
    /// until every endpoint has been tried once.
    pub async fn call_with_failover<T, F, Fut>(&self, chain: &str, what: &str, op: F) -> EngineResult<T>
    where
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let attempts = self.endpoint_count(chain).await.max(1);
        let mut last_error = None;
        for _ in 0..attempts {
            let conn = self.get_connection(chain).await?;
            match op(conn.clone()).await {
                Ok(value) => return Ok(value),
                Err(CallError::Rejected(message)) => {
                    return Err(EngineError::Rpc {
                        chain: chain.to_string(),
                        endpoint: conn.url.clone(),
                        message: format!("{} rejected: {}", what, message),
                        source: anyhow::anyhow!(message),
                    });
                }
                Err(CallError::Endpoint(e)) => {
                    self.report_failure(&conn).await;
                    last_error = Some((conn.url, e));
                }
            }
        }
        match last_error {
            Some((endpoint, source)) => Err(EngineError::Rpc {
                chain: chain.to_string(),
                endpoint,
                message: format!("{} failed on every endpoint", what),
                source,
            }),
            None => Err(EngineError::NoProviderAvailable { chain: chain.to_string() }),
        }
    }

    pub async fn endpoint_count(&self, chain: &str) -> usize {
        self.chains
            .read()
            .await
            .get(chain)
            .map(|s| s.endpoints.len())
            .unwrap_or(0)
    }

    /// Every `(chain, url)` pair, for the health probe.
    pub async fn endpoint_urls(&self) -> Vec<(String, String)> {
        let chains = self.chains.read().await;
        let mut urls: Vec<(String, String)> = chains
            .values()
            .flat_map(|s| s.endpoints.iter().map(|e| (e.chain.clone(), e.url.clone())))
            .collect();
        urls.sort();
        urls
    }

    pub async fn health_snapshot(&self, chain: &str) -> Option<EndpointHealth> {
        let chains = self.chains.read().await;
        let state = chains.get(chain)?;
        let active = state.active.map(|idx| &state.endpoints[idx]);
        Some(EndpointHealth {
            chain: chain.to_string(),
            active_url: active.map(|endpoint| endpoint.url.clone()),
            active_score: active.map(Endpoint::health_score).unwrap_or(0.0),
            failovers: state.failovers,
            endpoints: state.endpoints.clone(),
        })
    }

    pub async fn active_url(&self, chain: &str) -> Option<String> {
        let chains = self.chains.read().await;
        let state = chains.get(chain)?;
        state.active.map(|idx| state.endpoints[idx].url.clone())
    }

    /// Drop every provider. Later calls fail with `NoProviderAvailable`.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut chains = self.chains.write().await;
        for state in chains.values_mut() {
            state.active = None;
            state.connection = None;
        }
        info!("🔌 RPC connections closed");
    }
}

fn open_connection(endpoint: &Endpoint) -> EngineResult<Connection> {
    let url: reqwest::Url = endpoint.url.parse().map_err(|e| {
        ConfigError::invalid(format!("chains.{}.rpc_urls", endpoint.chain), format!("{}: {}", endpoint.url, e))
    })?;
    let provider: Arc<ConcreteProvider> = Arc::new(ProviderBuilder::new().on_http(url).boxed());
    Ok(Connection {
        chain: endpoint.chain.clone(),
        url: endpoint.url.clone(),
        rank: endpoint.rank,
        provider,
    })
}

fn failover(state: &mut ChainEndpoints, failed: usize) -> Option<String> {
    let from_url = state.endpoints[failed].url.clone();
    let chain = state.endpoints[failed].chain.clone();
    match state.next_alive_after(failed) {
        Some(next) => match open_connection(&state.endpoints[next]) {
            Ok(conn) => {
                state.failovers += 1;
                info!(
                    "🔄 {} failover #{}: {} → {}",
                    chain, state.failovers, from_url, conn.url
                );
                let url = conn.url.clone();
                state.active = Some(next);
                state.connection = Some(conn);
                Some(url)
            }
            Err(e) => {
                error!("❌ {} failover to {} failed: {}", chain, state.endpoints[next].url, e);
                state.active = None;
                state.connection = None;
                None
            }
        },
        None => {
            error!("❌ {} has no live RPC endpoint left after {} failed", chain, from_url);
            state.active = None;
            state.connection = None;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RpcManager {
        RpcManager::new(&[ChainConfig {
            name: "base".to_string(),
            chain_id: 8453,
            rpc_urls: vec![
                "http://e1.invalid".to_string(),
                "http://e2.invalid".to_string(),
                "http://e3.invalid".to_string(),
            ],
            native_symbol: "WETH".to_string(),
        }])
        .unwrap()
    }

    #[tokio::test]
    async fn connects_to_primary_first() {
        let rpc = manager();
        let conn = rpc.get_connection("base").await.unwrap();
        assert_eq!(conn.url, "http://e1.invalid");
        assert_eq!(conn.rank, 0);
    }

    #[tokio::test]
    async fn repeated_failure_of_same_handle_fails_over_once() {
        let rpc = manager();
        let conn = rpc.get_connection("base").await.unwrap();

        let after_first = rpc.report_failure(&conn).await;
        let after_second = rpc.report_failure(&conn).await;

        assert_eq!(after_first.as_deref(), Some("http://e2.invalid"));
        assert_eq!(after_second.as_deref(), Some("http://e2.invalid"));
        let next = rpc.get_connection("base").await.unwrap();
        assert_eq!(next.url, "http://e2.invalid");
        assert_eq!(rpc.health_snapshot("base").await.unwrap().failovers, 1);
    }

    #[tokio::test]
    async fn all_dead_means_no_provider() {
        let rpc = manager();
        for _ in 0..3 {
            let conn = rpc.get_connection("base").await.unwrap();
            rpc.report_failure(&conn).await;
        }
        let err = rpc.get_connection("base").await.unwrap_err();
        assert!(matches!(err, EngineError::NoProviderAvailable { ref chain } if chain == "base"));
    }

    #[tokio::test]
    async fn failover_wraps_around_to_live_primary() {
        let rpc = manager();
        let e1 = rpc.get_connection("base").await.unwrap();
        rpc.report_failure(&e1).await;
        rpc.record_probe("base", "http://e1.invalid", Ok(Duration::from_millis(10))).await;

        let e2 = rpc.get_connection("base").await.unwrap();
        assert_eq!(e2.url, "http://e2.invalid");
        rpc.record_probe("base", "http://e3.invalid", Err("down".into())).await;
        let now = rpc.report_failure(&e2).await;
        assert_eq!(now.as_deref(), Some("http://e1.invalid"));
    }

    #[tokio::test]
    async fn recovered_endpoint_does_not_preempt_active() {
        let rpc = manager();
        let e1 = rpc.get_connection("base").await.unwrap();
        rpc.report_failure(&e1).await;
        rpc.record_probe("base", "http://e1.invalid", Ok(Duration::from_millis(5))).await;

        assert_eq!(rpc.active_url("base").await.as_deref(), Some("http://e2.invalid"));
        let snapshot = rpc.health_snapshot("base").await.unwrap();
        assert!(snapshot.endpoints[0].is_alive);
        assert!(snapshot.active_score > 0.0);

        rpc.close().await;
        assert_eq!(rpc.health_snapshot("base").await.unwrap().active_score, 0.0);
    }

    #[tokio::test]
    async fn failing_probe_on_active_endpoint_fails_over() {
        let rpc = manager();
        rpc.get_connection("base").await.unwrap();
        rpc.record_probe("base", "http://e1.invalid", Err("timeout".into())).await;
        assert_eq!(rpc.active_url("base").await.as_deref(), Some("http://e2.invalid"));
    }

    #[tokio::test]
    async fn rejected_call_does_not_fail_over() {
        let rpc = manager();
        let err = rpc
            .call_with_failover("base", "eth_call", |_conn| async {
                Err::<(), _>(CallError::Rejected("execution reverted".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Rpc { .. }));
        assert_eq!(rpc.active_url("base").await.as_deref(), Some("http://e1.invalid"));
    }

    #[tokio::test]
    async fn endpoint_errors_walk_the_ranking() {
        let rpc = manager();
        let value = rpc
            .call_with_failover("base", "eth_blockNumber", |conn| async move {
                if conn.url == "http://e3.invalid" {
                    Ok(42u64)
                } else {
                    Err(CallError::Endpoint(anyhow::anyhow!("connection refused")))
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(rpc.health_snapshot("base").await.unwrap().failovers, 2);
    }

    #[tokio::test]
    async fn closed_manager_refuses_connections() {
        let rpc = manager();
        rpc.get_connection("base").await.unwrap();
        rpc.close().await;
        assert!(rpc.get_connection("base").await.is_err());
    }

    #[test]
    fn rejects_malformed_urls() {
        let err = RpcManager::new(&[ChainConfig {
            name: "base".to_string(),
            chain_id: 8453,
            rpc_urls: vec!["not a url".to_string()],
            native_symbol: "WETH".to_string(),
        }]);
        assert!(matches!(err, Err(EngineError::Config(_))));
    }
}
