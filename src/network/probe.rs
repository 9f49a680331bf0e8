//! Background liveness probe for RPC endpoints

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::RpcManager;

#[async_trait]
pub trait EndpointProbe: Send + Sync {
    /// Ping `url` and return the block number it reports.
    async fn ping(&self, url: &str) -> Result<u64>;
}

/// Probes with a bare `eth_blockNumber` request.
pub struct JsonRpcProbe {
    client: reqwest::Client,
}

impl JsonRpcProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build probe HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EndpointProbe for JsonRpcProbe {
    async fn ping(&self, url: &str) -> Result<u64> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_blockNumber",
            "params": [],
        });
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("probe request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("endpoint returned {}", response.status());
        }
        let json: serde_json::Value = response.json().await.context("probe response was not JSON")?;
        if let Some(err) = json.get("error") {
            anyhow::bail!("endpoint returned error: {}", err);
        }
        let hex = json["result"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing 'result' in probe response"))?;
        u64::from_str_radix(hex.trim_start_matches("0x"), 16).context("block number was not hex")
    }
}

/// Ping every endpoint once, concurrently, and feed the results back.
pub async fn probe_once(manager: &RpcManager, probe: &dyn EndpointProbe) {
    let urls = manager.endpoint_urls().await;
    let results = join_all(urls.iter().map(|(_, url)| async move {
        let started = Instant::now();
        probe
            .ping(url)
            .await
            .map(|block| (started.elapsed(), block))
            .map_err(|e| e.to_string())
    }))
    .await;

    for ((chain, url), result) in urls.iter().zip(results) {
        match &result {
            Ok((latency, block)) => debug!("{} {} at block {} in {}ms", chain, url, block, latency.as_millis()),
            Err(e) => debug!("{} {} probe error: {}", chain, url, e),
        }
        manager
            .record_probe(chain, url, result.map(|(latency, _)| latency))
            .await;
    }

    let chains: BTreeSet<&str> = urls.iter().map(|(chain, _)| chain.as_str()).collect();
    for chain in chains {
        let Some(health) = manager.health_snapshot(chain).await else {
            continue;
        };
        match &health.active_url {
            Some(url) => debug!(
                "🩺 {} active {} scores {:.2} after {} failovers",
                chain, url, health.active_score, health.failovers
            ),
            None => warn!("⚠️ {} has no live RPC endpoint", chain),
        }
    }
}

/// Probe on a fixed interval until cancelled.
pub async fn run_health_probe(
    manager: Arc<RpcManager>,
    probe: Arc<dyn EndpointProbe>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!("🩺 RPC health probe running every {}s", interval.as_secs());
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("🩺 RPC health probe stopped");
                return;
            }
            _ = ticker.tick() => {
                probe_once(&manager, probe.as_ref()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;

    #[tokio::test]
    async fn parses_block_number_from_node() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1b4"}"#)
            .create_async()
            .await;

        let probe = JsonRpcProbe::new(Duration::from_secs(2)).unwrap();
        let block = probe.ping(&server.url()).await.unwrap();

        assert_eq!(block, 436);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_is_a_failed_ping() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/").with_status(503).create_async().await;

        let probe = JsonRpcProbe::new(Duration::from_secs(2)).unwrap();
        assert!(probe.ping(&server.url()).await.is_err());
    }

    #[tokio::test]
    async fn probe_failure_moves_active_endpoint() {
        let mut primary = mockito::Server::new_async().await;
        primary.mock("POST", "/").with_status(500).create_async().await;
        let mut backup = mockito::Server::new_async().await;
        backup
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#)
            .create_async()
            .await;

        let manager = RpcManager::new(&[ChainConfig {
            name: "base".to_string(),
            chain_id: 8453,
            rpc_urls: vec![primary.url(), backup.url()],
            native_symbol: "WETH".to_string(),
        }])
        .unwrap();
        manager.get_connection("base").await.unwrap();

        let probe = JsonRpcProbe::new(Duration::from_secs(2)).unwrap();
        probe_once(&manager, &probe).await;

        assert_eq!(manager.active_url("base").await, Some(backup.url()));
        let health = manager.health_snapshot("base").await.unwrap();
        assert!(!health.endpoints[0].is_alive);
        assert!(health.endpoints[1].last_latency.is_some());
        assert_eq!(health.active_score, health.endpoints[1].health_score());
        assert!(health.active_score > 0.0);
    }
}
