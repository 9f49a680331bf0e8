//! USD prices for gas and profit accounting

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::prelude::*;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    config::TokenConfig,
    errors::{EngineError, EngineResult},
    network::{
        CallError,
        retry::{Backoff, retry_endpoint_errors},
    },
};

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest USD price for a ticker such as `ETHUSDT`.
    async fn fetch(&self, ticker: &str) -> EngineResult<Decimal>;
}

/// Ticker endpoint in the `/api/v3/ticker/price?symbol=` format.
pub struct HttpPriceFeed {
    client: reqwest::Client,
    base_url: String,
    backoff: Backoff,
}

impl HttpPriceFeed {
    pub fn new(base_url: impl Into<String>) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| {
                warn!("⚠️ Failed to initialize HTTP client: {}", e);
                EngineError::Network {
                    message: "Failed to build HTTP client".to_string(),
                    source: Some(e.into()),
                    retry_count: 0,
                }
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            backoff: Backoff::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// One request. Transport failures, 5xx and 429 are the endpoint's
    /// fault; any other answer the feed gave is final.
    async fn fetch_once(&self, url: &str) -> Result<Decimal, CallError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP request failed")
            .map_err(CallError::Endpoint)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("⚠️ Price feed returned error status {}: {}", status, body);
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                CallError::Endpoint(anyhow::anyhow!("Price feed error: {} - {}", status, body))
            } else {
                CallError::Rejected(format!("{} - {}", status, body))
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CallError::Rejected(format!("response was not JSON: {}", e)))?;
        let price_str = json["price"]
            .as_str()
            .ok_or_else(|| CallError::Rejected("missing 'price' field in response".into()))?;
        Decimal::from_str(price_str).map_err(|e| CallError::Rejected(format!("bad price {:?}: {}", price_str, e)))
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn fetch(&self, ticker: &str) -> EngineResult<Decimal> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, ticker);
        let what = format!("{} price fetch", ticker);
        let price = retry_endpoint_errors(&what, &self.backoff, || self.fetch_once(&url)).await?;

        if price <= Decimal::ZERO {
            warn!("⚠️ Invalid price received for {}: {}", ticker, price);
            return Err(EngineError::parsing(
                format!("price for {}", ticker),
                anyhow::anyhow!("non-positive price {}", price),
            ));
        }
        Ok(price)
    }
}

/// Latest known USD price per token symbol, seeded from configuration.
#[derive(Clone)]
pub struct PriceBook {
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
    tickers: Arc<HashMap<String, String>>,
}

impl PriceBook {
    pub fn new(tokens: &[TokenConfig]) -> Self {
        let prices = tokens.iter().map(|t| (t.symbol.clone(), t.usd_price)).collect();
        let tickers = tokens
            .iter()
            .filter_map(|t| t.feed_symbol.clone().map(|f| (t.symbol.clone(), f)))
            .collect();
        Self {
            prices: Arc::new(RwLock::new(prices)),
            tickers: Arc::new(tickers),
        }
    }

    pub async fn usd_price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().await.get(symbol).copied()
    }

    pub async fn set(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    /// Refresh every token that has a feed ticker. Tokens whose fetch fails
    /// keep their previous price. Returns how many were updated.
    pub async fn refresh(&self, feed: &dyn PriceFeed) -> usize {
        let mut updated = 0;
        for (symbol, ticker) in self.tickers.iter() {
            match feed.fetch(ticker).await {
                Ok(price) => {
                    debug!("💲 {} = ${}", symbol, price.round_dp(4));
                    self.set(symbol, price).await;
                    updated += 1;
                }
                Err(e) => warn!("⚠️ Keeping last {} price: {}", symbol, e),
            }
        }
        if updated > 0 {
            info!("💲 Refreshed {} token prices", updated);
        }
        updated
    }

    /// Any ticker the book follows, used to check the feed is reachable.
    pub fn probe_ticker(&self) -> Option<&str> {
        let mut tickers: Vec<&String> = self.tickers.values().collect();
        tickers.sort();
        tickers.first().map(|t| t.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use rust_decimal_macros::dec;

    fn fast_feed(url: &str) -> HttpPriceFeed {
        HttpPriceFeed::new(url).unwrap().with_backoff(Backoff {
            attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        })
    }

    fn tokens() -> Vec<TokenConfig> {
        vec![
            TokenConfig {
                symbol: "WETH".into(),
                address: Address::ZERO,
                decimals: 18,
                usd_price: dec!(3000),
                feed_symbol: Some("ETHUSDT".into()),
            },
            TokenConfig {
                symbol: "USDC".into(),
                address: Address::ZERO,
                decimals: 6,
                usd_price: dec!(1),
                feed_symbol: None,
            },
        ]
    }

    #[tokio::test]
    async fn fetches_ticker_price() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price?symbol=ETHUSDT")
            .with_status(200)
            .with_body(r#"{"symbol":"ETHUSDT","price":"3150.25000000"}"#)
            .create_async()
            .await;

        let price = fast_feed(&server.url()).fetch("ETHUSDT").await.unwrap();
        assert_eq!(price, dec!(3150.25));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_configured_price() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price?symbol=ETHUSDT")
            .with_status(500)
            .expect_at_least(1)
            .create_async()
            .await;

        let book = PriceBook::new(&tokens());
        let updated = book.refresh(&fast_feed(&server.url())).await;

        assert_eq!(updated, 0);
        assert_eq!(book.usd_price("WETH").await, Some(dec!(3000)));
        assert_eq!(book.usd_price("USDC").await, Some(dec!(1)));
    }

    #[tokio::test]
    async fn server_errors_are_retried_but_unknown_tickers_are_not() {
        let mut server = mockito::Server::new_async().await;
        let flaky = server
            .mock("GET", "/api/v3/ticker/price?symbol=ETHUSDT")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;
        let unknown = server
            .mock("GET", "/api/v3/ticker/price?symbol=NOPEUSDT")
            .with_status(400)
            .with_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#)
            .expect(1)
            .create_async()
            .await;

        let feed = fast_feed(&server.url());
        assert!(feed.fetch("ETHUSDT").await.is_err());
        let err = feed.fetch("NOPEUSDT").await.unwrap_err();
        assert!(err.to_string().contains("rejected"), "{}", err);

        flaky.assert_async().await;
        unknown.assert_async().await;
    }

    #[tokio::test]
    async fn refresh_updates_followed_tokens() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price?symbol=ETHUSDT")
            .with_status(200)
            .with_body(r#"{"price":"2999.5"}"#)
            .create_async()
            .await;

        let book = PriceBook::new(&tokens());
        assert_eq!(book.refresh(&fast_feed(&server.url())).await, 1);
        assert_eq!(book.usd_price("WETH").await, Some(dec!(2999.5)));
        assert_eq!(book.probe_ticker(), Some("ETHUSDT"));
    }
}
