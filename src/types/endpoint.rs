//! RPC endpoint records

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub chain: String,
    pub url: String,
    /// Fixed priority, 0 is the primary.
    pub rank: usize,
    pub last_latency: Option<Duration>,
    pub is_alive: bool,
    pub consecutive_failures: u32,
    pub total_failures: u64,
}

impl Endpoint {
    pub fn new(chain: &str, url: &str, rank: usize) -> Self {
        Self {
            chain: chain.to_string(),
            url: url.to_string(),
            rank,
            last_latency: None,
            is_alive: true,
            consecutive_failures: 0,
            total_failures: 0,
        }
    }

    pub fn record_success(&mut self, latency: Duration) {
        self.last_latency = Some(latency);
        self.is_alive = true;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.is_alive = false;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures = self.total_failures.saturating_add(1);
    }

    /// Score in `[0, 1]`. Dead endpoints score zero; slow ones decay towards zero.
    pub fn health_score(&self) -> f64 {
        if !self.is_alive {
            return 0.0;
        }
        let latency_ms = self.last_latency.map(|l| l.as_secs_f64() * 1000.0).unwrap_or(0.0);
        let latency_factor = 1.0 / (1.0 + latency_ms / 250.0);
        let failure_factor = 0.5_f64.powi(self.consecutive_failures.min(16) as i32);
        latency_factor * failure_factor
    }
}

/// Point-in-time view of one chain's endpoints, for logs and health checks.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub chain: String,
    pub active_url: Option<String>,
    /// [`Endpoint::health_score`] of the active endpoint, zero without one.
    pub active_score: f64,
    pub failovers: u64,
    pub endpoints: Vec<Endpoint>,
}
