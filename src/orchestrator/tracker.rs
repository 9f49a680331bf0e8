//! Pipeline and trade performance tracking

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    errors::{CircuitBreaker, EngineResult},
    storage::AuditLog,
    types::{Trade, TradeResult, TradeStatus},
    utils::{print_session_stats, print_trade},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutorStats {
    pub trades: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub profit_usd: Decimal,
    pub gas_used: u64,
}

impl ExecutorStats {
    fn record(&mut self, trade: &Trade) {
        self.trades += 1;
        match trade.status {
            TradeStatus::Completed => self.completed += 1,
            TradeStatus::Failed => self.failed += 1,
            TradeStatus::Cancelled => self.cancelled += 1,
            TradeStatus::Pending | TradeStatus::Executing => {}
        }
        self.profit_usd += trade.actual_profit_usd.unwrap_or_default();
        self.gas_used += trade.gas_used.unwrap_or_default();
    }

    /// Completed over attempted, cancelled trades excluded.
    pub fn success_rate_pct(&self) -> Decimal {
        let attempted = self.completed + self.failed;
        if attempted == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.completed) * Decimal::ONE_HUNDRED / Decimal::from(attempted)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub uptime_secs: u64,
    pub opportunities_detected: u64,
    pub opportunities_validated: u64,
    pub opportunities_rejected: u64,
    pub fleet: ExecutorStats,
    pub per_executor: BTreeMap<String, ExecutorStats>,
}

#[derive(Default)]
struct TradeStats {
    fleet: ExecutorStats,
    per_executor: BTreeMap<String, ExecutorStats>,
}

pub struct PerformanceTracker {
    started: Instant,
    detected: AtomicU64,
    validated: AtomicU64,
    rejected: AtomicU64,
    trades: RwLock<TradeStats>,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            detected: AtomicU64::new(0),
            validated: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            trades: RwLock::new(TradeStats::default()),
        }
    }

    pub fn record_candidate(&self) {
        self.detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation(&self, valid: bool) {
        if valid {
            self.validated.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn record_trade(&self, result: &TradeResult) {
        let mut stats = self.trades.write().await;
        stats.fleet.record(&result.trade);
        stats
            .per_executor
            .entry(result.executor.clone())
            .or_default()
            .record(&result.trade);
    }

    pub async fn snapshot(&self) -> PerformanceSnapshot {
        let stats = self.trades.read().await;
        PerformanceSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            opportunities_detected: self.detected.load(Ordering::Relaxed),
            opportunities_validated: self.validated.load(Ordering::Relaxed),
            opportunities_rejected: self.rejected.load(Ordering::Relaxed),
            fleet: stats.fleet.clone(),
            per_executor: stats.per_executor.clone(),
        }
    }

    /// Consume the trade result stream: audit and count each trade, and log a
    /// session summary every `summary_interval`.
    pub async fn run(
        self: Arc<Self>,
        mut results: mpsc::Receiver<TradeResult>,
        audit: Arc<AuditLog>,
        breaker: Arc<CircuitBreaker>,
        summary_interval: Duration,
        cancel: CancellationToken,
    ) -> EngineResult<()> {
        let mut ticker = tokio::time::interval(summary_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = results.recv() => {
                    let Some(result) = received else { break };
                    print_trade(&result.trade);
                    if let Err(e) = audit.record_trade(&result) {
                        warn!("⚠️ Failed to audit trade {}: {}", result.trade.trade_id, e);
                    }
                    self.record_trade(&result).await;
                }
                _ = ticker.tick() => {
                    print_session_stats(&self.snapshot().await, &breaker.state().await);
                }
            }
        }
        info!("📊 Performance tracker stopped");
        print_session_stats(&self.snapshot().await, &breaker.state().await);
        Ok(())
    }
}
