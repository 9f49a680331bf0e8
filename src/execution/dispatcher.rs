//! Wallet slots and rotation

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ExecutionEngine, Wallet, prepare_wallet};
use crate::{
    config::RotationPolicy,
    errors::{EngineError, EngineResult},
    queue::WorkQueue,
    types::{ArbitrageOpportunity, Trade, TradeResult, TradeStatus},
};

/// Whether the dispatcher moves to the next wallet after `trade`.
pub fn rotation_due(policy: RotationPolicy, trade: &Trade) -> bool {
    match policy {
        RotationPolicy::Never => false,
        RotationPolicy::EveryTrade => trade.tx_hash.is_some(),
        RotationPolicy::ProfitAbove(threshold) => {
            trade.status == TradeStatus::Completed
                && trade.actual_profit_usd.unwrap_or(Decimal::ZERO) > threshold
        }
    }
}

/// Feeds validated opportunities to one wallet slot at a time. Each slot is
/// a task owning its [`Wallet`], so a wallet's trades are strictly serial.
pub struct ExecutionDispatcher {
    engine: Arc<ExecutionEngine>,
    validated: Arc<dyn WorkQueue>,
    rotation: RotationPolicy,
    results: mpsc::Sender<TradeResult>,
    poll_interval: Duration,
}

impl ExecutionDispatcher {
    pub fn new(
        engine: Arc<ExecutionEngine>,
        validated: Arc<dyn WorkQueue>,
        rotation: RotationPolicy,
        results: mpsc::Sender<TradeResult>,
    ) -> Self {
        Self {
            engine,
            validated,
            rotation,
            results,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn run(self, wallets: Vec<Wallet>, cancel: CancellationToken) -> EngineResult<()> {
        if wallets.is_empty() {
            return Err(EngineError::Execution {
                trade_id: "-".into(),
                reason: "no wallets configured".into(),
            });
        }

        let (done_tx, mut done_rx) = mpsc::channel::<TradeResult>(wallets.len());
        let mut slots = Vec::with_capacity(wallets.len());
        for (index, wallet) in wallets.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel::<ArbitrageOpportunity>(1);
            let name = format!("slot-{}", index);
            tokio::spawn(run_slot(
                name.clone(),
                wallet,
                self.engine.clone(),
                rx,
                done_tx.clone(),
                cancel.child_token(),
            ));
            slots.push((name, tx));
        }
        drop(done_tx);
        info!("🚀 Execution dispatcher running with {} wallet slots", slots.len());

        let mut active = 0usize;
        let mut in_flight = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                done = done_rx.recv() => {
                    let Some(result) = done else { break };
                    in_flight = false;
                    if rotation_due(self.rotation, &result.trade) {
                        active = (active + 1) % slots.len();
                        info!("🔄 Rotating to wallet {}", slots[active].0);
                    }
                    if self.results.send(result).await.is_err() {
                        warn!("⚠️ Trade result stream closed");
                    }
                }
                _ = tokio::time::sleep(self.poll_interval), if !in_flight => {
                    match self.validated.pop().await {
                        Ok(Some(record)) => {
                            let (name, slot) = &slots[active];
                            if slot.send(record.opportunity).await.is_err() {
                                warn!("⚠️ Wallet {} is gone", name);
                                break;
                            }
                            in_flight = true;
                        }
                        Ok(None) => {}
                        Err(e) => warn!("⚠️ Validated queue unavailable: {}", e),
                    }
                }
            }
        }
        info!("🛑 Execution dispatcher stopped");
        Ok(())
    }
}

async fn run_slot(
    name: String,
    mut wallet: Wallet,
    engine: Arc<ExecutionEngine>,
    mut opportunities: mpsc::Receiver<ArbitrageOpportunity>,
    done: mpsc::Sender<TradeResult>,
    cancel: CancellationToken,
) {
    if let Err(e) = prepare_wallet(engine.chain().as_ref(), &mut wallet).await {
        warn!("⚠️ {}: nonce sync deferred: {}", name, e);
    }
    loop {
        let opportunity = tokio::select! {
            _ = cancel.cancelled() => return,
            next = opportunities.recv() => match next {
                Some(opportunity) => opportunity,
                None => return,
            },
        };
        // Never abandon a trade halfway; cancellation is checked between trades.
        let trade = engine.execute(&opportunity, &mut wallet).await;
        let result = TradeResult {
            executor: name.clone(),
            trade,
        };
        if done.send(result).await.is_err() {
            return;
        }
    }
}
