//! Trade execution engine

use alloy::network::TransactionBuilder;
use alloy::primitives::{TxHash, keccak256};
use alloy::rpc::types::eth::TransactionRequest;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::{
    ApprovalDecision, ApprovalGate, ApprovalOutcome, ApprovalPolicy, Wallet, await_approval, build_calldata,
    settlement_from_logs,
};
use crate::{
    config::Config,
    errors::{Broadcast, CircuitBreaker, EngineError, EngineResult},
    network::{ChainClient, PriceBook, ReceiptSummary},
    types::{ArbitrageOpportunity, Trade, TradeStatus},
    utils::{from_base_units, gwei_to_wei, wei_to_gwei},
    validation::{HealthMonitor, validate_opportunity},
};

/// Builds, signs, submits and confirms one flash-loan trade at a time for a
/// given wallet. Failed trades are recorded and never retried.
pub struct ExecutionEngine {
    config: Arc<Config>,
    chain: Arc<dyn ChainClient>,
    health: Arc<HealthMonitor>,
    prices: PriceBook,
    approvals: Arc<dyn ApprovalGate>,
    policy: ApprovalPolicy,
    breaker: Arc<CircuitBreaker>,
    approval_poll: Duration,
}

enum Confirmation {
    Mined(ReceiptSummary),
    TimedOut,
}

impl ExecutionEngine {
    pub fn new(
        config: Arc<Config>,
        chain: Arc<dyn ChainClient>,
        health: Arc<HealthMonitor>,
        prices: PriceBook,
        approvals: Arc<dyn ApprovalGate>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let policy = ApprovalPolicy::from_settings(&config.execution);
        Self {
            config,
            chain,
            health,
            prices,
            approvals,
            policy,
            breaker,
            approval_poll: Duration::from_secs(1),
        }
    }

    pub fn with_approval_poll(mut self, interval: Duration) -> Self {
        self.approval_poll = interval;
        self
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    /// Run `opportunity` to a terminal state with `wallet`.
    pub async fn execute(&self, opportunity: &ArbitrageOpportunity, wallet: &mut Wallet) -> Trade {
        let started = Instant::now();
        let mut trade = Trade::new(opportunity);
        trade.wallet_address = Some(wallet.address());

        if let Err(abort) = self.run_trade(opportunity, wallet, &mut trade).await {
            let finish = match abort {
                Abort::Cancel(reason) => trade.cancel(reason),
                Abort::Fail(reason) => trade.fail(reason),
            };
            if let Err(e) = finish {
                error!("Trade {} left in {}: {}", trade.trade_id, trade.status, e);
            }
        }
        trade.execution_time_ms = started.elapsed().as_millis() as u64;
        trade
    }

    async fn run_trade(
        &self,
        opportunity: &ArbitrageOpportunity,
        wallet: &mut Wallet,
        trade: &mut Trade,
    ) -> Result<(), Abort> {
        let execution = &self.config.execution;

        let revalidated = validate_opportunity(opportunity, &self.config.thresholds, Utc::now());
        if !revalidated.valid {
            return Err(Abort::Cancel(format!("re-validation failed: {}", revalidated.errors.join("; "))));
        }

        let health = self.health.current().await;
        if !health.is_healthy() {
            return Err(Abort::Cancel(format!("system unhealthy: {}", health.problems.join("; "))));
        }

        if let ApprovalDecision::Manual { reason } = self.policy.decide(opportunity) {
            // An approval is worthless once the opportunity has expired.
            let remaining = (opportunity.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            let timeout = Duration::from_secs(execution.approval_timeout_secs).min(remaining);
            let outcome = await_approval(self.approvals.as_ref(), opportunity, &reason, timeout, self.approval_poll)
                .await
                .map_err(|e| Abort::Cancel(format!("approval unavailable: {}", e)))?;
            match outcome {
                ApprovalOutcome::Rejected => return Err(Abort::Cancel("approval rejected".into())),
                _ if opportunity.is_expired(Utc::now()) => {
                    return Err(Abort::Cancel("opportunity expired awaiting approval".into()));
                }
                ApprovalOutcome::TimedOut => return Err(Abort::Cancel("approval timed out".into())),
                ApprovalOutcome::Approved => info!("👍 Trade for {} approved", opportunity.id),
            }
        }

        if !execution.enable_trade_execution {
            info!("🧪 Dry run: would execute {}", opportunity.route_label());
            return Err(Abort::Cancel("trade execution disabled".into()));
        }

        let gas_price = self
            .chain
            .gas_price()
            .await
            .map_err(|e| Abort::Cancel(format!("gas price unavailable: {}", e)))?;
        let ceiling = gwei_to_wei(execution.max_gas_price_gwei);
        if gas_price > ceiling {
            return Err(Abort::Cancel(format!(
                "gas price {} gwei above ceiling {} gwei",
                wei_to_gwei(gas_price).round_dp(3),
                execution.max_gas_price_gwei
            )));
        }
        trade.gas_price_gwei = Some(wei_to_gwei(gas_price));

        let calldata = build_calldata(opportunity, &self.config).map_err(|e| Abort::Fail(e.to_string()))?;
        let estimate_request = TransactionRequest::default()
            .with_from(wallet.address())
            .with_to(self.config.flash_loan_contract)
            .with_input(calldata.clone());
        let estimated = self
            .chain
            .estimate_gas(&estimate_request)
            .await
            .map_err(|e| Abort::Fail(format!("gas estimation failed: {}", e)))?;
        let gas_limit = estimated + estimated * execution.gas_limit_buffer_pct / 100;

        trade.transition(TradeStatus::Executing).map_err(|e| Abort::Fail(e.to_string()))?;

        if wallet.next_nonce().is_none() {
            wallet
                .sync_nonce(self.chain.as_ref())
                .await
                .map_err(|e| Abort::Fail(format!("nonce unavailable: {}", e)))?;
        }

        // Last gates before anything is signed.
        if opportunity.is_expired(Utc::now()) {
            return Err(Abort::Cancel("opportunity expired before signing".into()));
        }
        if !self.breaker.can_proceed().await {
            let state = self.breaker.state().await;
            return Err(Abort::Cancel(format!(
                "circuit breaker open: {}",
                state.reason.unwrap_or_default()
            )));
        }

        let nonce = wallet.reserve_nonce().map_err(|e| Abort::Fail(e.to_string()))?;
        let priority_fee = gwei_to_wei(execution.priority_fee_gwei).min(ceiling);
        let request = Wallet::eip1559_request(
            self.config.flash_loan_contract,
            calldata,
            self.config.active_chain().chain_id,
            nonce,
            gas_limit,
            ceiling,
            priority_fee,
        );
        let raw = match wallet.sign(request).await {
            Ok(raw) => raw,
            Err(e) => {
                wallet.release_nonce(nonce);
                return Err(Abort::Fail(e.to_string()));
            }
        };

        // A nonce goes back only when the node plainly refused the transaction.
        // Anything else may have reached a mempool, so the nonce stays spent
        // and the receipt decides.
        let tx_hash = match self.chain.send_raw_transaction(&raw).await {
            Ok(hash) => hash,
            Err(
                e @ EngineError::Submission {
                    broadcast: Broadcast::Refused,
                    ..
                },
            ) => {
                wallet.release_nonce(nonce);
                return Err(Abort::Fail(format!("submission rejected: {}", e)));
            }
            Err(e) => {
                let tx_hash = keccak256(&raw);
                warn!(
                    trade_id = %trade.trade_id,
                    nonce,
                    "⚠️ Submission of {:?} uncertain, watching for a receipt: {}",
                    tx_hash,
                    e
                );
                tx_hash
            }
        };
        trade.nonce = Some(nonce);
        trade.tx_hash = Some(format!("{:?}", tx_hash));
        trade.executed_at = Some(Utc::now());
        info!(
            trade_id = %trade.trade_id,
            nonce,
            "📡 Submitted {} as {:?}",
            opportunity.route_label(),
            tx_hash
        );

        match self.await_receipt(tx_hash).await {
            Confirmation::Mined(receipt) => {
                trade.gas_used = Some(receipt.gas_used);
                trade.block_number = receipt.block_number;
                if receipt.effective_gas_price > 0 {
                    trade.gas_price_gwei = Some(wei_to_gwei(receipt.effective_gas_price));
                }
                if !receipt.success {
                    return Err(Abort::Fail(format!("reverted in block {:?}", receipt.block_number)));
                }
                match self.realised_outcome(opportunity, &receipt).await {
                    Some((amount_out, profit)) => {
                        trade.amount_out = Some(amount_out);
                        trade.actual_profit_usd = Some(profit);
                    }
                    None => warn!(
                        trade_id = %trade.trade_id,
                        "⚠️ No readable settlement in receipt for {:?}, realised profit unknown",
                        tx_hash
                    ),
                }
                trade.transition(TradeStatus::Completed).map_err(|e| Abort::Fail(e.to_string()))?;
                Ok(())
            }
            Confirmation::TimedOut => Err(Abort::Fail(format!(
                "no receipt after {}s",
                execution.confirmation_timeout_secs
            ))),
        }
    }

    async fn await_receipt(&self, tx_hash: TxHash) -> Confirmation {
        let execution = &self.config.execution;
        let timeout = Duration::from_secs(execution.confirmation_timeout_secs);
        let poll = Duration::from_millis(execution.receipt_poll_interval_ms.max(1));
        let wait = async {
            loop {
                match self.chain.transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => warn!("⚠️ Receipt poll for {:?} failed: {}", tx_hash, e),
                }
                tokio::time::sleep(poll).await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(receipt) => Confirmation::Mined(receipt),
            Err(_) => Confirmation::TimedOut,
        }
    }

    /// Amount returned by the route and realised USD profit, read from the
    /// contract's settlement event: returned less borrowed less the loan
    /// premium, priced in the start token, less the gas actually paid.
    async fn realised_outcome(
        &self,
        opportunity: &ArbitrageOpportunity,
        receipt: &ReceiptSummary,
    ) -> Option<(Decimal, Decimal)> {
        let settlement = settlement_from_logs(self.config.flash_loan_contract, &receipt.logs)?;
        let token = self.config.token(&opportunity.token_a)?;
        let returned = from_base_units(settlement.amount_returned, token.decimals)?;
        let borrowed = from_base_units(settlement.amount_borrowed, token.decimals)?;
        let premium = from_base_units(settlement.premium, token.decimals)?;
        let token_usd = self.prices.usd_price(&token.symbol).await.unwrap_or(token.usd_price);

        let native = &self.config.active_chain().native_symbol;
        let native_usd = self.prices.usd_price(native).await.unwrap_or_default();
        let gas_wei = Decimal::from(receipt.gas_used).checked_mul(Decimal::from(receipt.effective_gas_price))?;
        let gas_usd = gas_wei / Decimal::from(1_000_000_000_000_000_000u64) * native_usd;

        let profit = (returned - borrowed - premium).checked_mul(token_usd)? - gas_usd;
        Some((returned, profit.round_dp(2)))
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

enum Abort {
    Cancel(String),
    Fail(String),
}

/// Sync a slot's wallet before its first trade.
pub async fn prepare_wallet(chain: &dyn ChainClient, wallet: &mut Wallet) -> EngineResult<u64> {
    let nonce = wallet.sync_nonce(chain).await?;
    info!("👛 Wallet {} ready at nonce {}", wallet.address(), nonce);
    Ok(nonce)
}
