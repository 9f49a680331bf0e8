//! Trade execution types

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ArbitrageOpportunity;
use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TradeStatus::Completed | TradeStatus::Failed | TradeStatus::Cancelled)
    }

    /// `pending → executing → {completed | failed | cancelled}`; a pending
    /// trade may also be cancelled before it starts executing.
    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        matches!(
            (self, next),
            (TradeStatus::Pending, TradeStatus::Executing)
                | (TradeStatus::Pending, TradeStatus::Cancelled)
                | (TradeStatus::Pending, TradeStatus::Failed)
                | (TradeStatus::Executing, TradeStatus::Completed)
                | (TradeStatus::Executing, TradeStatus::Failed)
                | (TradeStatus::Executing, TradeStatus::Cancelled)
        )
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Executing => "executing",
            TradeStatus::Completed => "completed",
            TradeStatus::Failed => "failed",
            TradeStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub opportunity_id: String,
    pub route: String,
    pub wallet_address: Option<Address>,
    pub nonce: Option<u64>,
    pub amount_in: Decimal,
    pub amount_out: Option<Decimal>,
    pub expected_profit_usd: Decimal,
    pub actual_profit_usd: Option<Decimal>,
    pub gas_used: Option<u64>,
    pub gas_price_gwei: Option<Decimal>,
    pub status: TradeStatus,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: u64,
    pub error: Option<String>,
}

impl Trade {
    pub fn new(opportunity: &ArbitrageOpportunity) -> Self {
        Self {
            trade_id: uuid::Uuid::new_v4().to_string(),
            opportunity_id: opportunity.id.clone(),
            route: opportunity.route_label(),
            wallet_address: None,
            nonce: None,
            amount_in: opportunity.amount_in,
            amount_out: None,
            expected_profit_usd: opportunity.net_profit_usd,
            actual_profit_usd: None,
            gas_used: None,
            gas_price_gwei: None,
            status: TradeStatus::Pending,
            tx_hash: None,
            block_number: None,
            created_at: Utc::now(),
            executed_at: None,
            execution_time_ms: 0,
            error: None,
        }
    }

    pub fn transition(&mut self, next: TradeStatus) -> EngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::Execution {
                trade_id: self.trade_id.clone(),
                reason: format!("illegal transition {} → {}", self.status, next),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> EngineResult<()> {
        self.transition(TradeStatus::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> EngineResult<()> {
        self.transition(TradeStatus::Cancelled)?;
        self.error = Some(reason.into());
        Ok(())
    }

    pub fn is_success(&self) -> bool {
        self.status == TradeStatus::Completed
    }
}

/// A finished trade as published on the result stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    /// Wallet slot or worker that produced the trade.
    pub executor: String,
    pub trade: Trade,
}
