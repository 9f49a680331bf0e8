//! Display and printing utilities

use tracing::{error, info, warn};

use crate::{
    errors::CircuitBreakerState,
    orchestrator::PerformanceSnapshot,
    types::{ArbitrageOpportunity, Trade, TradeStatus, ValidationResult},
};

pub fn print_session_stats(snapshot: &PerformanceSnapshot, breaker: &CircuitBreakerState) {
    let runtime = snapshot.uptime_secs / 60;
    let fleet = &snapshot.fleet;

    info!("\n📊 Session Statistics ({} minutes)", runtime);
    info!("   📈 PIPELINE:");
    info!("     Candidates detected: {}", snapshot.opportunities_detected);
    info!("     Validated: {}", snapshot.opportunities_validated);
    info!("     Rejected: {}", snapshot.opportunities_rejected);

    info!("   🚀 TRADE EXECUTION:");
    info!("     Total trades: {}", fleet.trades);
    info!("     Completed: {}", fleet.completed);
    info!("     Failed: {}  Cancelled: {}", fleet.failed, fleet.cancelled);
    info!("     Success rate: {:.1}%", fleet.success_rate_pct());
    info!("     Realised profit: ${:.2}", fleet.profit_usd);

    if snapshot.per_executor.len() > 1 {
        info!("   👷 EXECUTORS:");
        for (name, stats) in &snapshot.per_executor {
            info!(
                "     {}: {} trades, {} ok, ${:.2}",
                name, stats.trades, stats.completed, stats.profit_usd
            );
        }
    }

    info!("   ⚙️  SYSTEM:");
    match &breaker.reason {
        Some(reason) if breaker.tripped => info!("     Circuit breaker: OPEN ({})", reason),
        _ => info!("     Circuit breaker: CLOSED"),
    }
    info!("");
}

pub fn print_arbitrage_opportunity(opportunity: &ArbitrageOpportunity) {
    warn!("\n🎯 ARBITRAGE OPPORTUNITY #{}", opportunity.id);
    warn!("📍 Route: {}", opportunity.route_label());
    warn!("💰 Profit Analysis:");
    warn!("   Borrowed: {} {} (${:.2})", opportunity.amount_in, opportunity.token_a, opportunity.amount_in_usd);
    warn!("   Spread: {:.2} bps", opportunity.spread_bps);
    warn!("   Gross: ${:.2}  Flash fee: ${:.2}  Gas: ${:.2}",
        opportunity.gross_profit_usd,
        opportunity.flash_loan_fee_usd,
        opportunity.gas_cost_usd
    );
    warn!("   Net Profit: ${:.2}", opportunity.net_profit_usd);
    warn!("   ROI after gas: {:.3}%", opportunity.roi_after_gas_pct);
    warn!("📊 Confidence: {:.2}  MEV risk: {}", opportunity.confidence, opportunity.mev_risk);
}

pub fn print_validation(result: &ValidationResult) {
    if result.valid {
        info!("✅ Opportunity {} passed all gates", result.opportunity_id);
    } else {
        info!("🚫 Opportunity {} rejected: {}", result.opportunity_id, result.errors.join("; "));
    }
    for warning in &result.warnings {
        warn!("⚠️ {}: {}", result.opportunity_id, warning);
    }
}

pub fn print_trade(trade: &Trade) {
    match trade.status {
        TradeStatus::Completed => {
            warn!("\n✅ TRADE #{}", trade.trade_id);
            warn!("📍 Route: {}", trade.route);
            if let Some(tx_hash) = &trade.tx_hash {
                warn!("   Tx Hash: {}", tx_hash);
            }
            if let Some(block) = trade.block_number {
                warn!("   Block: {}", block);
            }
            warn!("   Expected Profit: ${:.2}", trade.expected_profit_usd);
            if let Some(actual_profit) = trade.actual_profit_usd {
                warn!("   Actual Profit: ${:.2}", actual_profit);
            }
            if let Some(gas_used) = trade.gas_used {
                warn!("   Gas Used: {}", gas_used);
            }
            warn!("   Execution Time: {}ms", trade.execution_time_ms);
        }
        TradeStatus::Failed => {
            error!("\n❌ TRADE FAILED #{}", trade.trade_id);
            error!("   Error: {}", trade.error.as_deref().unwrap_or("Unknown"));
        }
        TradeStatus::Cancelled => {
            warn!("🛑 Trade {} cancelled: {}", trade.trade_id, trade.error.as_deref().unwrap_or("no reason"));
        }
        TradeStatus::Pending | TradeStatus::Executing => {
            info!("⏳ Trade {} is {}", trade.trade_id, trade.status);
        }
    }
}
