//! Flash-loan contract ABI and calldata

use alloy::primitives::{Address, Bytes, Log, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use rust_decimal::Decimal;

use crate::{
    config::{Config, DexKind},
    errors::{EngineError, EngineResult},
    types::ArbitrageOpportunity,
    utils::to_base_units,
};

sol! {
    /// One swap inside the flash-loan callback.
    struct SwapHop {
        address router;
        address tokenIn;
        address tokenOut;
        uint256 amountIn;
        uint256 minAmountOut;
        uint8 dexKind;
    }

    interface IFlashArbitrage {
        function executeArbitrage(address asset, uint256 amount, bytes calldata params) external;
        function getHealthCounters() external view returns (uint256 totalExecutions, uint256 successfulExecutions, uint256 failedExecutions);

        /// Emitted once the loan is repaid. Amounts are in `asset` base units.
        event ArbitrageExecuted(address indexed asset, uint256 amountBorrowed, uint256 amountReturned, uint256 premium);
    }
}

pub fn dex_kind_code(kind: DexKind) -> u8 {
    match kind {
        DexKind::ConstantProduct => 0,
        DexKind::Weighted => 1,
        DexKind::StableSwap => 2,
    }
}

fn invalid_amount(opportunity: &ArbitrageOpportunity, what: &str) -> EngineError {
    EngineError::Execution {
        trade_id: opportunity.id.clone(),
        reason: format!("cannot encode {}", what),
    }
}

/// Hop list for `executeArbitrage`. Each hop's minimum output is the quoted
/// output less the per-leg slippage allowance.
pub fn build_hops(
    opportunity: &ArbitrageOpportunity,
    config: &Config,
    slippage_pct: Decimal,
) -> EngineResult<Vec<SwapHop>> {
    let keep = Decimal::ONE - slippage_pct / Decimal::ONE_HUNDRED;
    opportunity
        .legs
        .iter()
        .map(|leg| {
            let dex = config.dex(&leg.dex).ok_or_else(|| invalid_amount(opportunity, "unknown dex"))?;
            let token_in = config
                .token(&leg.token_in)
                .ok_or_else(|| invalid_amount(opportunity, "unknown token"))?;
            let token_out = config
                .token(&leg.token_out)
                .ok_or_else(|| invalid_amount(opportunity, "unknown token"))?;
            Ok(SwapHop {
                router: dex.router,
                tokenIn: token_in.address,
                tokenOut: token_out.address,
                amountIn: to_base_units(leg.amount_in, token_in.decimals)
                    .ok_or_else(|| invalid_amount(opportunity, "leg input"))?,
                minAmountOut: to_base_units(leg.amount_out * keep, token_out.decimals)
                    .ok_or_else(|| invalid_amount(opportunity, "leg minimum output"))?,
                dexKind: dex_kind_code(dex.kind),
            })
        })
        .collect()
}

/// Calldata for `executeArbitrage(asset, amount, abi.encode(hops))`.
pub fn encode_execute_arbitrage(asset: Address, amount: U256, hops: &[SwapHop]) -> Bytes {
    let params = hops.to_vec().abi_encode();
    IFlashArbitrage::executeArbitrageCall {
        asset,
        amount,
        params: params.into(),
    }
    .abi_encode()
    .into()
}

pub fn build_calldata(
    opportunity: &ArbitrageOpportunity,
    config: &Config,
) -> EngineResult<Bytes> {
    let asset = config
        .token(&opportunity.token_a)
        .ok_or_else(|| invalid_amount(opportunity, "unknown asset"))?;
    let amount = to_base_units(opportunity.amount_in, asset.decimals)
        .ok_or_else(|| invalid_amount(opportunity, "loan amount"))?;
    let hops = build_hops(opportunity, config, config.thresholds.max_slippage_per_leg_pct)?;
    Ok(encode_execute_arbitrage(asset.address, amount, &hops))
}

pub fn health_counters_calldata() -> Bytes {
    IFlashArbitrage::getHealthCountersCall {}.abi_encode().into()
}

/// `(total, successful, failed)` executions reported by the contract.
pub fn decode_health_counters(data: &[u8]) -> anyhow::Result<(U256, U256, U256)> {
    let counters = IFlashArbitrage::getHealthCountersCall::abi_decode_returns(data, true)?;
    Ok((
        counters.totalExecutions,
        counters.successfulExecutions,
        counters.failedExecutions,
    ))
}

/// What the contract reports it settled for one flash loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub asset: Address,
    pub amount_borrowed: U256,
    pub amount_returned: U256,
    pub premium: U256,
}

/// The first `ArbitrageExecuted` event `contract` emitted in `logs`.
pub fn settlement_from_logs(contract: Address, logs: &[Log]) -> Option<Settlement> {
    logs.iter()
        .filter(|log| log.address == contract)
        .find_map(|log| IFlashArbitrage::ArbitrageExecuted::decode_log_data(&log.data, true).ok())
        .map(|event| Settlement {
            asset: event.asset,
            amount_borrowed: event.amountBorrowed,
            amount_returned: event.amountReturned,
            premium: event.premium,
        })
}

/// Receipt log for a settlement, as the contract would emit it.
#[cfg(test)]
pub(crate) fn settlement_log(contract: Address, settlement: &Settlement) -> Log {
    let event = IFlashArbitrage::ArbitrageExecuted {
        asset: settlement.asset,
        amountBorrowed: settlement.amount_borrowed,
        amountReturned: settlement.amount_returned,
        premium: settlement.premium,
    };
    Log {
        address: contract,
        data: event.encode_log_data(),
    }
}
