//! Pool state read from chain

use alloy::{
    primitives::{Address, Bytes, U256, keccak256},
    rpc::types::eth::TransactionRequest,
    sol_types::{SolType, SolValue},
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{PoolState, PoolStateSource};
use crate::{
    amm::StableSwapPool,
    config::{DexConfig, DexKind, PoolConfig, TokenConfig},
    errors::{EngineError, EngineResult},
    network::ChainClient,
    utils::from_base_units,
};

fn selector(signature: &str) -> Vec<u8> {
    keccak256(signature)[..4].to_vec()
}

fn calldata(signature: &str, args: &[u8]) -> Bytes {
    let mut data = selector(signature);
    data.extend_from_slice(args);
    data.into()
}

pub struct OnChainPoolSource {
    chain: Arc<dyn ChainClient>,
    tokens: Vec<TokenConfig>,
}

impl OnChainPoolSource {
    pub fn new(chain: Arc<dyn ChainClient>, tokens: Vec<TokenConfig>) -> Self {
        Self { chain, tokens }
    }

    async fn call(&self, to: Address, data: Bytes, what: &str) -> EngineResult<Bytes> {
        let tx = TransactionRequest::default().to(to).input(data.into());
        self.chain.call(&tx).await.map_err(|e| match e {
            EngineError::Rpc { message, source, .. } => EngineError::Contract {
                contract: to,
                message: format!("{}: {}", what, message),
                source,
            },
            other => other,
        })
    }

    fn decode<T: SolValue + From<<T::SolType as SolType>::RustType>>(
        to: Address,
        data: &[u8],
        what: &str,
    ) -> EngineResult<T> {
        T::abi_decode(data, true).map_err(|e| EngineError::Contract {
            contract: to,
            message: format!("failed to decode {}", what),
            source: e.into(),
        })
    }

    async fn constant_product(
        &self,
        dex: &DexConfig,
        token_in: &TokenConfig,
        token_out: &TokenConfig,
    ) -> EngineResult<Option<PoolState>> {
        let Some(factory) = dex.factory else {
            return Ok(None);
        };
        let raw = self
            .call(
                factory,
                calldata("getPair(address,address)", &(token_in.address, token_out.address).abi_encode_params()),
                "getPair",
            )
            .await?;
        let pair: Address = Self::decode(factory, &raw, "getPair")?;
        if pair == Address::ZERO {
            return Ok(None);
        }

        let raw = self.call(pair, calldata("getReserves()", &[]), "getReserves").await?;
        let (r0, r1, _) = <(U256, U256, U256)>::abi_decode_params(&raw, true).map_err(|e| EngineError::Contract {
            contract: pair,
            message: "failed to decode getReserves".to_string(),
            source: e.into(),
        })?;
        // token0 is the lower address
        let (reserve_in, reserve_out) = if token_in.address < token_out.address { (r0, r1) } else { (r1, r0) };
        debug!("{} pair {} reserves {} / {}", dex.name, pair, reserve_in, reserve_out);
        let (Some(reserve_in), Some(reserve_out)) = (
            from_base_units(reserve_in, token_in.decimals),
            from_base_units(reserve_out, token_out.decimals),
        ) else {
            warn!("⚠️ {} pair {} reports reserves out of range", dex.name, pair);
            return Ok(None);
        };
        Ok(Some(PoolState::ConstantProduct {
            reserve_in,
            reserve_out,
            fee_bps: dex.fee_bps,
        }))
    }

    async fn weighted(
        &self,
        dex: &DexConfig,
        pool: &PoolConfig,
        token_in: &TokenConfig,
        token_out: &TokenConfig,
    ) -> EngineResult<Option<PoolState>> {
        let Some(pool_id) = pool.pool_id else {
            return Ok(None);
        };
        let vault = dex.router;
        let raw = self
            .call(vault, calldata("getPoolTokens(bytes32)", &pool_id.abi_encode()), "getPoolTokens")
            .await?;
        let (addresses, balances, _) =
            <(Vec<Address>, Vec<U256>, U256)>::abi_decode_params(&raw, true).map_err(|e| EngineError::Contract {
                contract: vault,
                message: "failed to decode getPoolTokens".to_string(),
                source: e.into(),
            })?;
        let (Some(i), Some(j)) = (
            addresses.iter().position(|a| *a == token_in.address),
            addresses.iter().position(|a| *a == token_out.address),
        ) else {
            return Ok(None);
        };

        let raw = self
            .call(pool.address, calldata("getNormalizedWeights()", &[]), "getNormalizedWeights")
            .await?;
        let weights: Vec<U256> = Self::decode(pool.address, &raw, "getNormalizedWeights")?;
        let raw = self
            .call(pool.address, calldata("getSwapFeePercentage()", &[]), "getSwapFeePercentage")
            .await?;
        let fee: U256 = Self::decode(pool.address, &raw, "getSwapFeePercentage")?;

        let (Some(weight_in), Some(weight_out), Some(balance_in), Some(balance_out)) =
            (weights.get(i), weights.get(j), balances.get(i), balances.get(j))
        else {
            return Ok(None);
        };
        let (Some(balance_in), Some(balance_out), Some(weight_in), Some(weight_out), Some(fee)) = (
            from_base_units(*balance_in, token_in.decimals),
            from_base_units(*balance_out, token_out.decimals),
            from_base_units(*weight_in, 18),
            from_base_units(*weight_out, 18),
            from_base_units(fee, 18),
        ) else {
            warn!("⚠️ {} pool {} reports balances out of range", dex.name, pool.address);
            return Ok(None);
        };
        Ok(Some(PoolState::Weighted {
            balance_in,
            balance_out,
            weight_in,
            weight_out,
            fee,
        }))
    }

    async fn stable_swap(
        &self,
        pool: &PoolConfig,
        token_in: &TokenConfig,
        token_out: &TokenConfig,
    ) -> EngineResult<Option<PoolState>> {
        let (Some(i), Some(j)) = (
            pool.tokens.iter().position(|s| *s == token_in.symbol),
            pool.tokens.iter().position(|s| *s == token_out.symbol),
        ) else {
            return Ok(None);
        };

        let mut balances = Vec::with_capacity(pool.tokens.len());
        for (index, symbol) in pool.tokens.iter().enumerate() {
            let decimals = self
                .tokens
                .iter()
                .find(|t| t.symbol == *symbol)
                .map(|t| t.decimals)
                .unwrap_or(18);
            let raw = self
                .call(
                    pool.address,
                    calldata("balances(uint256)", &U256::from(index).abi_encode()),
                    "balances",
                )
                .await?;
            let balance: U256 = Self::decode(pool.address, &raw, "balances")?;
            let Some(normalised) = normalise(balance, decimals) else {
                warn!("⚠️ Stable pool {} balance {} out of range", pool.address, index);
                return Ok(None);
            };
            balances.push(normalised);
        }

        let raw = self.call(pool.address, calldata("A()", &[]), "A").await?;
        let amp: U256 = Self::decode(pool.address, &raw, "A")?;
        let raw = self.call(pool.address, calldata("fee()", &[]), "fee").await?;
        let fee: U256 = Self::decode(pool.address, &raw, "fee")?;
        // Older pools keep supply on a separate LP token; no supply just means no virtual price.
        let total_supply = match self.call(pool.address, calldata("totalSupply()", &[]), "totalSupply").await {
            Ok(raw) => Self::decode(pool.address, &raw, "totalSupply").unwrap_or(U256::ZERO),
            Err(_) => U256::ZERO,
        };

        let pool = StableSwapPool {
            balances,
            amp,
            fee,
            total_supply,
        };
        if let Some(vp) = pool.virtual_price() {
            debug!("stable pool virtual price {}", vp.round_dp(6));
        }
        Ok(Some(PoolState::StableSwap { pool, i, j }))
    }
}

/// Scale a token balance to 18 decimals. `None` if that overflows.
fn normalise(balance: U256, decimals: u8) -> Option<U256> {
    match decimals.cmp(&18) {
        std::cmp::Ordering::Less => balance.checked_mul(U256::from(10u64).pow(U256::from(18 - decimals))),
        std::cmp::Ordering::Greater => Some(balance / U256::from(10u64).pow(U256::from(decimals - 18))),
        std::cmp::Ordering::Equal => Some(balance),
    }
}

fn pool_for<'a>(dex: &'a DexConfig, token_in: &TokenConfig, token_out: &TokenConfig) -> Option<&'a PoolConfig> {
    dex.pools
        .iter()
        .find(|p| p.tokens.contains(&token_in.symbol) && p.tokens.contains(&token_out.symbol))
}

#[async_trait]
impl PoolStateSource for OnChainPoolSource {
    async fn pool_state(
        &self,
        dex: &DexConfig,
        token_in: &TokenConfig,
        token_out: &TokenConfig,
    ) -> EngineResult<Option<PoolState>> {
        match dex.kind {
            DexKind::ConstantProduct => self.constant_product(dex, token_in, token_out).await,
            DexKind::Weighted => match pool_for(dex, token_in, token_out) {
                Some(pool) => self.weighted(dex, pool, token_in, token_out).await,
                None => Ok(None),
            },
            DexKind::StableSwap => match pool_for(dex, token_in, token_out) {
                Some(pool) => self.stable_swap(pool, token_in, token_out).await,
                None => Ok(None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::chain::mock::MockChain;
    use rust_decimal_macros::dec;

    fn token(symbol: &str, byte: u8, decimals: u8) -> TokenConfig {
        TokenConfig {
            symbol: symbol.into(),
            address: Address::repeat_byte(byte),
            decimals,
            usd_price: Decimal::ONE,
            feed_symbol: None,
        }
    }

    #[tokio::test]
    async fn reads_v2_pair_in_swap_direction() {
        let factory = Address::repeat_byte(0xfa);
        let pair = Address::repeat_byte(0xaa);
        let weth = token("WETH", 0x01, 18);
        let usdc = token("USDC", 0x02, 6);

        let chain = Arc::new(MockChain::new());
        chain.respond(
            factory,
            calldata("getPair(address,address)", &(usdc.address, weth.address).abi_encode_params()),
            pair.abi_encode(),
        );
        let r0 = U256::from(10u64) * U256::from(10u64).pow(U256::from(18u64)); // 10 WETH
        let r1 = U256::from(30_000_000_000u64); // 30k USDC
        chain.respond(pair, calldata("getReserves()", &[]), (r0, r1, U256::from(1u64)).abi_encode_params());

        let dex = DexConfig {
            name: "uniswap".into(),
            kind: DexKind::ConstantProduct,
            router: Address::repeat_byte(0xee),
            factory: Some(factory),
            fee_bps: 30,
            pools: vec![],
        };
        let source = OnChainPoolSource::new(chain, vec![weth.clone(), usdc.clone()]);
        let state = source.pool_state(&dex, &usdc, &weth).await.unwrap().unwrap();

        assert_eq!(
            state,
            PoolState::ConstantProduct {
                reserve_in: dec!(30_000),
                reserve_out: dec!(10),
                fee_bps: 30
            }
        );
    }

    #[tokio::test]
    async fn missing_pair_is_no_pool() {
        let factory = Address::repeat_byte(0xfa);
        let a = token("A", 0x01, 18);
        let b = token("B", 0x02, 18);
        let chain = Arc::new(MockChain::new());
        chain.respond(
            factory,
            calldata("getPair(address,address)", &(a.address, b.address).abi_encode_params()),
            Address::ZERO.abi_encode(),
        );
        let dex = DexConfig {
            name: "uniswap".into(),
            kind: DexKind::ConstantProduct,
            router: Address::ZERO,
            factory: Some(factory),
            fee_bps: 30,
            pools: vec![],
        };
        let source = OnChainPoolSource::new(chain, vec![a.clone(), b.clone()]);
        assert_eq!(source.pool_state(&dex, &a, &b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn absurd_reserves_are_no_pool() {
        let factory = Address::repeat_byte(0xfa);
        let pair = Address::repeat_byte(0xab);
        let a = token("A", 0x01, 18);
        let b = token("B", 0x02, 18);
        let chain = Arc::new(MockChain::new());
        chain.respond(
            factory,
            calldata("getPair(address,address)", &(a.address, b.address).abi_encode_params()),
            pair.abi_encode(),
        );
        chain.respond(
            pair,
            calldata("getReserves()", &[]),
            (U256::MAX, U256::from(10u64).pow(U256::from(48u64)), U256::from(1u64)).abi_encode_params(),
        );
        let dex = DexConfig {
            name: "uniswap".into(),
            kind: DexKind::ConstantProduct,
            router: Address::ZERO,
            factory: Some(factory),
            fee_bps: 30,
            pools: vec![],
        };
        let source = OnChainPoolSource::new(chain, vec![a.clone(), b.clone()]);
        assert_eq!(source.pool_state(&dex, &a, &b).await.unwrap(), None);
    }

    #[test]
    fn normalising_never_overflows() {
        assert_eq!(normalise(U256::MAX, 6), None);
        assert_eq!(normalise(U256::from(1_000_000u64), 6), Some(U256::from(10u64).pow(U256::from(18u64))));
        assert_eq!(normalise(U256::MAX, 24), Some(U256::MAX / U256::from(1_000_000u64)));
    }

    #[tokio::test]
    async fn normalises_stable_balances() {
        let pool_addr = Address::repeat_byte(0xcc);
        let usdc = token("USDC", 0x02, 6);
        let dai = token("DAI", 0x03, 18);
        let chain = Arc::new(MockChain::new());
        chain.respond(
            pool_addr,
            calldata("balances(uint256)", &U256::from(0u64).abi_encode()),
            U256::from(1_000_000_000_000u64).abi_encode(), // 1M USDC
        );
        chain.respond(
            pool_addr,
            calldata("balances(uint256)", &U256::from(1u64).abi_encode()),
            (U256::from(1_000_000u64) * U256::from(10u64).pow(U256::from(18u64))).abi_encode(),
        );
        chain.respond(pool_addr, calldata("A()", &[]), U256::from(200u64).abi_encode());
        chain.respond(pool_addr, calldata("fee()", &[]), U256::from(4_000_000u64).abi_encode());

        let dex = DexConfig {
            name: "curve".into(),
            kind: DexKind::StableSwap,
            router: Address::ZERO,
            factory: None,
            fee_bps: 30,
            pools: vec![PoolConfig {
                address: pool_addr,
                pool_id: None,
                tokens: vec!["USDC".into(), "DAI".into()],
            }],
        };
        let source = OnChainPoolSource::new(chain, vec![usdc.clone(), dai.clone()]);
        let state = source.pool_state(&dex, &usdc, &dai).await.unwrap().unwrap();

        let PoolState::StableSwap { pool, i, j } = &state else {
            panic!("expected stable pool, got {:?}", state);
        };
        assert_eq!((*i, *j), (0, 1));
        assert_eq!(pool.balances[0], pool.balances[1]);
        assert_eq!(pool.total_supply, U256::ZERO);
        let out = state.quote(dec!(1_000)).unwrap().amount_out;
        assert!(out > dec!(999) && out < dec!(1_000));
    }
}
