//! Quotes one swap leg on one DEX

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::{
    config::{Config, DexConfig, DexKind, TokenConfig},
    errors::{EngineError, EngineResult},
    pools::PoolStateSource,
    types::Quote,
};

pub const CONSTANT_PRODUCT_SWAP_GAS: u64 = 120_000;
pub const WEIGHTED_SWAP_GAS: u64 = 150_000;
pub const STABLE_SWAP_GAS: u64 = 180_000;

pub fn swap_gas(kind: DexKind) -> u64 {
    match kind {
        DexKind::ConstantProduct => CONSTANT_PRODUCT_SWAP_GAS,
        DexKind::Weighted => WEIGHTED_SWAP_GAS,
        DexKind::StableSwap => STABLE_SWAP_GAS,
    }
}

pub struct PriceQuoter {
    source: Arc<dyn PoolStateSource>,
    dexes: Vec<DexConfig>,
    tokens: Vec<TokenConfig>,
}

impl PriceQuoter {
    pub fn new(source: Arc<dyn PoolStateSource>, config: &Config) -> Self {
        Self {
            source,
            dexes: config.dexes.clone(),
            tokens: config.tokens.clone(),
        }
    }

    /// `Ok(None)` when the DEX has no pool for the pair or the pool cannot
    /// price the amount. Unknown names are a quote error.
    pub async fn quote(
        &self,
        dex: &str,
        token_in: &str,
        token_out: &str,
        amount_in: Decimal,
    ) -> EngineResult<Option<Quote>> {
        let dex_config = self.dexes.iter().find(|d| d.name == dex).ok_or_else(|| EngineError::Quote {
            dex: dex.to_string(),
            reason: "unknown dex".to_string(),
        })?;
        let token_in_config = self.token(dex, token_in)?;
        let token_out_config = self.token(dex, token_out)?;

        let Some(state) = self
            .source
            .pool_state(dex_config, token_in_config, token_out_config)
            .await?
        else {
            return Ok(None);
        };
        let Some(pool_quote) = state.quote(amount_in) else {
            return Ok(None);
        };

        Ok(Some(Quote {
            dex: dex.to_string(),
            token_in: token_in.to_string(),
            token_out: token_out.to_string(),
            amount_in,
            amount_out: pool_quote.amount_out,
            price_impact_pct: pool_quote.price_impact_pct,
            gas_estimate: swap_gas(dex_config.kind),
            off_peg: pool_quote.off_peg,
        }))
    }

    fn token(&self, dex: &str, symbol: &str) -> EngineResult<&TokenConfig> {
        self.tokens.iter().find(|t| t.symbol == symbol).ok_or_else(|| EngineError::Quote {
            dex: dex.to_string(),
            reason: format!("unknown token {}", symbol),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::tests::sample_config;
    use crate::pools::{PoolState, StaticPoolSource};
    use rust_decimal_macros::dec;

    fn quoter() -> PriceQuoter {
        let source = StaticPoolSource::new().with_pair(
            "uniswap",
            "WETH",
            "USDC",
            PoolState::ConstantProduct {
                reserve_in: dec!(1_000),
                reserve_out: dec!(3_000_000),
                fee_bps: 30,
            },
        );
        PriceQuoter::new(Arc::new(source), &sample_config())
    }

    #[tokio::test]
    async fn quotes_both_directions_of_a_pair() {
        let q = quoter();
        let sell = q.quote("uniswap", "WETH", "USDC", dec!(1)).await.unwrap().unwrap();
        assert!(sell.amount_out > dec!(2_980) && sell.amount_out < dec!(2_991));
        assert_eq!(sell.gas_estimate, CONSTANT_PRODUCT_SWAP_GAS);

        let buy = q.quote("uniswap", "USDC", "WETH", dec!(3_000)).await.unwrap().unwrap();
        assert!(buy.amount_out < dec!(1));
    }

    #[tokio::test]
    async fn missing_pool_is_no_quote_and_unknown_dex_is_an_error() {
        let q = quoter();
        assert!(q.quote("uniswap", "USDC", "DAI", dec!(1)).await.unwrap().is_none());
        assert!(matches!(
            q.quote("sushiswap", "WETH", "USDC", dec!(1)).await,
            Err(EngineError::Quote { .. })
        ));
    }
}
