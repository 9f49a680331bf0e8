//! Where pool state comes from

use async_trait::async_trait;
use std::collections::HashMap;

use super::PoolState;
use crate::{
    config::{DexConfig, TokenConfig},
    errors::EngineResult,
};

#[async_trait]
pub trait PoolStateSource: Send + Sync {
    /// State of the pool `dex` uses for `token_in -> token_out`, oriented in
    /// that direction. `Ok(None)` when the DEX has no such pool.
    async fn pool_state(
        &self,
        dex: &DexConfig,
        token_in: &TokenConfig,
        token_out: &TokenConfig,
    ) -> EngineResult<Option<PoolState>>;
}

/// Fixed pool states, for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPoolSource {
    pools: HashMap<(String, String, String), PoolState>,
}

impl StaticPoolSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool for both directions; `state` is oriented `token_a -> token_b`.
    pub fn with_pair(mut self, dex: &str, token_a: &str, token_b: &str, state: PoolState) -> Self {
        self.pools
            .insert((dex.to_string(), token_b.to_string(), token_a.to_string()), state.reversed());
        self.pools
            .insert((dex.to_string(), token_a.to_string(), token_b.to_string()), state);
        self
    }
}

#[async_trait]
impl PoolStateSource for StaticPoolSource {
    async fn pool_state(
        &self,
        dex: &DexConfig,
        token_in: &TokenConfig,
        token_out: &TokenConfig,
    ) -> EngineResult<Option<PoolState>> {
        Ok(self
            .pools
            .get(&(dex.name.clone(), token_in.symbol.clone(), token_out.symbol.clone()))
            .cloned())
    }
}
