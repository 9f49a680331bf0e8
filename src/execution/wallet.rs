//! Signing wallet with a locally tracked nonce

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::Address;
use alloy::rpc::types::eth::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::{
    config::{ConfigError, WalletKey},
    errors::{EngineError, EngineResult},
    network::ChainClient,
};

/// One signing key and its next nonce. Owned by exactly one execution slot,
/// so nonces are handed out serially.
pub struct Wallet {
    signer: PrivateKeySigner,
    wallet: EthereumWallet,
    next_nonce: Option<u64>,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .field("next_nonce", &self.next_nonce)
            .finish()
    }
}

impl Wallet {
    pub fn from_signer(signer: PrivateKeySigner) -> Self {
        Self {
            wallet: EthereumWallet::from(signer.clone()),
            signer,
            next_nonce: None,
        }
    }

    pub fn from_key(key: &WalletKey) -> Result<Self, ConfigError> {
        let signer = PrivateKeySigner::from_str(key.expose())
            .map_err(|e| ConfigError::invalid("WALLET_PRIVATE_KEYS", e.to_string()))?;
        Ok(Self::from_signer(signer))
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn next_nonce(&self) -> Option<u64> {
        self.next_nonce
    }

    /// Align with the node's pending count. Never moves the nonce backwards.
    pub async fn sync_nonce(&mut self, chain: &dyn ChainClient) -> EngineResult<u64> {
        let on_chain = chain.transaction_count(self.address()).await?;
        let next = self.next_nonce.map_or(on_chain, |local| local.max(on_chain));
        if self.next_nonce != Some(next) {
            debug!("🔢 Wallet {} nonce synced to {}", self.address(), next);
        }
        self.next_nonce = Some(next);
        Ok(next)
    }

    /// Hand out the next nonce. Fails if the wallet was never synced.
    pub fn reserve_nonce(&mut self) -> EngineResult<u64> {
        let nonce = self.next_nonce.ok_or_else(|| EngineError::Signing {
            wallet: self.address(),
            source: anyhow::anyhow!("nonce not synced"),
        })?;
        self.next_nonce = Some(nonce + 1);
        Ok(nonce)
    }

    /// Give back a nonce whose transaction never reached the network. Only
    /// the most recently reserved nonce can be returned.
    pub fn release_nonce(&mut self, nonce: u64) -> bool {
        if self.next_nonce == Some(nonce + 1) {
            self.next_nonce = Some(nonce);
            true
        } else {
            false
        }
    }

    /// Sign `request` and return the EIP-2718 encoded transaction.
    pub async fn sign(&self, mut request: TransactionRequest) -> EngineResult<Vec<u8>> {
        request.from = Some(self.address());
        let envelope = request.build(&self.wallet).await.map_err(|e| EngineError::Signing {
            wallet: self.address(),
            source: anyhow::anyhow!("{}", e),
        })?;
        Ok(envelope.encoded_2718())
    }

    /// Convenience for a complete EIP-1559 call.
    #[allow(clippy::too_many_arguments)]
    pub fn eip1559_request(
        to: Address,
        input: alloy::primitives::Bytes,
        chain_id: u64,
        nonce: u64,
        gas_limit: u64,
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    ) -> TransactionRequest {
        TransactionRequest::default()
            .with_to(to)
            .with_input(input)
            .with_chain_id(chain_id)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_max_fee_per_gas(max_fee_per_gas)
            .with_max_priority_fee_per_gas(max_priority_fee_per_gas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::chain::mock::MockChain;
    use proptest::prelude::*;

    fn wallet() -> Wallet {
        Wallet::from_signer(PrivateKeySigner::random())
    }

    #[tokio::test]
    async fn sync_takes_the_higher_nonce() {
        let chain = MockChain::new();
        let mut wallet = wallet();
        chain.nonces.lock().unwrap().insert(wallet.address(), 7);
        assert_eq!(wallet.sync_nonce(&chain).await.unwrap(), 7);
        assert_eq!(wallet.reserve_nonce().unwrap(), 7);
        assert_eq!(wallet.reserve_nonce().unwrap(), 8);

        // a lagging node does not move us backwards
        assert_eq!(wallet.sync_nonce(&chain).await.unwrap(), 9);
    }

    #[test]
    fn unsynced_wallet_cannot_reserve() {
        assert!(matches!(wallet().reserve_nonce(), Err(EngineError::Signing { .. })));
    }

    #[test]
    fn only_the_latest_nonce_can_be_released() {
        let mut wallet = wallet();
        wallet.next_nonce = Some(0);
        let first = wallet.reserve_nonce().unwrap();
        let second = wallet.reserve_nonce().unwrap();
        assert!(!wallet.release_nonce(first));
        assert!(wallet.release_nonce(second));
        assert_eq!(wallet.reserve_nonce().unwrap(), second);
    }

    #[test]
    fn bad_key_names_the_variable() {
        let err = Wallet::from_key(&WalletKey::new("0xnothex")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "WALLET_PRIVATE_KEYS"));
    }

    #[tokio::test]
    async fn signs_an_eip1559_call() {
        let wallet = wallet();
        let request = Wallet::eip1559_request(
            Address::repeat_byte(0x11),
            vec![0xde, 0xad].into(),
            8453,
            0,
            300_000,
            2_000_000_000,
            10_000_000,
        );
        let raw = wallet.sign(request).await.unwrap();
        // EIP-1559 type byte
        assert_eq!(raw[0], 0x02);
    }

    proptest! {
        /// Broadcast nonces are strictly increasing, whatever mix of
        /// broadcasts and pre-broadcast rejections happens.
        #[test]
        fn broadcast_nonces_strictly_increase(start in 0u64..1_000_000, outcomes in proptest::collection::vec(any::<bool>(), 1..64)) {
            let mut wallet = wallet();
            wallet.next_nonce = Some(start);
            let mut broadcast = Vec::new();
            for rejected in outcomes {
                let nonce = wallet.reserve_nonce().unwrap();
                if rejected {
                    prop_assert!(wallet.release_nonce(nonce));
                } else {
                    broadcast.push(nonce);
                }
            }
            prop_assert!(broadcast.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
