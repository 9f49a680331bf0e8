//! Chain access used by the validation and execution engines

use alloy::{
    primitives::{Address, Bytes, Log, TxHash, U256, keccak256},
    providers::Provider,
    rpc::types::TransactionRequest,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{CallError, RpcManager};
use crate::errors::{Broadcast, EngineError, EngineResult};

/// The parts of a receipt the engine cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptSummary {
    pub tx_hash: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub logs: Vec<Log>,
}

/// Node answers meaning this transaction, or another with its nonce, is
/// already in a mempool or mined.
const ALREADY_SEEN: [&str; 4] = [
    "already known",
    "known transaction",
    "nonce too low",
    "replacement transaction underpriced",
];

/// Turn a failed submission into [`EngineError::Submission`]. Only a plain
/// refusal with no dropped attempt before it counts as [`Broadcast::Refused`].
pub fn classify_submission(tx_hash: TxHash, error: EngineError, dropped_attempt: bool) -> EngineError {
    let message = error.to_string();
    let seen = {
        let lowered = message.to_lowercase();
        ALREADY_SEEN.iter().any(|marker| lowered.contains(marker))
    };
    let broadcast = match error {
        _ if dropped_attempt || seen => Broadcast::Unknown,
        EngineError::Submission { broadcast, .. } => broadcast,
        EngineError::Rpc { .. } | EngineError::NoProviderAvailable { .. } => Broadcast::Refused,
        _ => Broadcast::Unknown,
    };
    EngineError::Submission {
        tx_hash,
        broadcast,
        message,
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> EngineResult<u64>;
    async fn gas_price(&self) -> EngineResult<u128>;
    async fn balance(&self, address: Address) -> EngineResult<U256>;
    /// Pending transaction count, i.e. the next usable nonce.
    async fn transaction_count(&self, address: Address) -> EngineResult<u64>;
    async fn call(&self, tx: &TransactionRequest) -> EngineResult<Bytes>;
    async fn estimate_gas(&self, tx: &TransactionRequest) -> EngineResult<u64>;
    async fn send_raw_transaction(&self, raw: &[u8]) -> EngineResult<TxHash>;
    async fn transaction_receipt(&self, hash: TxHash) -> EngineResult<Option<ReceiptSummary>>;
}

/// [`ChainClient`] over the RPC manager. Every call goes to the active
/// endpoint and fails over on transport errors.
pub struct RpcChainClient {
    manager: Arc<RpcManager>,
    chain: String,
}

impl RpcChainClient {
    pub fn new(manager: Arc<RpcManager>, chain: impl Into<String>) -> Self {
        Self {
            manager,
            chain: chain.into(),
        }
    }

    pub fn manager(&self) -> &Arc<RpcManager> {
        &self.manager
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn block_number(&self) -> EngineResult<u64> {
        self.manager
            .call_with_failover(&self.chain, "eth_blockNumber", |conn| async move {
                conn.provider().get_block_number().await.map_err(CallError::from_transport)
            })
            .await
    }

    async fn gas_price(&self) -> EngineResult<u128> {
        self.manager
            .call_with_failover(&self.chain, "eth_gasPrice", |conn| async move {
                conn.provider().get_gas_price().await.map_err(CallError::from_transport)
            })
            .await
    }

    async fn balance(&self, address: Address) -> EngineResult<U256> {
        self.manager
            .call_with_failover(&self.chain, "eth_getBalance", |conn| async move {
                conn.provider().get_balance(address).await.map_err(CallError::from_transport)
            })
            .await
    }

    async fn transaction_count(&self, address: Address) -> EngineResult<u64> {
        self.manager
            .call_with_failover(&self.chain, "eth_getTransactionCount", |conn| async move {
                conn.provider()
                    .get_transaction_count(address)
                    .pending()
                    .await
                    .map_err(CallError::from_transport)
            })
            .await
    }

    async fn call(&self, tx: &TransactionRequest) -> EngineResult<Bytes> {
        self.manager
            .call_with_failover(&self.chain, "eth_call", |conn| {
                let tx = tx.clone();
                async move { conn.provider().call(&tx).await.map_err(CallError::from_transport) }
            })
            .await
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> EngineResult<u64> {
        self.manager
            .call_with_failover(&self.chain, "eth_estimateGas", |conn| {
                let tx = tx.clone();
                async move {
                    let gas = conn
                        .provider()
                        .estimate_gas(&tx)
                        .await
                        .map_err(CallError::from_transport)?;
                    u64::try_from(gas).map_err(|_| CallError::Rejected("gas estimate overflows u64".into()))
                }
            })
            .await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> EngineResult<TxHash> {
        let tx_hash = keccak256(raw);
        let dropped = AtomicBool::new(false);
        // Same signed bytes on every endpoint, so a resend carries the same nonce and hash.
        self.manager
            .call_with_failover(&self.chain, "eth_sendRawTransaction", |conn| {
                let dropped = &dropped;
                async move {
                    conn.provider()
                        .send_raw_transaction(raw)
                        .await
                        .map(|pending| *pending.tx_hash())
                        .map_err(|e| {
                            let e = CallError::from_transport(e);
                            if matches!(e, CallError::Endpoint(_)) {
                                dropped.store(true, Ordering::SeqCst);
                            }
                            e
                        })
                }
            })
            .await
            .map_err(|e| classify_submission(tx_hash, e, dropped.load(Ordering::SeqCst)))
    }

    async fn transaction_receipt(&self, hash: TxHash) -> EngineResult<Option<ReceiptSummary>> {
        self.manager
            .call_with_failover(&self.chain, "eth_getTransactionReceipt", |conn| async move {
                let receipt = conn
                    .provider()
                    .get_transaction_receipt(hash)
                    .await
                    .map_err(CallError::from_transport)?;
                Ok(receipt.map(|r| ReceiptSummary {
                    tx_hash: r.transaction_hash,
                    success: r.status(),
                    block_number: r.block_number,
                    gas_used: u64::try_from(r.gas_used).unwrap_or(u64::MAX),
                    effective_gas_price: r.effective_gas_price,
                    logs: r.inner.logs().iter().map(|log| log.inner.clone()).collect(),
                }))
            })
            .await
    }
}
