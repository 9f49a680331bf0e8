//! Custom error types for the engine

use alloy::primitives::{Address, TxHash};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No RPC provider available for chain {chain}")]
    NoProviderAvailable { chain: String },

    #[error("RPC call failed on {chain} via {endpoint}: {message}")]
    Rpc {
        chain: String,
        endpoint: String,
        message: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
        retry_count: u32,
    },

    #[error("Contract interaction failed: {contract} - {message}")]
    Contract {
        contract: Address,
        message: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Quote unavailable on {dex}: {reason}")]
    Quote { dex: String, reason: String },

    #[error("Failed to sign transaction for wallet {wallet}")]
    Signing {
        wallet: Address,
        #[source]
        source: anyhow::Error,
    },

    #[error("Submission of {tx_hash} failed ({broadcast}): {message}")]
    Submission {
        tx_hash: TxHash,
        broadcast: Broadcast,
        message: String,
    },

    #[error("Trade {trade_id} failed: {reason}")]
    Execution { trade_id: String, reason: String },

    #[error("Worker {worker} failed: {message}")]
    Process { worker: String, message: String },

    #[error("Circuit breaker active: {reason}")]
    CircuitBreakerOpen { reason: String },

    #[error("Timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("Data parsing error: {context}")]
    DataParsing {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;

/// How far a failed `eth_sendRawTransaction` may have got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    /// Every node that saw the bytes refused them. The nonce is still free.
    Refused,
    /// An endpoint dropped the call, or a node already holds the transaction
    /// or its nonce. It may still be mined.
    Unknown,
}

impl fmt::Display for Broadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Broadcast::Refused => f.write_str("refused"),
            Broadcast::Unknown => f.write_str("possibly broadcast"),
        }
    }
}

impl EngineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn parsing(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::DataParsing {
            context: context.into(),
            source: source.into(),
        }
    }

    /// True for errors that the RPC manager should treat as an endpoint failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Rpc { .. } | Self::Network { .. } | Self::Timeout { .. }
        )
    }
}
