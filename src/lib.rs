//! Flash Arbitrage Engine - triangular flash-loan arbitrage on EVM chains
//!
//! Quotes three-leg cycles across constant-product, weighted and stable-swap
//! DEXs, validates them against profit and risk gates, and executes the
//! survivors through a flash-loan contract. RPC endpoints fail over on
//! error, and execution can run in-process or across supervised worker
//! processes behind a manual-reset circuit breaker.

pub mod config;
pub mod types;
pub mod errors;
pub mod network;
pub mod amm;
pub mod pools;
pub mod arbitrage;
pub mod queue;
pub mod validation;
pub mod execution;
pub mod orchestrator;
pub mod storage;
pub mod utils;

// Re-export commonly used items
pub use config::Config;
pub use errors::{EngineError, EngineResult};
pub use types::*;

// Type alias for our concrete provider
pub type ConcreteProvider = alloy::providers::RootProvider<alloy::transports::BoxTransport>;
