//! Core data types and structures

pub mod endpoint;
pub mod quote;
pub mod arbitrage;
pub mod execution;
pub mod validation;
pub mod health;
pub mod worker;

pub use endpoint::*;
pub use quote::*;
pub use arbitrage::*;
pub use execution::*;
pub use validation::*;
pub use health::*;
pub use worker::*;
