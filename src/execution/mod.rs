//! Flash-loan trade execution

pub mod approval;
pub mod contract;
pub mod dispatcher;
pub mod engine;
pub mod wallet;

pub use approval::*;
pub use contract::*;
pub use dispatcher::*;
pub use engine::*;
pub use wallet::*;
