//! Network providers and connection management

pub mod chain;
pub mod price_feed;
pub mod probe;
pub mod retry;
pub mod rpc_manager;

pub use chain::*;
pub use price_feed::*;
pub use probe::*;
pub use retry::*;
pub use rpc_manager::*;
