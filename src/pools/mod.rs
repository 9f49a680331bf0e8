//! Pool state for the price quoter

pub mod onchain;
pub mod source;
pub mod state;

pub use onchain::*;
pub use source::*;
pub use state::*;
