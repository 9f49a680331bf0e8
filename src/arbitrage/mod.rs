//! Arbitrage detection

pub mod calculator;
pub mod detector;
pub mod quoter;

pub use calculator::*;
pub use detector::*;
pub use quoter::*;
