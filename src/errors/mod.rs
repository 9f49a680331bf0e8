//! Error handling and recovery mechanisms

pub mod engine_error;
pub mod recovery;
pub mod circuit_breaker;

pub use engine_error::*;
pub use recovery::*;
pub use circuit_breaker::*;
