//! Candidate and validated opportunity queues

pub mod codec;
pub mod memory;

pub use codec::*;
pub use memory::*;
