//! Opportunity validation and system health gates

pub mod engine;
pub mod gates;
pub mod health;

pub use engine::*;
pub use gates::*;
pub use health::*;
