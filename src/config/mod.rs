//! Configuration management for the engine
//!
//! Loaded once at startup and passed explicitly to every service.

pub mod error;
pub mod markets;
pub mod settings;

pub use error::*;
pub use markets::*;
pub use settings::*;
