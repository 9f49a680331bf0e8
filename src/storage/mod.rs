//! Data persistence and file operations

pub mod audit;

pub use audit::*;
