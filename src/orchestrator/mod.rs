//! Worker orchestration: supervision, routing, heartbeats and performance

pub mod alerts;
pub mod ipc;
pub mod router;
pub mod supervisor;
pub mod tasks;
pub mod tracker;
pub mod worker;

pub use alerts::*;
pub use ipc::*;
pub use router::*;
pub use supervisor::*;
pub use tasks::*;
pub use tracker::*;
pub use worker::*;
