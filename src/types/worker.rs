//! Worker process status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::WorkerRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Starting,
    Running,
    Crashed,
    Unresponsive,
    Restarting,
    /// Restart budget exhausted. Permanent.
    Failed,
    /// Stopped on purpose, e.g. by the circuit breaker.
    Stopped,
}

impl WorkerState {
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        match (self, next) {
            (Failed, _) => false,
            (_, Stopped) => true,
            (Stopped, Starting) => true,
            (Starting, Running) | (Starting, Crashed) => true,
            (Running, Crashed) | (Running, Unresponsive) => true,
            (Crashed, Restarting) | (Unresponsive, Restarting) => true,
            (Crashed, Failed) | (Unresponsive, Failed) => true,
            (Restarting, Running) | (Restarting, Crashed) | (Restarting, Failed) => true,
            _ => false,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, WorkerState::Starting | WorkerState::Running | WorkerState::Restarting)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub role: WorkerRole,
    pub pid: Option<u32>,
    pub state: WorkerState,
    pub restart_count: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub total_executions: u64,
    pub successful_executions: u64,
}

impl WorkerStatus {
    pub fn new(name: &str, role: WorkerRole) -> Self {
        Self {
            name: name.to_string(),
            role,
            pid: None,
            state: WorkerState::Starting,
            restart_count: 0,
            last_heartbeat: None,
            started_at: None,
            total_executions: 0,
            successful_executions: 0,
        }
    }
}
