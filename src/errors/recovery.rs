//! Error recovery strategies

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::Level;

use super::EngineError;

/// What a caller does with a failure of a given class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Promote the next RPC endpoint and carry on.
    Failover,
    /// Drop this unit of work and continue the cycle.
    Skip { log_level: Level },
    /// Record the failure as a terminal trade outcome. Never retried.
    Record,
    /// Restart the failed process, bounded by its restart budget.
    Restart,
    /// Stop routing and submitting until an operator intervenes.
    Halt { reason: String },
    /// Exit the process with a non-zero status.
    Shutdown { reason: String },
}

impl EngineError {
    pub fn recovery(&self) -> RecoveryAction {
        match self {
            EngineError::Config(e) => RecoveryAction::Shutdown {
                reason: e.to_string(),
            },
            EngineError::Rpc { .. } | EngineError::Network { .. } | EngineError::Timeout { .. } => {
                RecoveryAction::Failover
            }
            EngineError::NoProviderAvailable { .. } => RecoveryAction::Skip {
                log_level: Level::ERROR,
            },
            EngineError::Quote { .. } | EngineError::DataParsing { .. } => RecoveryAction::Skip {
                log_level: Level::DEBUG,
            },
            EngineError::Contract { .. } | EngineError::Io { .. } => RecoveryAction::Skip {
                log_level: Level::WARN,
            },
            EngineError::Signing { .. } | EngineError::Submission { .. } | EngineError::Execution { .. } => {
                RecoveryAction::Record
            }
            EngineError::Process { .. } => RecoveryAction::Restart,
            EngineError::CircuitBreakerOpen { reason } => RecoveryAction::Halt {
                reason: reason.clone(),
            },
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "configuration",
            EngineError::NoProviderAvailable { .. }
            | EngineError::Rpc { .. }
            | EngineError::Network { .. }
            | EngineError::Timeout { .. } => "connectivity",
            EngineError::Quote { .. } | EngineError::DataParsing { .. } => "quote",
            EngineError::Contract { .. } | EngineError::Io { .. } => "io",
            EngineError::Signing { .. } | EngineError::Submission { .. } | EngineError::Execution { .. } => "execution",
            EngineError::Process { .. } => "process",
            EngineError::CircuitBreakerOpen { .. } => "systemic",
        }
    }
}

/// Per-class error counters shared by the long-running tasks.
#[derive(Default)]
pub struct ErrorRecovery {
    error_counts: Arc<RwLock<HashMap<&'static str, u64>>>,
}

impl ErrorRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn handle_error(&self, error: &EngineError, context: &str) -> RecoveryAction {
        *self
            .error_counts
            .write()
            .await
            .entry(error.class())
            .or_insert(0) += 1;

        let action = error.recovery();
        match &action {
            RecoveryAction::Skip { log_level } if *log_level == Level::DEBUG => {
                tracing::debug!(class = error.class(), "{}: {}", context, error);
            }
            RecoveryAction::Skip { log_level } if *log_level == Level::WARN => {
                tracing::warn!(class = error.class(), "{}: {}", context, error);
            }
            _ => tracing::error!(class = error.class(), action = ?action, "{}: {}", context, error),
        }
        action
    }

    pub async fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.error_counts.read().await.clone()
    }
}
