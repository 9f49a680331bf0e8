//! Fleet-wide circuit breaker
//!
//! Once tripped it stays tripped: routing and submission stop until an
//! operator calls [`CircuitBreaker::reset`]. There is no cooldown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub tripped: bool,
    pub reason: Option<String>,
    pub tripped_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    state: Arc<RwLock<CircuitBreakerState>>,
    restart_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(restart_threshold: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(CircuitBreakerState::default())),
            restart_threshold,
        }
    }

    pub fn restart_threshold(&self) -> u32 {
        self.restart_threshold
    }

    /// Trip the breaker. Returns `true` only for the call that tripped it.
    pub async fn trip(&self, reason: impl Into<String>) -> bool {
        let mut state = self.state.write().await;
        if state.tripped {
            return false;
        }
        let reason = reason.into();
        error!("⚡ Circuit breaker TRIPPED: {}", reason);
        state.tripped = true;
        state.reason = Some(reason);
        state.tripped_at = Some(Utc::now());
        true
    }

    /// Apply the fleet trip rules. Returns `true` if this call tripped the breaker.
    pub async fn evaluate(&self, total_restarts: u32, running_workers: usize, fleet_size: usize) -> bool {
        if total_restarts > self.restart_threshold {
            return self
                .trip(format!(
                    "fleet restarts {} exceed threshold {}",
                    total_restarts, self.restart_threshold
                ))
                .await;
        }
        if fleet_size > 0 && running_workers == 0 {
            return self.trip("no workers running").await;
        }
        false
    }

    pub async fn can_proceed(&self) -> bool {
        !self.state.read().await.tripped
    }

    pub async fn is_tripped(&self) -> bool {
        self.state.read().await.tripped
    }

    pub async fn state(&self) -> CircuitBreakerState {
        self.state.read().await.clone()
    }

    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        if state.tripped {
            info!(
                "Circuit breaker reset by operator (was: {})",
                state.reason.as_deref().unwrap_or("unknown")
            );
        }
        *state = CircuitBreakerState::default();
    }
}
