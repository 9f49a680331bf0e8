//! Candidate queue consumer

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{HealthMonitor, validate_opportunity};
use crate::{
    config::Thresholds,
    errors::EngineResult,
    orchestrator::PerformanceTracker,
    queue::{QueueRecord, WorkQueue},
    storage::AuditLog,
    types::ValidationResult,
    utils::print_validation,
};

/// Pops candidates, runs the gates, checks system health and forwards
/// survivors to the validated queue. Every decision is audited.
pub struct ValidationEngine {
    thresholds: Thresholds,
    health: Arc<HealthMonitor>,
    candidates: Arc<dyn WorkQueue>,
    validated: Arc<dyn WorkQueue>,
    audit: Arc<AuditLog>,
    tracker: Arc<PerformanceTracker>,
    poll_interval: Duration,
}

impl ValidationEngine {
    pub fn new(
        thresholds: Thresholds,
        health: Arc<HealthMonitor>,
        candidates: Arc<dyn WorkQueue>,
        validated: Arc<dyn WorkQueue>,
        audit: Arc<AuditLog>,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            thresholds,
            health,
            candidates,
            validated,
            audit,
            tracker,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn process(&self, record: QueueRecord) -> EngineResult<ValidationResult> {
        self.tracker.record_candidate();
        let mut result = validate_opportunity(&record.opportunity, &self.thresholds, Utc::now());

        if result.valid {
            let health = self.health.current().await;
            if !health.is_healthy() {
                result.valid = false;
                result.errors.push(format!("System unhealthy: {}", health.problems.join("; ")));
            }
        }

        print_validation(&result);
        if let Err(e) = self.audit.record_validation(&result) {
            warn!("⚠️ Failed to audit validation of {}: {}", result.opportunity_id, e);
        }
        self.tracker.record_validation(result.valid);

        if result.valid {
            self.validated.push(record).await?;
        }
        Ok(result)
    }

    /// Process everything currently queued. Returns how many were forwarded.
    pub async fn drain(&self) -> EngineResult<usize> {
        let mut forwarded = 0;
        while let Some(record) = self.candidates.pop().await? {
            if self.process(record).await?.valid {
                forwarded += 1;
            }
        }
        Ok(forwarded)
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> EngineResult<()> {
        info!("🛡️ Validation engine started");
        loop {
            if let Err(e) = self.drain().await {
                warn!("⚠️ Validation pass failed: {}", e);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
