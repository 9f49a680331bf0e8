//! Manual approval policy and gates

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    config::ExecutionSettings,
    errors::{EngineError, EngineResult},
    types::{ArbitrageOpportunity, MevRisk},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Automatic,
    Manual { reason: String },
}

/// The single place deciding whether a trade needs a human.
#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    pub above_usd: Option<Decimal>,
    pub on_high_mev: bool,
}

impl ApprovalPolicy {
    pub fn from_settings(settings: &ExecutionSettings) -> Self {
        Self {
            above_usd: settings.manual_approval_above_usd,
            on_high_mev: settings.manual_approval_on_high_mev,
        }
    }

    pub fn decide(&self, opportunity: &ArbitrageOpportunity) -> ApprovalDecision {
        if let Some(limit) = self.above_usd {
            if opportunity.amount_in_usd > limit {
                return ApprovalDecision::Manual {
                    reason: format!("borrows ${:.2} (limit ${})", opportunity.amount_in_usd, limit),
                };
            }
        }
        if self.on_high_mev && opportunity.mev_risk == MevRisk::High {
            return ApprovalDecision::Manual {
                reason: "high MEV risk".to_string(),
            };
        }
        ApprovalDecision::Automatic
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
    TimedOut,
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Publish a request for approval.
    async fn request(&self, opportunity: &ArbitrageOpportunity, reason: &str) -> EngineResult<()>;
    /// `Some(approved)` once an operator has answered.
    async fn poll(&self, opportunity_id: &str) -> EngineResult<Option<bool>>;
}

/// Request approval and wait for the answer, at most `timeout`.
pub async fn await_approval(
    gate: &dyn ApprovalGate,
    opportunity: &ArbitrageOpportunity,
    reason: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> EngineResult<ApprovalOutcome> {
    gate.request(opportunity, reason).await?;
    info!("✋ Waiting up to {}s for approval of {} ({})", timeout.as_secs(), opportunity.id, reason);

    let wait = async {
        loop {
            if let Some(approved) = gate.poll(&opportunity.id).await? {
                return Ok::<_, EngineError>(approved);
            }
            tokio::time::sleep(poll_interval).await;
        }
    };
    match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(true)) => Ok(ApprovalOutcome::Approved),
        Ok(Ok(false)) => Ok(ApprovalOutcome::Rejected),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!("⌛ Approval for {} timed out", opportunity.id);
            Ok(ApprovalOutcome::TimedOut)
        }
    }
}

#[derive(Debug, Serialize)]
struct ApprovalRequest<'a> {
    opportunity_id: &'a str,
    route: String,
    amount_in_usd: Decimal,
    net_profit_usd: Decimal,
    mev_risk: MevRisk,
    reason: &'a str,
    requested_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ApprovalAnswer {
    approved: bool,
}

/// Writes `<dir>/<id>.request.json` and waits for an operator to drop
/// `<dir>/<id>.approval.json` containing `{ "approved": bool }`.
pub struct FileApprovalGate {
    dir: PathBuf,
}

impl FileApprovalGate {
    pub fn new(dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| EngineError::io(format!("create {}", dir.display()), e))?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn answer_path(&self, opportunity_id: &str) -> PathBuf {
        self.dir.join(format!("{}.approval.json", opportunity_id))
    }

    fn request_path(&self, opportunity_id: &str) -> PathBuf {
        self.dir.join(format!("{}.request.json", opportunity_id))
    }
}

#[async_trait]
impl ApprovalGate for FileApprovalGate {
    async fn request(&self, opportunity: &ArbitrageOpportunity, reason: &str) -> EngineResult<()> {
        let request = ApprovalRequest {
            opportunity_id: &opportunity.id,
            route: opportunity.route_label(),
            amount_in_usd: opportunity.amount_in_usd,
            net_profit_usd: opportunity.net_profit_usd,
            mev_risk: opportunity.mev_risk,
            reason,
            requested_at: Utc::now(),
        };
        let path = self.request_path(&opportunity.id);
        let text = serde_json::to_string_pretty(&request)
            .map_err(|e| EngineError::parsing("serialize approval request", e))?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| EngineError::io(format!("write {}", path.display()), e))
    }

    async fn poll(&self, opportunity_id: &str) -> EngineResult<Option<bool>> {
        let path = self.answer_path(opportunity_id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::io(format!("read {}", path.display()), e)),
        };
        let answer: ApprovalAnswer = serde_json::from_str(&text)
            .map_err(|e| EngineError::parsing(format!("approval file {}", path.display()), e))?;
        Ok(Some(answer.approved))
    }
}
