//! Append-only audit trail

use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::{
    errors::{EngineError, EngineResult},
    types::{TradeResult, ValidationResult},
};

#[derive(Serialize)]
struct AuditEntry<'a, T: Serialize> {
    kind: &'a str,
    recorded_at: chrono::DateTime<Utc>,
    #[serde(flatten)]
    body: &'a T,
}

/// One JSON line per validation decision and per finished trade, in daily
/// files under `<output_dir>/audit`.
pub struct AuditLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(output_dir: &Path) -> EngineResult<Self> {
        let dir = output_dir.join("audit");
        std::fs::create_dir_all(&dir).map_err(|e| EngineError::io(format!("create {}", dir.display()), e))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_validation(&self, result: &ValidationResult) -> EngineResult<()> {
        self.append("validations", "validation", result)?;
        debug!(
            opportunity_id = %result.opportunity_id,
            valid = result.valid,
            "Saved validation decision"
        );
        Ok(())
    }

    pub fn record_trade(&self, result: &TradeResult) -> EngineResult<()> {
        self.append("trades", "trade", result)?;
        info!(
            trade_id = %result.trade.trade_id,
            status = %result.trade.status,
            actual_profit = ?result.trade.actual_profit_usd,
            "Saved trade outcome"
        );
        Ok(())
    }

    fn append<T: Serialize>(&self, stream: &str, kind: &str, body: &T) -> EngineResult<()> {
        let now = Utc::now();
        let path = self.dir.join(format!("{}_{}.jsonl", stream, now.format("%Y-%m-%d")));
        let line = serde_json::to_string(&AuditEntry {
            kind,
            recorded_at: now,
            body,
        })
        .map_err(|e| EngineError::parsing(format!("serialize {} audit entry", kind), e))?;

        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EngineError::io(format!("open {}", path.display()), e))?;
        writeln!(file, "{}", line).map_err(|e| EngineError::io(format!("append to {}", path.display()), e))?;
        Ok(())
    }
}
