//! Worker process runtime
//!
//! A worker owns one wallet and one [`ExecutionEngine`]. It acknowledges a
//! command by writing its id into the next heartbeat before acting on it, and
//! adopts the id from its previous heartbeat file on start, so a restarted
//! worker never replays a command.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{CommandKind, Heartbeat, IpcDir};
use crate::{
    errors::{EngineError, EngineResult},
    execution::{ExecutionEngine, Wallet, prepare_wallet},
    storage::AuditLog,
    types::{Trade, TradeResult, TradeStatus},
};

#[derive(Debug, Default)]
struct BeatState {
    sequence: u64,
    total_executions: u64,
    successful_executions: u64,
    last_command_id: Option<String>,
}

#[derive(Debug)]
pub enum WorkerStep {
    Idle,
    Executed(Box<Trade>),
    Stop,
}

pub struct WorkerRuntime {
    name: String,
    ipc: IpcDir,
    engine: Arc<ExecutionEngine>,
    audit: Option<Arc<AuditLog>>,
    state: Arc<Mutex<BeatState>>,
    heartbeat_interval: Duration,
    poll_interval: Duration,
}

impl WorkerRuntime {
    pub fn new(name: &str, ipc: IpcDir, engine: Arc<ExecutionEngine>, heartbeat_interval: Duration) -> EngineResult<Self> {
        let previous = ipc.read_heartbeat(name).unwrap_or_else(|e| {
            warn!("Ignoring unreadable heartbeat for {}: {}", name, e);
            None
        });
        let state = match previous {
            Some(hb) => BeatState {
                sequence: hb.sequence,
                total_executions: hb.total_executions,
                successful_executions: hb.successful_executions,
                last_command_id: hb.last_command_id,
            },
            None => BeatState::default(),
        };
        Ok(Self {
            name: name.to_string(),
            ipc,
            engine,
            audit: None,
            state: Arc::new(Mutex::new(state)),
            heartbeat_interval,
            poll_interval: Duration::from_millis(200),
        })
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Write one heartbeat with the next sequence number.
    pub fn beat(&self) -> EngineResult<()> {
        write_beat(&self.name, &self.ipc, &self.state)
    }

    fn update(&self, f: impl FnOnce(&mut BeatState)) {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }

    /// Handle the current command file if it carries an id not yet seen.
    pub async fn poll_once(&self, wallet: &mut Wallet) -> EngineResult<WorkerStep> {
        let Some(command) = self.ipc.read_command(&self.name)? else {
            return Ok(WorkerStep::Idle);
        };
        let seen = {
            let guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.last_command_id.as_deref() == Some(command.id.as_str())
        };
        if seen {
            return Ok(WorkerStep::Idle);
        }

        self.update(|s| s.last_command_id = Some(command.id.clone()));
        self.beat()?;

        match command.kind {
            CommandKind::Stop => {
                info!("🛑 {} received stop", self.name);
                Ok(WorkerStep::Stop)
            }
            CommandKind::Execute { opportunity } => {
                info!(command_id = %command.id, "⚙️ {} executing {}", self.name, opportunity.id);
                let trade = self.engine.execute(&opportunity, wallet).await;
                let completed = trade.status == TradeStatus::Completed;
                self.update(|s| {
                    s.total_executions += 1;
                    if completed {
                        s.successful_executions += 1;
                    }
                });
                if let Some(audit) = &self.audit {
                    let result = TradeResult {
                        executor: self.name.clone(),
                        trade: trade.clone(),
                    };
                    if let Err(e) = audit.record_trade(&result) {
                        warn!("⚠️ Could not audit trade {}: {}", trade.trade_id, e);
                    }
                }
                self.beat()?;
                Ok(WorkerStep::Executed(Box::new(trade)))
            }
        }
    }

    /// Heartbeat on a timer while polling for commands, until cancelled or
    /// told to stop.
    pub async fn run(self, mut wallet: Wallet, cancel: CancellationToken) -> EngineResult<()> {
        prepare_wallet(self.engine.chain().as_ref(), &mut wallet).await?;
        info!("👷 Worker {} up (pid {})", self.name, std::process::id());

        let beats = cancel.child_token();
        let heartbeat = {
            let name = self.name.clone();
            let ipc = self.ipc.clone();
            let state = self.state.clone();
            let interval = self.heartbeat_interval;
            let beats = beats.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = beats.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = write_beat(&name, &ipc, &state) {
                                error!("❌ Heartbeat write failed for {}: {}", name, e);
                            }
                        }
                    }
                }
            })
        };

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {
                    match self.poll_once(&mut wallet).await {
                        Ok(WorkerStep::Stop) => break Ok(()),
                        Ok(_) => {}
                        Err(e @ EngineError::Io { .. }) => break Err(e),
                        Err(e) => warn!("⚠️ {} skipped a command: {}", self.name, e),
                    }
                }
            }
        };

        beats.cancel();
        let _ = heartbeat.await;
        info!("👋 Worker {} exiting", self.name);
        result
    }
}

fn write_beat(name: &str, ipc: &IpcDir, state: &Mutex<BeatState>) -> EngineResult<()> {
    // Held across the write so sequences land on disk in order.
    let mut guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.sequence += 1;
    ipc.write_heartbeat(&Heartbeat {
        worker: name.to_string(),
        pid: std::process::id(),
        timestamp: Utc::now(),
        sequence: guard.sequence,
        total_executions: guard.total_executions,
        successful_executions: guard.successful_executions,
        last_command_id: guard.last_command_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::engine::tests::harness;
    use crate::orchestrator::WorkerCommand;
    use crate::types::testing::opportunity;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn command_runs_once_and_is_acknowledged() {
        let mut h = harness(|_| {});
        let dir = tempfile::tempdir().unwrap();
        let ipc = IpcDir::new(dir.path()).unwrap();
        let audit = Arc::new(AuditLog::new(dir.path()).unwrap());
        let runtime = WorkerRuntime::new("w1", ipc.clone(), Arc::new(h.engine), Duration::from_secs(5))
            .unwrap()
            .with_audit(audit);

        let command = WorkerCommand::execute(opportunity(dec!(120)));
        assert!(ipc.send_command("w1", &command).unwrap());

        let step = runtime.poll_once(&mut h.wallet).await.unwrap();
        let WorkerStep::Executed(trade) = step else {
            panic!("expected execution, got {:?}", step);
        };
        assert_eq!(trade.status, TradeStatus::Completed);
        assert!(matches!(runtime.poll_once(&mut h.wallet).await.unwrap(), WorkerStep::Idle));
        assert_eq!(h.chain.sent_count(), 1);

        let hb = ipc.read_heartbeat("w1").unwrap().unwrap();
        assert_eq!(hb.last_command_id.as_deref(), Some(command.id.as_str()));
        assert_eq!((hb.total_executions, hb.successful_executions), (1, 1));
        assert!(ipc.pending_command("w1").unwrap().is_none());
    }

    #[tokio::test]
    async fn restarted_worker_does_not_replay_acknowledged_command() {
        let mut h = harness(|_| {});
        let dir = tempfile::tempdir().unwrap();
        let ipc = IpcDir::new(dir.path()).unwrap();
        let command = WorkerCommand::execute(opportunity(dec!(120)));
        ipc.send_command("w1", &command).unwrap();
        ipc.write_heartbeat(&Heartbeat {
            worker: "w1".into(),
            pid: 1,
            timestamp: Utc::now(),
            sequence: 7,
            total_executions: 0,
            successful_executions: 0,
            last_command_id: Some(command.id.clone()),
        })
        .unwrap();

        let runtime = WorkerRuntime::new("w1", ipc.clone(), Arc::new(h.engine), Duration::from_secs(5)).unwrap();
        assert!(matches!(runtime.poll_once(&mut h.wallet).await.unwrap(), WorkerStep::Idle));
        assert_eq!(h.chain.sent_count(), 0);

        runtime.beat().unwrap();
        assert_eq!(ipc.read_heartbeat("w1").unwrap().unwrap().sequence, 8);
    }

    #[tokio::test]
    async fn stop_command_ends_the_loop() {
        let h = harness(|_| {});
        let dir = tempfile::tempdir().unwrap();
        let ipc = IpcDir::new(dir.path()).unwrap();
        ipc.send_command("w1", &WorkerCommand::new(CommandKind::Stop)).unwrap();

        let runtime = WorkerRuntime::new("w1", ipc.clone(), Arc::new(h.engine), Duration::from_millis(20))
            .unwrap()
            .with_poll_interval(Duration::from_millis(5));
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            runtime.run(h.wallet, CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
        assert!(ipc.read_heartbeat("w1").unwrap().unwrap().sequence >= 1);
    }
}
