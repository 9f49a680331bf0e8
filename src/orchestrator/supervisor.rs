//! Worker process supervision

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{AlertSink, IpcDir, Severity};
use crate::{
    config::{OrchestratorSettings, WorkerConfig, WorkerRole},
    errors::{CircuitBreaker, EngineError, EngineResult},
    types::{WorkerState, WorkerStatus},
};

/// A running worker process.
#[async_trait]
pub trait WorkerProcess: Send {
    fn pid(&self) -> Option<u32>;
    /// `Some(description)` once the process has exited.
    fn try_exit(&mut self) -> EngineResult<Option<String>>;
    async fn kill(&mut self) -> EngineResult<()>;
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, worker: &WorkerConfig) -> EngineResult<Box<dyn WorkerProcess>>;
}

/// Spawns workers as OS processes with `tokio::process`.
pub struct TokioLauncher;

struct ChildProcess {
    name: String,
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> EngineResult<Option<String>> {
        self.child
            .try_wait()
            .map(|status| status.map(|s| s.to_string()))
            .map_err(|e| EngineError::io(format!("poll worker {}", self.name), e))
    }

    async fn kill(&mut self) -> EngineResult<()> {
        self.child
            .kill()
            .await
            .map_err(|e| EngineError::io(format!("kill worker {}", self.name), e))
    }
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, worker: &WorkerConfig) -> EngineResult<Box<dyn WorkerProcess>> {
        let child = Command::new(&worker.command)
            .args(&worker.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Process {
                worker: worker.name.clone(),
                message: format!("spawn `{}` failed: {}", worker.command, e),
            })?;
        Ok(Box::new(ChildProcess {
            name: worker.name.clone(),
            child,
        }))
    }
}

struct Supervised {
    config: WorkerConfig,
    status: WorkerStatus,
    process: Option<Box<dyn WorkerProcess>>,
    last_sequence: Option<u64>,
}

impl Supervised {
    fn set_state(&mut self, next: WorkerState) {
        if self.status.state == next {
            return;
        }
        if self.status.state.can_transition_to(next) {
            debug!("worker {}: {} → {}", self.status.name, self.status.state, next);
            self.status.state = next;
        } else {
            warn!(
                "worker {}: ignoring illegal transition {} → {}",
                self.status.name, self.status.state, next
            );
        }
    }
}

/// Keeps a fixed fleet of named workers alive. Crashed or unresponsive
/// workers are restarted up to `max_restarts` times, then marked failed for
/// good. Trips the fleet circuit breaker when restarts pile up or no worker
/// is left running.
pub struct Supervisor {
    workers: Mutex<Vec<Supervised>>,
    launcher: Arc<dyn ProcessLauncher>,
    ipc: IpcDir,
    breaker: Arc<CircuitBreaker>,
    alerts: Arc<dyn AlertSink>,
    max_restarts: u32,
    heartbeat_timeout: chrono::Duration,
    total_restarts: Mutex<u32>,
}

impl Supervisor {
    pub fn new(
        settings: &OrchestratorSettings,
        launcher: Arc<dyn ProcessLauncher>,
        ipc: IpcDir,
        breaker: Arc<CircuitBreaker>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let workers = settings
            .workers
            .iter()
            .map(|config| Supervised {
                status: WorkerStatus::new(&config.name, config.role),
                config: config.clone(),
                process: None,
                last_sequence: None,
            })
            .collect();
        let heartbeat_timeout =
            chrono::Duration::from_std(settings.heartbeat_timeout()).unwrap_or_else(|_| chrono::Duration::seconds(15));
        Self {
            workers: Mutex::new(workers),
            launcher,
            ipc,
            breaker,
            alerts,
            max_restarts: settings.max_restarts,
            heartbeat_timeout,
            total_restarts: Mutex::new(0),
        }
    }

    pub fn ipc(&self) -> &IpcDir {
        &self.ipc
    }

    pub async fn statuses(&self) -> Vec<WorkerStatus> {
        self.workers.lock().await.iter().map(|w| w.status.clone()).collect()
    }

    pub async fn total_restarts(&self) -> u32 {
        *self.total_restarts.lock().await
    }

    /// Names of running workers with `role`, in configuration order.
    pub async fn running_with_role(&self, role: WorkerRole) -> Vec<String> {
        self.workers
            .lock()
            .await
            .iter()
            .filter(|w| w.status.role == role && w.status.state == WorkerState::Running)
            .map(|w| w.status.name.clone())
            .collect()
    }

    pub async fn start_all(&self) {
        let mut workers = self.workers.lock().await;
        for worker in workers.iter_mut() {
            if let Err(e) = self.ipc.clear(&worker.config.name) {
                warn!("⚠️ Could not clear IPC files for {}: {}", worker.config.name, e);
            }
            self.launch(worker).await;
        }
        info!("👷 Started {} workers", workers.len());
    }

    async fn launch(&self, worker: &mut Supervised) {
        match self.launcher.launch(&worker.config).await {
            Ok(process) => {
                worker.status.pid = process.pid();
                worker.status.started_at = Some(Utc::now());
                worker.status.last_heartbeat = None;
                worker.process = Some(process);
                info!("▶️ Worker {} launched (pid {:?})", worker.config.name, worker.status.pid);
            }
            Err(e) => {
                error!("❌ Worker {} failed to launch: {}", worker.config.name, e);
                worker.process = None;
                worker.set_state(WorkerState::Crashed);
            }
        }
    }

    /// One supervision pass: exits, heartbeats, restarts, breaker.
    pub async fn monitor_once(&self, now: DateTime<Utc>) -> EngineResult<()> {
        if self.breaker.is_tripped().await {
            return Ok(());
        }

        let mut workers = self.workers.lock().await;
        for worker in workers.iter_mut() {
            self.observe(worker, now).await;
        }
        for worker in workers.iter_mut() {
            if matches!(worker.status.state, WorkerState::Crashed | WorkerState::Unresponsive) {
                self.restart_or_fail(worker).await;
            }
        }

        let live = workers.iter().filter(|w| w.status.state.is_live()).count();
        let fleet_size = workers.len();
        drop(workers);

        let total_restarts = self.total_restarts().await;
        if self.breaker.evaluate(total_restarts, live, fleet_size).await {
            let state = self.breaker.state().await;
            self.alerts
                .send_alert(
                    Severity::Critical,
                    "Circuit breaker tripped, stopping all workers",
                    json!({ "reason": state.reason, "total_restarts": total_restarts, "live_workers": live }),
                )
                .await;
            self.stop_all().await;
        }
        Ok(())
    }

    async fn observe(&self, worker: &mut Supervised, now: DateTime<Utc>) {
        if !worker.status.state.is_live() {
            return;
        }
        let name = worker.config.name.clone();

        if let Some(process) = worker.process.as_mut() {
            match process.try_exit() {
                Ok(Some(exit)) => {
                    warn!("💥 Worker {} exited: {}", name, exit);
                    worker.process = None;
                    worker.set_state(WorkerState::Crashed);
                    return;
                }
                Ok(None) => {}
                Err(e) => warn!("⚠️ {}", e),
            }
        }

        match self.ipc.read_heartbeat(&name) {
            Ok(Some(hb)) if worker.last_sequence != Some(hb.sequence) || worker.status.last_heartbeat.is_none() => {
                let fresh = worker.status.started_at.is_none_or(|started| hb.timestamp >= started);
                if fresh {
                    worker.last_sequence = Some(hb.sequence);
                    worker.status.last_heartbeat = Some(hb.timestamp);
                    worker.status.total_executions = hb.total_executions;
                    worker.status.successful_executions = hb.successful_executions;
                    if matches!(worker.status.state, WorkerState::Starting | WorkerState::Restarting) {
                        info!("💓 Worker {} is up", name);
                        worker.set_state(WorkerState::Running);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!("⚠️ Unreadable heartbeat for {}: {}", name, e),
        }

        let since = worker.status.last_heartbeat.or(worker.status.started_at);
        if let Some(since) = since {
            if now - since > self.heartbeat_timeout {
                warn!("🫥 Worker {} missed heartbeats since {}", name, since.format("%H:%M:%S"));
                if let Some(mut process) = worker.process.take() {
                    if let Err(e) = process.kill().await {
                        warn!("⚠️ {}", e);
                    }
                }
                if worker.status.state == WorkerState::Running {
                    worker.set_state(WorkerState::Unresponsive);
                } else {
                    worker.set_state(WorkerState::Crashed);
                }
            }
        }
    }

    async fn restart_or_fail(&self, worker: &mut Supervised) {
        let name = worker.config.name.clone();
        if worker.status.restart_count >= self.max_restarts {
            worker.set_state(WorkerState::Failed);
            error!("☠️ Worker {} failed permanently after {} restarts", name, worker.status.restart_count);
            self.alerts
                .send_alert(
                    Severity::Critical,
                    &format!("Worker {} exhausted its restart budget", name),
                    json!({ "worker": name, "restarts": worker.status.restart_count }),
                )
                .await;
            return;
        }

        worker.status.restart_count += 1;
        *self.total_restarts.lock().await += 1;
        worker.set_state(WorkerState::Restarting);
        info!(
            "🔁 Restarting worker {} ({}/{})",
            name, worker.status.restart_count, self.max_restarts
        );
        self.launch(worker).await;
    }

    /// Stop every worker that is still alive.
    pub async fn stop_all(&self) {
        let mut workers = self.workers.lock().await;
        for worker in workers.iter_mut() {
            if let Some(mut process) = worker.process.take() {
                if let Err(e) = process.kill().await {
                    warn!("⚠️ {}", e);
                }
            }
            if worker.status.state != WorkerState::Failed {
                worker.set_state(WorkerState::Stopped);
                worker.status.pid = None;
            }
        }
        info!("⏹️ All workers stopped");
    }

    /// Apply an operator reset: clear the breaker and the fleet restart
    /// count, then relaunch stopped workers.
    pub async fn reset(&self) {
        self.breaker.reset().await;
        *self.total_restarts.lock().await = 0;
        let mut workers = self.workers.lock().await;
        for worker in workers.iter_mut() {
            if worker.status.state == WorkerState::Stopped {
                worker.set_state(WorkerState::Starting);
                self.launch(worker).await;
            }
        }
    }

    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> EngineResult<()> {
        self.start_all().await;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.ipc.take_breaker_reset() {
                        Ok(true) => {
                            info!("🔓 Breaker reset requested by operator");
                            self.reset().await;
                        }
                        Ok(false) => {}
                        Err(e) => warn!("⚠️ {}", e),
                    }
                    self.monitor_once(Utc::now()).await?;
                }
            }
        }
        self.stop_all().await;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::orchestrator::alerts::recording::RecordingAlertSink;
    use crate::orchestrator::Heartbeat;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Processes that run until the test kills them.
    #[derive(Default)]
    pub(crate) struct FakeLauncher {
        pub launches: AtomicU32,
        pub alive: StdMutex<Vec<Arc<AtomicBool>>>,
    }

    impl FakeLauncher {
        pub(crate) fn crash_latest(&self) {
            if let Some(flag) = self.alive.lock().unwrap().last() {
                flag.store(false, Ordering::SeqCst);
            }
        }
    }

    struct FakeProcess {
        pid: u32,
        alive: Arc<AtomicBool>,
    }

    #[async_trait]
    impl WorkerProcess for FakeProcess {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn try_exit(&mut self) -> EngineResult<Option<String>> {
            Ok((!self.alive.load(Ordering::SeqCst)).then(|| "exit status: 1".to_string()))
        }

        async fn kill(&mut self) -> EngineResult<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn launch(&self, _worker: &WorkerConfig) -> EngineResult<Box<dyn WorkerProcess>> {
            let pid = 1_000 + self.launches.fetch_add(1, Ordering::SeqCst);
            let alive = Arc::new(AtomicBool::new(true));
            self.alive.lock().unwrap().push(alive.clone());
            Ok(Box::new(FakeProcess { pid, alive }))
        }
    }

    pub(crate) fn settings(workers: &[(&str, WorkerRole)]) -> OrchestratorSettings {
        OrchestratorSettings {
            workers: workers
                .iter()
                .map(|(name, role)| WorkerConfig {
                    name: name.to_string(),
                    role: *role,
                    command: "worker".into(),
                    args: vec![],
                })
                .collect(),
            max_restarts: 3,
            restart_breaker_threshold: 10,
            ..OrchestratorSettings::default()
        }
    }

    pub(crate) fn beat(ipc: &IpcDir, worker: &str, sequence: u64) {
        ipc.write_heartbeat(&Heartbeat {
            worker: worker.into(),
            pid: 1,
            timestamp: Utc::now(),
            sequence,
            total_executions: sequence,
            successful_executions: sequence,
            last_command_id: None,
        })
        .unwrap();
    }

    struct Fleet {
        supervisor: Supervisor,
        launcher: Arc<FakeLauncher>,
        breaker: Arc<CircuitBreaker>,
        alerts: Arc<RecordingAlertSink>,
        _dir: tempfile::TempDir,
    }

    fn fleet(settings: OrchestratorSettings) -> Fleet {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::default());
        let breaker = Arc::new(CircuitBreaker::new(settings.restart_breaker_threshold));
        let alerts = Arc::new(RecordingAlertSink::default());
        let supervisor = Supervisor::new(
            &settings,
            launcher.clone(),
            IpcDir::new(dir.path()).unwrap(),
            breaker.clone(),
            alerts.clone(),
        );
        Fleet {
            supervisor,
            launcher,
            breaker,
            alerts,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn heartbeat_marks_worker_running() {
        let f = fleet(settings(&[("w1", WorkerRole::Default)]));
        f.supervisor.start_all().await;
        assert_eq!(f.supervisor.statuses().await[0].state, WorkerState::Starting);

        beat(f.supervisor.ipc(), "w1", 1);
        f.supervisor.monitor_once(Utc::now()).await.unwrap();
        let status = &f.supervisor.statuses().await[0];
        assert_eq!(status.state, WorkerState::Running);
        assert_eq!(status.total_executions, 1);
        assert_eq!(f.supervisor.running_with_role(WorkerRole::Default).await, vec!["w1"]);
    }

    #[tokio::test]
    async fn fourth_crash_with_three_restarts_is_permanent() {
        let f = fleet(settings(&[("w1", WorkerRole::Default), ("w2", WorkerRole::Default)]));
        f.supervisor.start_all().await;

        for crash in 1..=4 {
            // w1 is always the most recent launch after the first crash
            if crash == 1 {
                f.launcher.alive.lock().unwrap()[0].store(false, Ordering::SeqCst);
            } else {
                f.launcher.crash_latest();
            }
            f.supervisor.monitor_once(Utc::now()).await.unwrap();
        }

        let statuses = f.supervisor.statuses().await;
        assert_eq!(statuses[0].state, WorkerState::Failed);
        assert_eq!(statuses[0].restart_count, 3);
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 2 + 3);
        assert_eq!(f.alerts.count(Severity::Critical), 1);
        // w2 keeps the fleet alive
        assert!(!f.breaker.is_tripped().await);

        // a failed worker is never restarted again
        f.supervisor.monitor_once(Utc::now()).await.unwrap();
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn silent_worker_is_restarted() {
        let f = fleet(settings(&[("w1", WorkerRole::Default)]));
        f.supervisor.start_all().await;
        beat(f.supervisor.ipc(), "w1", 1);
        f.supervisor.monitor_once(Utc::now()).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(60);
        f.supervisor.monitor_once(later).await.unwrap();
        let status = &f.supervisor.statuses().await[0];
        assert_eq!(status.state, WorkerState::Restarting);
        assert_eq!(status.restart_count, 1);
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restarts_over_threshold_trip_breaker_and_stop_fleet() {
        let mut s = settings(&[("w1", WorkerRole::Default), ("w2", WorkerRole::FlashLoan)]);
        s.restart_breaker_threshold = 2;
        let f = fleet(s);
        f.supervisor.start_all().await;

        for _ in 0..3 {
            f.launcher.crash_latest();
            f.supervisor.monitor_once(Utc::now()).await.unwrap();
        }

        assert!(f.breaker.is_tripped().await);
        assert!(f.supervisor.statuses().await.iter().all(|s| s.state == WorkerState::Stopped));
        let launches = f.launcher.launches.load(Ordering::SeqCst);

        // nothing is restarted while tripped
        f.supervisor.monitor_once(Utc::now()).await.unwrap();
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), launches);

        f.supervisor.reset().await;
        assert!(!f.breaker.is_tripped().await);
        assert_eq!(f.supervisor.total_restarts().await, 0);
        assert!(f.supervisor.statuses().await.iter().all(|s| s.state == WorkerState::Starting));
    }

    #[tokio::test]
    async fn last_worker_failing_trips_breaker() {
        let mut s = settings(&[("w1", WorkerRole::Default)]);
        s.max_restarts = 0;
        let f = fleet(s);
        f.supervisor.start_all().await;
        f.launcher.crash_latest();
        f.supervisor.monitor_once(Utc::now()).await.unwrap();

        assert_eq!(f.supervisor.statuses().await[0].state, WorkerState::Failed);
        let state = f.breaker.state().await;
        assert!(state.tripped);
        assert_eq!(state.reason.as_deref(), Some("no workers running"));
    }
}
