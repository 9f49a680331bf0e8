//! In-process task supervision

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::{EngineError, EngineResult, ErrorRecovery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
    OnFailure { max_restarts: u32, backoff: Duration },
}

/// Spawns the engine's long-running tasks, each with a child cancellation
/// token, and restarts failing ones according to their policy.
pub struct TaskSupervisor {
    cancel: CancellationToken,
    recovery: Arc<ErrorRecovery>,
    tasks: JoinSet<(String, EngineResult<()>)>,
}

impl TaskSupervisor {
    pub fn new(cancel: CancellationToken, recovery: Arc<ErrorRecovery>) -> Self {
        Self {
            cancel,
            recovery,
            tasks: JoinSet::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run `factory(cancel)` until it returns `Ok`, is cancelled, or exhausts
    /// its restart policy. A panic counts as a failure.
    pub fn spawn<F, Fut>(&mut self, name: &str, policy: RestartPolicy, factory: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        let name = name.to_string();
        let cancel = self.cancel.child_token();
        let recovery = self.recovery.clone();
        self.tasks.spawn(async move {
            let mut restarts = 0u32;
            loop {
                let attempt = tokio::spawn(factory(cancel.clone()));
                let error = match attempt.await {
                    Ok(Ok(())) => return (name, Ok(())),
                    Ok(Err(e)) => e,
                    Err(join) => EngineError::Process {
                        worker: name.clone(),
                        message: format!("task panicked: {}", join),
                    },
                };
                if cancel.is_cancelled() {
                    return (name, Err(error));
                }
                recovery.handle_error(&error, &format!("task {}", name)).await;

                match policy {
                    RestartPolicy::OnFailure { max_restarts, backoff } if restarts < max_restarts => {
                        restarts += 1;
                        warn!("🔁 Restarting task {} ({}/{})", name, restarts, max_restarts);
                        tokio::select! {
                            _ = cancel.cancelled() => return (name, Err(error)),
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                    _ => {
                        error!("❌ Task {} stopped: {}", name, error);
                        return (name, Err(error));
                    }
                }
            }
        });
    }

    /// Run a task that owns its inputs and so cannot be restarted.
    pub fn spawn_once<F, Fut>(&mut self, name: &str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        let name = name.to_string();
        let recovery = self.recovery.clone();
        let fut = task(self.cancel.child_token());
        self.tasks.spawn(async move {
            let result = fut.await;
            if let Err(e) = &result {
                recovery.handle_error(e, &format!("task {}", name)).await;
            }
            (name, result)
        });
    }

    /// Wait for the next task to finish for good.
    pub async fn join_next(&mut self) -> Option<(String, EngineResult<()>)> {
        match self.tasks.join_next().await? {
            Ok(done) => Some(done),
            Err(e) => Some((
                "supervisor".to_string(),
                Err(EngineError::Process {
                    worker: "supervisor".into(),
                    message: e.to_string(),
                }),
            )),
        }
    }

    /// Cancel every task and wait for all of them.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some((name, result)) = self.join_next().await {
            match result {
                Ok(()) => info!("✓ {} stopped", name),
                Err(e) => warn!("{} stopped with error: {}", name, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failing_until(success_on: u32, runs: Arc<AtomicU32>) -> impl Fn(CancellationToken) -> std::pin::Pin<Box<dyn Future<Output = EngineResult<()>> + Send>> + Send + Sync + 'static {
        move |_cancel| {
            let runs = runs.clone();
            Box::pin(async move {
                let run = runs.fetch_add(1, Ordering::SeqCst) + 1;
                if run >= success_on {
                    Ok(())
                } else {
                    Err(EngineError::Process {
                        worker: "test".into(),
                        message: format!("run {} failed", run),
                    })
                }
            })
        }
    }

    #[tokio::test]
    async fn restarts_failing_task_within_budget() {
        let mut tasks = TaskSupervisor::new(CancellationToken::new(), Arc::new(ErrorRecovery::new()));
        let runs = Arc::new(AtomicU32::new(0));
        tasks.spawn(
            "flaky",
            RestartPolicy::OnFailure {
                max_restarts: 3,
                backoff: Duration::from_millis(1),
            },
            failing_until(3, runs.clone()),
        );
        let (name, result) = tasks.join_next().await.unwrap();
        assert_eq!(name, "flaky");
        assert!(result.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget_or_with_never() {
        let recovery = Arc::new(ErrorRecovery::new());
        let mut tasks = TaskSupervisor::new(CancellationToken::new(), recovery.clone());
        let runs = Arc::new(AtomicU32::new(0));
        tasks.spawn(
            "doomed",
            RestartPolicy::OnFailure {
                max_restarts: 2,
                backoff: Duration::from_millis(1),
            },
            failing_until(u32::MAX, runs.clone()),
        );
        assert!(tasks.join_next().await.unwrap().1.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        let once = Arc::new(AtomicU32::new(0));
        tasks.spawn("once", RestartPolicy::Never, failing_until(u32::MAX, once.clone()));
        assert!(tasks.join_next().await.unwrap().1.is_err());
        assert_eq!(once.load(Ordering::SeqCst), 1);
        assert_eq!(recovery.snapshot().await.get("process"), Some(&4));
    }

    #[tokio::test]
    async fn one_shot_task_reports_its_error() {
        let recovery = Arc::new(ErrorRecovery::new());
        let mut tasks = TaskSupervisor::new(CancellationToken::new(), recovery.clone());
        let owned = vec![1u8, 2, 3];
        tasks.spawn_once("consumer", move |_cancel| async move {
            Err(EngineError::Process {
                worker: "consumer".into(),
                message: format!("consumed {} items", owned.len()),
            })
        });
        let (name, result) = tasks.join_next().await.unwrap();
        assert_eq!(name, "consumer");
        assert!(result.unwrap_err().to_string().contains("consumed 3 items"));
        assert_eq!(recovery.snapshot().await.get("process"), Some(&1));
    }

    #[tokio::test]
    async fn shutdown_cancels_running_tasks() {
        let mut tasks = TaskSupervisor::new(CancellationToken::new(), Arc::new(ErrorRecovery::new()));
        tasks.spawn("loop", RestartPolicy::Never, |cancel: CancellationToken| async move {
            cancel.cancelled().await;
            Ok::<(), EngineError>(())
        });
        assert_eq!(tasks.len(), 1);
        tokio::time::timeout(Duration::from_secs(1), tasks.shutdown()).await.unwrap();
    }
}
