//! Strategy routing of validated opportunities to workers

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{IpcDir, Supervisor, WorkerCommand};
use crate::{
    config::{OrchestratorSettings, WorkerRole},
    errors::{CircuitBreaker, EngineResult},
    queue::WorkQueue,
    types::{ArbitrageOpportunity, MevRisk},
};

#[derive(Debug, Clone)]
pub struct RoutingRules {
    pub large_trade_usd: Decimal,
    pub high_gas_ratio: Decimal,
}

impl RoutingRules {
    pub fn from_settings(settings: &OrchestratorSettings) -> Self {
        Self {
            large_trade_usd: settings.large_trade_usd,
            high_gas_ratio: settings.high_gas_ratio,
        }
    }

    /// High MEV risk or a large profit needs the flash-loan worker; a trade
    /// where gas eats much of the profit goes to the cheap path.
    pub fn choose_role(&self, opportunity: &ArbitrageOpportunity) -> WorkerRole {
        if opportunity.mev_risk == MevRisk::High || opportunity.net_profit_usd > self.large_trade_usd {
            return WorkerRole::FlashLoan;
        }
        if opportunity
            .gas_to_profit_ratio()
            .is_some_and(|ratio| ratio > self.high_gas_ratio)
        {
            return WorkerRole::SimpleArbitrage;
        }
        WorkerRole::Default
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Idle,
    Halted,
    Assigned { worker: String, command_id: String },
    /// Every candidate worker still holds an unacknowledged command.
    Busy,
    Dropped,
}

pub struct StrategyRouter {
    rules: RoutingRules,
    validated: Arc<dyn WorkQueue>,
    supervisor: Arc<Supervisor>,
    ipc: IpcDir,
    breaker: Arc<CircuitBreaker>,
}

impl StrategyRouter {
    pub fn new(
        rules: RoutingRules,
        validated: Arc<dyn WorkQueue>,
        supervisor: Arc<Supervisor>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let ipc = supervisor.ipc().clone();
        Self {
            rules,
            validated,
            supervisor,
            ipc,
            breaker,
        }
    }

    async fn candidates(&self, role: WorkerRole) -> Vec<String> {
        let preferred = self.supervisor.running_with_role(role).await;
        if !preferred.is_empty() || role == WorkerRole::Default {
            return preferred;
        }
        debug!("no running {} worker, falling back to default", role);
        self.supervisor.running_with_role(WorkerRole::Default).await
    }

    /// Take the best queued opportunity and hand it to one worker.
    pub async fn route_once(&self) -> EngineResult<RouteOutcome> {
        if !self.breaker.can_proceed().await {
            return Ok(RouteOutcome::Halted);
        }
        let Some(record) = self.validated.pop().await? else {
            return Ok(RouteOutcome::Idle);
        };
        let opportunity = &record.opportunity;
        let role = self.rules.choose_role(opportunity);

        let workers = self.candidates(role).await;
        if workers.is_empty() {
            warn!("🗑️ No running worker for {} (role {}), dropping it", opportunity.id, role);
            return Ok(RouteOutcome::Dropped);
        }

        let command = WorkerCommand::execute(opportunity.clone());
        for worker in &workers {
            if self.ipc.send_command(worker, &command)? {
                info!(
                    opportunity_id = %opportunity.id,
                    worker = %worker,
                    role = %role,
                    "🧭 Routed ${:.2} opportunity",
                    opportunity.net_profit_usd
                );
                return Ok(RouteOutcome::Assigned {
                    worker: worker.clone(),
                    command_id: command.id,
                });
            }
        }

        // Put it back; expiry drops it if the workers stay busy.
        self.validated.push(record).await?;
        Ok(RouteOutcome::Busy)
    }

    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> EngineResult<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.route_once().await {
                        warn!("⚠️ Routing failed: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::supervisor::tests::{FakeLauncher, beat, settings};
    use crate::orchestrator::{CommandKind, TracingAlertSink};
    use crate::queue::{MemoryQueue, QueueRecord};
    use crate::types::testing::opportunity;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn rules() -> RoutingRules {
        RoutingRules {
            large_trade_usd: dec!(250),
            high_gas_ratio: dec!(0.5),
        }
    }

    #[test]
    fn routing_rules_are_deterministic() {
        let rules = rules();
        let mut opp = opportunity(dec!(120));
        assert_eq!(rules.choose_role(&opp), WorkerRole::Default);

        opp.mev_risk = MevRisk::High;
        assert_eq!(rules.choose_role(&opp), WorkerRole::FlashLoan);

        let large = opportunity(dec!(300));
        assert_eq!(rules.choose_role(&large), WorkerRole::FlashLoan);

        let mut gassy = opportunity(dec!(20));
        gassy.gas_cost_usd = dec!(30);
        gassy.gross_profit_usd = dec!(50);
        assert_eq!(rules.choose_role(&gassy), WorkerRole::SimpleArbitrage);
    }

    struct Setup {
        router: StrategyRouter,
        supervisor: Arc<Supervisor>,
        validated: Arc<MemoryQueue>,
        breaker: Arc<CircuitBreaker>,
        _dir: tempfile::TempDir,
    }

    async fn setup(workers: &[(&str, WorkerRole)]) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let breaker = Arc::new(CircuitBreaker::new(10));
        let supervisor = Arc::new(Supervisor::new(
            &settings(workers),
            Arc::new(FakeLauncher::default()),
            IpcDir::new(dir.path()).unwrap(),
            breaker.clone(),
            Arc::new(TracingAlertSink),
        ));
        supervisor.start_all().await;
        for (name, _) in workers {
            beat(supervisor.ipc(), name, 1);
        }
        supervisor.monitor_once(Utc::now()).await.unwrap();

        let validated = Arc::new(MemoryQueue::new("validated"));
        let router = StrategyRouter::new(rules(), validated.clone(), supervisor.clone(), breaker.clone());
        Setup {
            router,
            supervisor,
            validated,
            breaker,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn best_opportunity_goes_to_matching_role() {
        let s = setup(&[("default-1", WorkerRole::Default), ("flash-1", WorkerRole::FlashLoan)]).await;
        s.validated.push(QueueRecord::new(opportunity(dec!(120)))).await.unwrap();
        s.validated.push(QueueRecord::new(opportunity(dec!(300)))).await.unwrap();

        let outcome = s.router.route_once().await.unwrap();
        let RouteOutcome::Assigned { worker, command_id } = outcome else {
            panic!("expected assignment, got {:?}", outcome);
        };
        assert_eq!(worker, "flash-1");
        let command = s.supervisor.ipc().read_command("flash-1").unwrap().unwrap();
        assert_eq!(command.id, command_id);
        let CommandKind::Execute { opportunity } = command.kind else {
            panic!("expected execute");
        };
        assert_eq!(opportunity.net_profit_usd, dec!(300));
    }

    #[tokio::test]
    async fn missing_role_falls_back_to_default() {
        let s = setup(&[("default-1", WorkerRole::Default)]).await;
        s.validated.push(QueueRecord::new(opportunity(dec!(300)))).await.unwrap();
        assert!(matches!(
            s.router.route_once().await.unwrap(),
            RouteOutcome::Assigned { ref worker, .. } if worker == "default-1"
        ));
    }

    #[tokio::test]
    async fn busy_worker_keeps_the_opportunity_queued() {
        let s = setup(&[("default-1", WorkerRole::Default)]).await;
        s.validated.push(QueueRecord::new(opportunity(dec!(120)))).await.unwrap();
        s.validated.push(QueueRecord::new(opportunity(dec!(110)))).await.unwrap();

        assert!(matches!(s.router.route_once().await.unwrap(), RouteOutcome::Assigned { .. }));
        assert_eq!(s.router.route_once().await.unwrap(), RouteOutcome::Busy);
        assert_eq!(s.validated.len().await, 1);
    }

    #[tokio::test]
    async fn no_workers_drops_and_tripped_breaker_halts() {
        let s = setup(&[]).await;
        s.validated.push(QueueRecord::new(opportunity(dec!(120)))).await.unwrap();
        assert_eq!(s.router.route_once().await.unwrap(), RouteOutcome::Dropped);

        s.validated.push(QueueRecord::new(opportunity(dec!(120)))).await.unwrap();
        s.breaker.trip("operator test").await;
        assert_eq!(s.router.route_once().await.unwrap(), RouteOutcome::Halted);
        assert_eq!(s.validated.len().await, 1);
    }
}
