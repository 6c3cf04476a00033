//! Multi-table coordination: registration, per-tick fan-out, shared-surface
//! reload handling, and the driving loop.
//!
//! The coordinator owns up to [`MAX_TABLES`] orchestrators behind one
//! registration lock. Per-tick work never takes that lock: each tick clones
//! the current set, asks the scheduler for a plan, and dispatches one
//! concurrent unit per selected table, joining them all before reporting.
//! One table's failure is its own; only a surface reload touches every table
//! at once, because all tables share that one surface.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::click::{ClickGate, ClickTiming};
use crate::events::EventSender;
use crate::extract::StateExtractor;
use crate::monitor::ResourceMonitor;
use crate::orchestrator::{TableLayout, TableOrchestrator, TickOutcome};
use crate::recovery::RecoveryPolicy;
use crate::rules::RuleSet;
use crate::scheduler::{IntervalSettings, Scheduler, SchedulingStrategy, TableHint};
use crate::surface::Surface;
use crate::types::{AutomationError, TableId, TableStatistics, TableStatus, MAX_TABLES};

/// Tunables the coordinator is built with
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub intervals: IntervalSettings,
    pub strategy: SchedulingStrategy,
    pub cpu_threshold: f32,
    pub recovery: RecoveryPolicy,
    pub timing: ClickTiming,
    /// Stop once this many rounds were recorded across all tables
    pub round_target: Option<u64>,
    /// How long to wait for the surface after a reload
    pub reload_ready_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            intervals: IntervalSettings::default(),
            strategy: SchedulingStrategy::default(),
            cpu_threshold: crate::monitor::DEFAULT_CPU_THRESHOLD,
            recovery: RecoveryPolicy::default(),
            timing: ClickTiming::default(),
            round_target: None,
            reload_ready_timeout: Duration::from_secs(30),
        }
    }
}

/// Aggregate result of one tick, for observability
#[derive(Debug)]
pub struct TickReport {
    pub outcomes: BTreeMap<TableId, TickOutcome>,
    /// Delay before the next tick
    pub interval: Duration,
    /// Whether this tick handled a surface reload instead of capturing
    pub reloaded: bool,
    /// Rounds recorded across all tables so far
    pub rounds_total: u64,
    /// Whether the configured round target has been reached
    pub target_reached: bool,
}

/// Owns and drives all registered tables against one shared surface
pub struct MultiTableCoordinator {
    surface: Arc<dyn Surface>,
    extractor: Arc<dyn StateExtractor>,
    tables: Mutex<BTreeMap<TableId, Arc<TableOrchestrator>>>,
    scheduler: Scheduler,
    monitor: Mutex<ResourceMonitor>,
    gate: Arc<Mutex<ClickGate>>,
    timing: ClickTiming,
    recovery: RecoveryPolicy,
    events: EventSender,
    round_target: Option<u64>,
    reload_ready_timeout: Duration,
    all_stuck_reported: AtomicBool,
}

impl MultiTableCoordinator {
    pub fn new(
        surface: Arc<dyn Surface>,
        extractor: Arc<dyn StateExtractor>,
        settings: CoordinatorSettings,
        events: EventSender,
    ) -> Self {
        Self {
            surface,
            extractor,
            tables: Mutex::new(BTreeMap::new()),
            scheduler: Scheduler::new(settings.intervals, settings.strategy),
            monitor: Mutex::new(ResourceMonitor::new(settings.cpu_threshold)),
            gate: Arc::new(Mutex::new(ClickGate::new())),
            timing: settings.timing,
            recovery: settings.recovery,
            events,
            round_target: settings.round_target,
            reload_ready_timeout: settings.reload_ready_timeout,
            all_stuck_reported: AtomicBool::new(false),
        }
    }

    /// Register a table, failing beyond the capacity limit or on a duplicate
    /// id; a rejected registration leaves every existing table untouched.
    pub async fn register_table(
        &self,
        id: TableId,
        layout: TableLayout,
        rules: Option<&str>,
    ) -> Result<(), AutomationError> {
        // Validate rules before taking any slot, so a bad rule string is a
        // pure no-op.
        let rules = match rules {
            Some(raw) => RuleSet::parse(raw)?,
            None => RuleSet::empty(),
        };

        let mut tables = self.tables.lock().await;
        if tables.contains_key(&id) {
            return Err(AutomationError::AlreadyRegistered(id));
        }
        if tables.len() >= MAX_TABLES {
            return Err(AutomationError::CapacityExceeded(MAX_TABLES));
        }

        let orchestrator = Arc::new(TableOrchestrator::new(
            id,
            layout,
            rules,
            self.recovery.clone(),
            self.events.clone(),
        ));
        tables.insert(id, orchestrator);
        info!("registered table {id} ({} of {MAX_TABLES})", tables.len());
        Ok(())
    }

    pub async fn remove_table(&self, id: TableId) -> Result<(), AutomationError> {
        let removed = self.tables.lock().await.remove(&id);
        match removed {
            Some(orchestrator) => {
                orchestrator.stop().await;
                info!("removed table {id}");
                Ok(())
            }
            None => Err(AutomationError::UnknownTable(id)),
        }
    }

    pub async fn table_count(&self) -> usize {
        self.tables.lock().await.len()
    }

    /// Swap a table's rule list; validation failure leaves the previous
    /// rules in force.
    pub async fn set_rules(&self, id: TableId, rules: &str) -> Result<(), AutomationError> {
        let rules = RuleSet::parse(rules)?;
        let orchestrator = self.get(id).await?;
        orchestrator.set_rules(rules).await;
        Ok(())
    }

    pub async fn pause_table(&self, id: TableId) -> Result<bool, AutomationError> {
        Ok(self.get(id).await?.pause().await)
    }

    pub async fn resume_table(&self, id: TableId) -> Result<bool, AutomationError> {
        Ok(self.get(id).await?.resume().await)
    }

    /// Resume every paused or stuck table
    pub async fn start_all(&self) {
        for orchestrator in self.snapshot().await {
            orchestrator.resume().await;
        }
        info!("all tables started");
    }

    /// End the session for every table
    pub async fn stop_all(&self) {
        for orchestrator in self.snapshot().await {
            orchestrator.stop().await;
        }
        info!("all tables stopped");
    }

    pub async fn pause_all(&self) {
        for orchestrator in self.snapshot().await {
            orchestrator.pause().await;
        }
        info!("all tables paused");
    }

    pub async fn statistics(&self) -> BTreeMap<TableId, TableStatistics> {
        let mut stats = BTreeMap::new();
        for orchestrator in self.snapshot().await {
            stats.insert(orchestrator.id(), orchestrator.statistics().await);
        }
        stats
    }

    /// Run one tick: handle a pending reload, plan the capture set, fan the
    /// selected tables out concurrently, and join them all.
    pub async fn process_tick(&self) -> TickReport {
        let orchestrators = self.snapshot().await;

        let reloaded = self.surface.detect_reload().await;
        if reloaded {
            self.handle_reload(&orchestrators).await;
        }

        let mut hints = Vec::with_capacity(orchestrators.len());
        for orchestrator in &orchestrators {
            hints.push(orchestrator.hint().await);
        }

        let throttle = self.monitor.lock().await.sample_throttle_factor();
        let plan = self.scheduler.plan(&hints, throttle);

        let mut join_set = JoinSet::new();
        for orchestrator in &orchestrators {
            if !plan.tables.contains(&orchestrator.id()) {
                continue;
            }
            let orchestrator = Arc::clone(orchestrator);
            let surface = Arc::clone(&self.surface);
            let extractor = Arc::clone(&self.extractor);
            let gate = Arc::clone(&self.gate);
            let timing = self.timing;
            join_set.spawn(async move {
                let outcome = orchestrator
                    .run_tick(surface.as_ref(), extractor.as_ref(), gate.as_ref(), &timing)
                    .await;
                (orchestrator.id(), outcome)
            });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    outcomes.insert(id, outcome);
                }
                Err(err) => error!("table unit of work failed to join: {err}"),
            }
        }

        let mut rounds_total = 0u64;
        for orchestrator in &orchestrators {
            rounds_total += u64::from(orchestrator.rounds_observed().await);
        }
        let target_reached = self.round_target.is_some_and(|t| rounds_total >= t);

        self.report_if_all_stuck(&hints, &orchestrators).await;

        TickReport {
            outcomes,
            interval: plan.interval,
            reloaded,
            rounds_total,
            target_reached,
        }
    }

    /// Drive ticks until shutdown is requested or the round target is hit.
    ///
    /// A pause or registration change takes effect at the next tick's plan;
    /// an in-flight tick always drains fully before the loop re-checks the
    /// shutdown signal, so every completed round gets handed off before exit.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        // First tick fires at the normal cadence before any plan exists.
        let mut interval = Duration::from_millis(self.scheduler.intervals().normal_ms);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("shutdown requested, draining in-flight work");
                    break;
                }
            }
            let report = self.process_tick().await;
            interval = report.interval;
            if report.target_reached {
                info!(
                    "round target reached after {} rounds, stopping",
                    report.rounds_total
                );
                break;
            }
        }
    }

    async fn get(&self, id: TableId) -> Result<Arc<TableOrchestrator>, AutomationError> {
        self.tables
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(AutomationError::UnknownTable(id))
    }

    async fn snapshot(&self) -> Vec<Arc<TableOrchestrator>> {
        self.tables.lock().await.values().cloned().collect()
    }

    /// The surface reloaded under every table at once: pause the running
    /// set, wait for the surface to come back, and resume exactly that set.
    /// Tables that were already paused or stuck stay as they were.
    async fn handle_reload(&self, orchestrators: &[Arc<TableOrchestrator>]) {
        warn!("surface reload detected, pausing all running tables");

        let mut paused_by_reload = Vec::new();
        for orchestrator in orchestrators {
            if orchestrator.pause().await {
                paused_by_reload.push(Arc::clone(orchestrator));
            }
        }

        if self.surface.wait_until_ready(self.reload_ready_timeout).await {
            for orchestrator in &paused_by_reload {
                orchestrator.resume().await;
            }
            info!(
                "surface ready again, resumed {} tables",
                paused_by_reload.len()
            );
        } else {
            error!(
                "surface not ready within {:?} after reload; tables stay paused",
                self.reload_ready_timeout
            );
            for orchestrator in &paused_by_reload {
                self.events.error(
                    orchestrator.id(),
                    "reload",
                    "surface did not become ready after reload",
                );
            }
        }
    }

    /// A single table's trouble stays per-table; only the everything-stuck
    /// condition is reported coordinator-wide, once per episode.
    async fn report_if_all_stuck(
        &self,
        hints: &[TableHint],
        orchestrators: &[Arc<TableOrchestrator>],
    ) {
        if orchestrators.is_empty() {
            return;
        }
        let mut all_stuck = true;
        for orchestrator in orchestrators {
            if orchestrator.status().await != TableStatus::Stuck {
                all_stuck = false;
                break;
            }
        }
        if all_stuck {
            if !self.all_stuck_reported.swap(true, Ordering::Relaxed) {
                error!("every registered table is stuck ({} tables)", hints.len());
            }
        } else {
            self.all_stuck_reported.store(false, Ordering::Relaxed);
        }
    }
}
