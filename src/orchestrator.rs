//! Per-table orchestration: one table's capture → extract → decide → act
//! sequence for a single tick.
//!
//! Each orchestrator owns its table's state and failure counters behind the
//! table's own lock; the coordinator never reaches into them directly. A
//! tick's unit of work may suspend on capture, extraction, or click pacing
//! without ever blocking a sibling table.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::click::{resolve_frame, two_step_click, ClickGate, ClickTiming};
use crate::events::{EventSender, StatusEvent};
use crate::extract::StateExtractor;
use crate::geometry::{ButtonLayout, Region};
use crate::recovery::{ErrorCounters, FailureCategory, RecoveryAction, RecoveryPolicy};
use crate::rules::RuleSet;
use crate::scheduler::TableHint;
use crate::surface::Surface;
use crate::table::{TableState, ROUND_START_SHORT};
use crate::types::{Side, TableId, TableStatistics, TableStatus};

/// Attempts and spacing for reference-frame lookups at click time
const FRAME_ATTEMPTS: u32 = 4;
const FRAME_RETRY_WAIT: Duration = Duration::from_millis(500);

/// Where a table's configured sub-regions and buttons live within the
/// shared surface
#[derive(Debug, Clone, Copy)]
pub struct TableLayout {
    /// The table's rectangle, relative to the reference frame
    pub region: Region,
    /// Timer read-out, relative to the table region
    pub timer_region: Region,
    /// Blue score read-out, relative to the table region
    pub blue_score_region: Region,
    /// Red score read-out, relative to the table region
    pub red_score_region: Region,
    pub buttons: ButtonLayout,
}

/// Why a tick skipped a table without touching it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Backoff deadline from an earlier failure has not passed yet
    Backoff,
    /// The table stopped being schedulable between planning and dispatch
    NotSchedulable,
}

/// Result of one table's unit of work within a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Processed {
        round_completed: bool,
        decision: Option<Side>,
    },
    Skipped(SkipReason),
    Failed(FailureCategory),
}

impl TickOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, TickOutcome::Processed { .. })
    }
}

/// Drives a single table against the shared surface
pub struct TableOrchestrator {
    id: TableId,
    layout: TableLayout,
    state: Mutex<TableState>,
    counters: Mutex<ErrorCounters>,
    policy: RecoveryPolicy,
    events: EventSender,
}

impl TableOrchestrator {
    pub fn new(
        id: TableId,
        layout: TableLayout,
        rules: RuleSet,
        policy: RecoveryPolicy,
        events: EventSender,
    ) -> Self {
        Self {
            id,
            layout,
            state: Mutex::new(TableState::new(id, rules)),
            counters: Mutex::new(ErrorCounters::new()),
            policy,
            events,
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Scheduling input for this tick
    pub async fn hint(&self) -> TableHint {
        let state = self.state.lock().await;
        TableHint {
            table_id: self.id,
            status: state.status(),
            last_timer: state.last_timer(),
        }
    }

    pub async fn status(&self) -> TableStatus {
        self.state.lock().await.status()
    }

    pub async fn statistics(&self) -> TableStatistics {
        self.state.lock().await.statistics()
    }

    pub async fn rounds_observed(&self) -> u32 {
        self.state.lock().await.rounds_observed()
    }

    /// Swap in a freshly validated rule list, atomically
    pub async fn set_rules(&self, rules: RuleSet) {
        self.state.lock().await.set_rules(rules);
    }

    pub async fn pause(&self) -> bool {
        self.state.lock().await.pause()
    }

    /// Resume from paused or stuck; a manual resume also wipes the failure
    /// counters so the retry ladder starts over
    pub async fn resume(&self) -> bool {
        let resumed = self.state.lock().await.resume();
        if resumed {
            self.counters.lock().await.reset();
        }
        resumed
    }

    pub async fn stop(&self) {
        self.state.lock().await.stop();
    }

    /// Run this table's unit of work for the current tick
    pub async fn run_tick(
        &self,
        surface: &dyn Surface,
        extractor: &dyn StateExtractor,
        gate: &Mutex<ClickGate>,
        timing: &ClickTiming,
    ) -> TickOutcome {
        if !self.counters.lock().await.ready(Instant::now()) {
            return TickOutcome::Skipped(SkipReason::Backoff);
        }
        if !self.status().await.is_schedulable() {
            // Paused/stopped between planning and dispatch.
            return TickOutcome::Skipped(SkipReason::NotSchedulable);
        }

        // Capture the table's region of the shared surface.
        let frame = match surface.capture_region(self.id, &self.layout.region).await {
            Ok(frame) => frame,
            Err(err) => {
                let outcome = self
                    .handle_failure(FailureCategory::Capture, err.to_string())
                    .await;
                self.emit_status(None).await;
                return outcome;
            }
        };

        // Extract timer and scores, via the fallback path once the primary
        // has exhausted its ladder.
        let use_fallback = {
            let counters = self.counters.lock().await;
            counters.use_extraction_fallback(self.policy.stuck_threshold())
        };
        let snapshot = if use_fallback {
            extractor
                .extract_fallback(
                    &frame,
                    &self.layout.timer_region,
                    &self.layout.blue_score_region,
                    &self.layout.red_score_region,
                )
                .await
        } else {
            extractor
                .extract(
                    &frame,
                    &self.layout.timer_region,
                    &self.layout.blue_score_region,
                    &self.layout.red_score_region,
                )
                .await
        };

        if let Some(field) = snapshot.missing_field() {
            let outcome = self
                .handle_failure(FailureCategory::Extraction, format!("missing {field}"))
                .await;
            self.emit_status(None).await;
            return outcome;
        }
        let timer = snapshot.timer.unwrap_or_default();
        let blue = snapshot.blue_score.unwrap_or_default();
        let red = snapshot.red_score.unwrap_or_default();

        {
            let mut counters = self.counters.lock().await;
            self.policy.on_success(&mut counters, FailureCategory::Capture);
            self.policy
                .on_success(&mut counters, FailureCategory::Extraction);
        }

        // Advance the state machine: completion before history, history once
        // per round, timer last.
        let (round_completed, decision) = {
            let mut state = self.state.lock().await;

            if state.detect_new_round(timer) {
                debug!("table {}: new round started at timer {}", self.id, timer);
            }

            let mut round_completed = false;
            if let Some(winner) = state.apply_scores(blue, red) {
                let timer_start = if timer > 10 { timer } else { ROUND_START_SHORT };
                let record = state.record_round(winner, timer_start);
                self.events.round(self.id, record);
                round_completed = true;
            }

            state.update_timer(timer);
            let decision = state.decide();
            (round_completed, decision)
        };

        // Act on the decision; the shared click gate serializes only the
        // final act step.
        if let Some(side) = decision {
            if let Err(err) = self.act(surface, gate, timing, side).await {
                warn!("table {}: click sequence failed: {err}", self.id);
                self.events.error(self.id, "click", err.to_string());
            }
        }

        self.emit_status(decision).await;
        TickOutcome::Processed {
            round_completed,
            decision,
        }
    }

    async fn act(
        &self,
        surface: &dyn Surface,
        gate: &Mutex<ClickGate>,
        timing: &ClickTiming,
        side: Side,
    ) -> Result<(), crate::types::AutomationError> {
        let frame_origin = resolve_frame(surface, FRAME_ATTEMPTS, FRAME_RETRY_WAIT).await?;
        two_step_click(
            surface,
            gate,
            frame_origin,
            &self.layout.region,
            &self.layout.buttons,
            side,
            timing,
        )
        .await
    }

    async fn handle_failure(&self, category: FailureCategory, message: String) -> TickOutcome {
        let action = {
            let mut counters = self.counters.lock().await;
            self.policy
                .on_failure(self.id, &mut counters, category, message.clone())
        };

        if action == RecoveryAction::Escalate {
            self.state.lock().await.mark_stuck();
            self.events.error(
                self.id,
                category.as_str(),
                format!("stuck after repeated {} failures: {message}", category.as_str()),
            );
        }
        TickOutcome::Failed(category)
    }

    async fn emit_status(&self, decision: Option<Side>) {
        let state = self.state.lock().await;
        let rules = state.rules();
        let pattern_matched = if rules.is_empty() {
            None
        } else {
            Some(rules.as_str().to_string())
        };
        self.events.status(StatusEvent {
            table_id: self.id,
            status: state.status(),
            timer: state.last_timer(),
            round_history: state.history_string(),
            pattern_matched,
            decision,
            statistics: state.statistics(),
            timestamp: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSender, MonitorEvent, RoundEvent};
    use crate::extract::ReplayExtractor;
    use crate::geometry::Point;
    use crate::surface::ReplaySurface;
    use crate::types::Snapshot;
    use tokio::sync::mpsc;

    fn layout() -> TableLayout {
        TableLayout {
            region: Region::new(178, 336, 240, 180),
            timer_region: Region::new(100, 10, 40, 24),
            blue_score_region: Region::new(20, 10, 30, 24),
            red_score_region: Region::new(190, 10, 30, 24),
            buttons: ButtonLayout {
                choose_blue: Point::new(10, 80),
                choose_red: Point::new(60, 80),
                confirm: Point::new(35, 120),
                cancel: Point::new(35, 140),
            },
        }
    }

    /// Policy with no backoff delay so consecutive ticks are not skipped
    fn immediate_policy() -> RecoveryPolicy {
        RecoveryPolicy::new(vec![Duration::ZERO], 3)
    }

    struct Rig {
        orchestrator: TableOrchestrator,
        surface: ReplaySurface,
        extractor: ReplayExtractor,
        gate: Mutex<ClickGate>,
        timing: ClickTiming,
        monitor_rx: mpsc::Receiver<MonitorEvent>,
        round_rx: mpsc::Receiver<RoundEvent>,
    }

    impl Rig {
        fn new(rules: &str) -> Self {
            let (events, monitor_rx, round_rx) = EventSender::channel(64);
            Self {
                orchestrator: TableOrchestrator::new(
                    1,
                    layout(),
                    RuleSet::parse(rules).unwrap(),
                    immediate_policy(),
                    events,
                ),
                surface: ReplaySurface::new(Point::new(100, 50)),
                extractor: ReplayExtractor::new(),
                gate: Mutex::new(ClickGate::new()),
                timing: ClickTiming::default(),
                monitor_rx,
                round_rx,
            }
        }

        async fn tick(&self) -> TickOutcome {
            self.orchestrator
                .run_tick(&self.surface, &self.extractor, &self.gate, &self.timing)
                .await
        }
    }

    /// Three rounds won by red, red, blue, then a fresh clickable round
    fn three_round_script() -> Vec<Snapshot> {
        vec![
            Snapshot::new(15, 0, 0),
            Snapshot::new(0, 0, 0),
            Snapshot::new(15, 0, 1), // round 1: red
            Snapshot::new(0, 0, 1),
            Snapshot::new(15, 0, 2), // round 2: red
            Snapshot::new(0, 0, 2),
            Snapshot::new(15, 1, 2), // round 3: blue; history BBP
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_learns_then_decides_and_clicks() {
        let rig = Rig::new("BBP-P");
        rig.surface.script_table(1, three_round_script()).await;

        for _ in 0..6 {
            assert!(rig.tick().await.is_processed());
        }
        // Final scripted frame: third round completes, learning ends, the
        // rule fires and the two-step click lands.
        let outcome = rig.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Processed {
                round_completed: true,
                decision: Some(Side::Blue),
            }
        );

        let clicks = rig.surface.clicks().await;
        assert_eq!(clicks.len(), 2);
        // choose_blue offset through the calibrated transform
        assert_eq!(clicks[0].point, Point::new(100 + 178 + 10 + 17, 50 + 336 + 80));

        assert_eq!(rig.orchestrator.rounds_observed().await, 3);
        assert_eq!(rig.orchestrator.status().await, TableStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_records_flow_out_in_order() {
        let mut rig = Rig::new("BBP-P");
        rig.surface.script_table(1, three_round_script()).await;
        for _ in 0..7 {
            rig.tick().await;
        }

        let mut winners = Vec::new();
        while let Ok(event) = rig.round_rx.try_recv() {
            assert_eq!(event.table_id, 1);
            winners.push((event.record.round_number, event.record.winner));
        }
        assert_eq!(
            winners,
            vec![(1, Side::Red), (2, Side::Red), (3, Side::Blue)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_decision_during_learning_phase() {
        let rig = Rig::new("BBP-P");
        // Two rounds only; the table keeps learning.
        rig.surface
            .script_table(
                1,
                vec![
                    Snapshot::new(15, 0, 0),
                    Snapshot::new(0, 0, 0),
                    Snapshot::new(15, 0, 1),
                    Snapshot::new(0, 0, 1),
                    Snapshot::new(15, 0, 2),
                ],
            )
            .await;
        for _ in 0..5 {
            rig.tick().await;
        }
        assert!(rig.surface.clicks().await.is_empty());
        assert_eq!(rig.orchestrator.status().await, TableStatus::Learning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failures_escalate_to_stuck() {
        let mut rig = Rig::new("BBP-P");
        rig.surface.script_table(1, vec![Snapshot::new(15, 0, 0)]).await;
        rig.surface.inject_capture_failures(1, 3).await;

        for _ in 0..3 {
            assert_eq!(
                rig.tick().await,
                TickOutcome::Failed(FailureCategory::Capture)
            );
        }
        assert_eq!(rig.orchestrator.status().await, TableStatus::Stuck);

        // Stuck tables are skipped, not retried.
        assert_eq!(
            rig.tick().await,
            TickOutcome::Skipped(SkipReason::NotSchedulable)
        );

        // The escalation produced exactly one alert for this table.
        let mut alerts = 0;
        while let Ok(event) = rig.monitor_rx.try_recv() {
            if let MonitorEvent::Error(e) = event {
                assert_eq!(e.table_id, 1);
                assert_eq!(e.category, "capture");
                alerts += 1;
            }
        }
        assert_eq!(alerts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_fallback_path_recovers() {
        let rig = Rig::new("BBP-P");
        rig.surface.script_table(1, vec![Snapshot::new(15, 0, 0)]).await;
        let broken_primary = ReplayExtractor::with_broken_primary();

        // Three primary failures walk the ladder into fallback mode.
        for _ in 0..3 {
            let outcome = rig
                .orchestrator
                .run_tick(&rig.surface, &broken_primary, &rig.gate, &rig.timing)
                .await;
            assert_eq!(outcome, TickOutcome::Failed(FailureCategory::Extraction));
        }
        assert_eq!(rig.orchestrator.status().await, TableStatus::Learning);

        // The fallback path now decodes and the table recovers.
        let outcome = rig
            .orchestrator
            .run_tick(&rig.surface, &broken_primary, &rig.gate, &rig.timing)
            .await;
        assert!(outcome.is_processed());
        assert_eq!(rig.orchestrator.hint().await.last_timer, Some(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_fallback_eventually_sticks() {
        let rig = Rig::new("BBP-P");
        rig.surface.script_table(1, vec![Snapshot::default()]).await;

        // The scripted frame carries no values at all, so both paths fail.
        for _ in 0..6 {
            rig.tick().await;
        }
        assert_eq!(rig.orchestrator.status().await, TableStatus::Stuck);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_resets_counters() {
        let rig = Rig::new("BBP-P");
        rig.surface.script_table(1, vec![Snapshot::new(15, 0, 0)]).await;
        rig.surface.inject_capture_failures(1, 3).await;
        for _ in 0..3 {
            rig.tick().await;
        }
        assert_eq!(rig.orchestrator.status().await, TableStatus::Stuck);

        assert!(rig.orchestrator.resume().await);
        assert_eq!(rig.orchestrator.status().await, TableStatus::Learning);
        assert!(rig.tick().await.is_processed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_table_is_skipped() {
        let rig = Rig::new("BBP-P");
        rig.surface.script_table(1, vec![Snapshot::new(15, 0, 0)]).await;
        rig.orchestrator.pause().await;
        assert_eq!(
            rig.tick().await,
            TickOutcome::Skipped(SkipReason::NotSchedulable)
        );
        assert!(rig.surface.clicks().await.is_empty());
    }
}
