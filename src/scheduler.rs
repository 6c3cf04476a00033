//! Adaptive capture cadence planning across tables.
//!
//! Each tick the scheduler looks at every table's last timer value and
//! produces one plan: which tables to capture (all schedulable ones) and how
//! long to wait before the next tick. The default strategy follows the
//! fastest table, so no table's critical countdown window is ever sampled at
//! a lazy cadence; alternative strategies slot in behind the same contract.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::types::{TableId, TableStatus, INTERACTIVE_THRESHOLD};

/// Where a table currently is in its round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapturePhase {
    /// Timer above the interactive threshold: decisions happen here
    Clickable,
    /// Timer in the non-interactive tail: round completion is imminent
    Countdown,
    /// Timer at zero or unknown: waiting for the next round
    Result,
}

/// How the global tick interval is derived from per-table phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingStrategy {
    #[serde(rename = "fastest")]
    FastestTimer,
    #[serde(rename = "slowest")]
    SlowestTimer,
    #[serde(rename = "fixed")]
    Fixed,
    #[serde(rename = "majority")]
    Majority,
    #[serde(rename = "per_table")]
    PerTable,
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::FastestTimer
    }
}

/// Capture interval per phase, in milliseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntervalSettings {
    pub fast_ms: u64,
    pub normal_ms: u64,
    pub slow_ms: u64,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            fast_ms: 100,
            normal_ms: 200,
            slow_ms: 1000,
        }
    }
}

/// Per-table input to a scheduling decision; derived fresh each tick and
/// never persisted
#[derive(Debug, Clone, Copy)]
pub struct TableHint {
    pub table_id: TableId,
    pub status: TableStatus,
    pub last_timer: Option<u8>,
}

/// One tick's capture plan
#[derive(Debug, Clone)]
pub struct CapturePlan {
    /// Delay before the next tick
    pub interval: Duration,
    /// Tables to capture this tick, ascending id order
    pub tables: Vec<TableId>,
    /// Per-table cadence, populated only by the per-table strategy
    pub per_table_intervals: Option<HashMap<TableId, Duration>>,
}

/// Plans capture cadence from table phases and host pressure
#[derive(Debug, Clone)]
pub struct Scheduler {
    intervals: IntervalSettings,
    strategy: SchedulingStrategy,
}

impl Scheduler {
    pub fn new(intervals: IntervalSettings, strategy: SchedulingStrategy) -> Self {
        Self {
            intervals,
            strategy,
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    pub fn intervals(&self) -> IntervalSettings {
        self.intervals
    }

    pub fn set_strategy(&mut self, strategy: SchedulingStrategy) {
        self.strategy = strategy;
    }

    /// Phase of a table given its last extracted timer
    pub fn phase(timer: Option<u8>) -> CapturePhase {
        match timer {
            None | Some(0) => CapturePhase::Result,
            Some(t) if t <= INTERACTIVE_THRESHOLD => CapturePhase::Countdown,
            Some(_) => CapturePhase::Clickable,
        }
    }

    fn phase_interval_ms(&self, phase: CapturePhase) -> u64 {
        match phase {
            CapturePhase::Countdown => self.intervals.fast_ms,
            CapturePhase::Clickable => self.intervals.normal_ms,
            CapturePhase::Result => self.intervals.slow_ms,
        }
    }

    /// Build this tick's plan.
    ///
    /// Only `Learning`/`Active` tables are captured; every eligible table is
    /// captured every tick, the adaptive part being the interval. A throttle
    /// factor above 1.0 widens whatever interval the strategy picked.
    pub fn plan(&self, hints: &[TableHint], throttle_factor: f64) -> CapturePlan {
        let eligible: Vec<&TableHint> = hints
            .iter()
            .filter(|h| h.status.is_schedulable())
            .collect();

        let mut tables: Vec<TableId> = eligible.iter().map(|h| h.table_id).collect();
        tables.sort_unstable();

        let timers: Vec<u8> = eligible.iter().filter_map(|h| h.last_timer).collect();

        let interval_ms = if eligible.is_empty() {
            self.intervals.slow_ms
        } else if timers.is_empty() {
            // No extraction has landed yet; poll at the normal cadence.
            self.intervals.normal_ms
        } else {
            self.interval_by_strategy(&timers)
        };

        let per_table_intervals = if self.strategy == SchedulingStrategy::PerTable {
            Some(
                eligible
                    .iter()
                    .map(|h| {
                        let ms = self.phase_interval_ms(Self::phase(h.last_timer));
                        (h.table_id, widen(ms, throttle_factor))
                    })
                    .collect(),
            )
        } else {
            None
        };

        let interval = widen(interval_ms, throttle_factor);
        trace!(
            "capture plan: {} tables, interval {:?} (strategy {:?}, throttle x{throttle_factor})",
            tables.len(),
            interval,
            self.strategy
        );

        CapturePlan {
            interval,
            tables,
            per_table_intervals,
        }
    }

    fn interval_by_strategy(&self, timers: &[u8]) -> u64 {
        let phases: Vec<CapturePhase> = timers.iter().map(|t| Self::phase(Some(*t))).collect();
        match self.strategy {
            SchedulingStrategy::FastestTimer | SchedulingStrategy::PerTable => {
                // The global tick must keep up with the most urgent table.
                if phases.contains(&CapturePhase::Countdown) {
                    self.intervals.fast_ms
                } else if phases.contains(&CapturePhase::Clickable) {
                    self.intervals.normal_ms
                } else {
                    self.intervals.slow_ms
                }
            }
            SchedulingStrategy::SlowestTimer => {
                let max_timer = timers.iter().copied().max().unwrap_or(0);
                self.phase_interval_ms(Self::phase(Some(max_timer)))
            }
            SchedulingStrategy::Fixed => self.intervals.normal_ms,
            SchedulingStrategy::Majority => {
                let mut counts: HashMap<CapturePhase, usize> = HashMap::new();
                for phase in &phases {
                    *counts.entry(*phase).or_default() += 1;
                }
                // Ties resolve toward the more urgent phase (last max wins).
                let majority = [
                    CapturePhase::Result,
                    CapturePhase::Clickable,
                    CapturePhase::Countdown,
                ]
                .into_iter()
                .max_by_key(|p| counts.get(p).copied().unwrap_or(0))
                .unwrap_or(CapturePhase::Result);
                self.phase_interval_ms(majority)
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(IntervalSettings::default(), SchedulingStrategy::default())
    }
}

fn widen(interval_ms: u64, factor: f64) -> Duration {
    Duration::from_millis((interval_ms as f64 * factor.max(1.0)) as u64)
}
