//! Table orchestrator - multi-table mini-game automation core
//!
//! This crate drives up to six independently running game tables rendered on
//! one shared browser surface. Each table cycles through timed rounds; the
//! orchestrator observes round outcomes, keeps a short rolling history,
//! matches it against user-supplied rules, and acts on eligible decisions
//! with a two-step click sequence.
//!
//! # Architecture
//!
//! A coordinator owns one orchestrator per table and drives a shared tick
//! loop. Each tick the scheduler picks a capture cadence from every table's
//! timer phase, the selected tables run their capture → extract → decide →
//! act units concurrently, and completed rounds plus status events flow out
//! over channels. Failures are absorbed per table through a retry → fallback
//! → stuck ladder; only a reload of the shared surface touches all tables at
//! once. The browser driver and the image recognizer sit behind traits, with
//! deterministic replay implementations for tests and dry runs.

pub mod click;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod extract;
pub mod geometry;
pub mod monitor;
pub mod orchestrator;
pub mod recovery;
pub mod rules;
pub mod scheduler;
pub mod surface;
pub mod table;
pub mod types;

// Re-export commonly used types
pub use click::{ClickGate, ClickTiming};
pub use config::Config;
pub use coordinator::{CoordinatorSettings, MultiTableCoordinator, TickReport};
pub use events::{ErrorEvent, EventSender, MonitorEvent, RoundEvent, StatusEvent};
pub use extract::{ReplayExtractor, StateExtractor};
pub use geometry::{to_absolute, ButtonLayout, Point, Region, CALIBRATION_OFFSET_X};
pub use monitor::ResourceMonitor;
pub use orchestrator::{TableLayout, TableOrchestrator, TickOutcome};
pub use recovery::{ErrorCounters, FailureCategory, RecoveryAction, RecoveryPolicy};
pub use rules::{Rule, RuleSet};
pub use scheduler::{CapturePlan, IntervalSettings, Scheduler, SchedulingStrategy, TableHint};
pub use surface::{demo_round_script, ReplaySurface, Surface};
pub use table::TableState;
pub use types::{
    AutomationError, DecisionResult, RoundRecord, Side, Snapshot, TableId, TableStatistics,
    TableStatus, MAX_TABLES,
};
