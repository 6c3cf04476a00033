//! Core types used throughout the orchestrator.
//!
//! This module defines the fundamental data structures for table identity,
//! round outcomes, completed-round records, and the crate-wide error taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a table (1..=6)
pub type TableId = u8;

/// Hard limit on concurrently registered tables
pub const MAX_TABLES: usize = 6;

/// Timer value at or below which the round no longer accepts interaction
pub const INTERACTIVE_THRESHOLD: u8 = 6;

/// Rounds a table observes before it is allowed to act
pub const LEARNING_ROUNDS: u32 = 3;

/// One of the two sides a round can be won by (and a decision can name)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Blue,
    Red,
}

impl Side {
    /// History/rule symbol: `P` for Blue (player), `B` for Red (banker)
    pub fn symbol(&self) -> char {
        match self {
            Side::Blue => 'P',
            Side::Red => 'B',
        }
    }

    pub fn from_symbol(c: char) -> Option<Side> {
        match c.to_ascii_uppercase() {
            'P' => Some(Side::Blue),
            'B' => Some(Side::Red),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Blue => "blue",
            Side::Red => "red",
        }
    }
}

/// Lifecycle status of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    /// Observing its first rounds, never acting
    Learning,
    /// Observing and acting on rule matches
    Active,
    /// Temporarily excluded from capture by an explicit pause
    Paused,
    /// Escalated out of rotation after exhausted retries; needs manual resume
    Stuck,
    /// Ended for the session
    Stopped,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Learning => "learning",
            TableStatus::Active => "active",
            TableStatus::Paused => "paused",
            TableStatus::Stuck => "stuck",
            TableStatus::Stopped => "stopped",
        }
    }

    /// Whether the scheduler may select this table for capture
    pub fn is_schedulable(&self) -> bool {
        matches!(self, TableStatus::Learning | TableStatus::Active)
    }
}

/// How a decision fared once its round completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionResult {
    Correct,
    Incorrect,
    None,
}

/// Immutable record of one completed round, created exactly once per round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_number: u32,
    pub timestamp: DateTime<Utc>,
    /// Timer value at round start (one of the two known starting durations)
    pub timer_start: u8,
    pub blue_score: u32,
    pub red_score: u32,
    pub winner: Side,
    pub decision_made: Option<Side>,
    /// Rule string in force when the decision was made
    pub pattern_matched: Option<String>,
    pub result: DecisionResult,
}

/// Freshly extracted timer/score values for one table.
///
/// Fields are optional because recognition can fail per field; a complete
/// snapshot has all three present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub timer: Option<u8>,
    pub blue_score: Option<u32>,
    pub red_score: Option<u32>,
}

impl Snapshot {
    pub fn new(timer: u8, blue_score: u32, red_score: u32) -> Self {
        Self {
            timer: Some(timer),
            blue_score: Some(blue_score),
            red_score: Some(red_score),
        }
    }

    /// Name of the first missing field, if any
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.timer.is_none() {
            Some("timer")
        } else if self.blue_score.is_none() {
            Some("blue score")
        } else if self.red_score.is_none() {
            Some("red score")
        } else {
            None
        }
    }
}

/// Per-table running statistics surfaced to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatistics {
    pub table_id: TableId,
    pub status: TableStatus,
    pub rounds_observed: u32,
    pub total_decisions: u32,
    pub correct_decisions: u32,
    pub accuracy_percent: f64,
    pub learning_phase: bool,
    pub current_timer: Option<u8>,
    pub blue_score: u32,
    pub red_score: u32,
    pub last_rounds: Option<String>,
}

/// Errors that can occur during orchestration
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("capture failed for table {table_id}: {reason}")]
    CaptureFailure { table_id: TableId, reason: String },

    #[error("extraction missing {field} for table {table_id}")]
    ExtractionFailure {
        table_id: TableId,
        field: &'static str,
    },

    #[error("shared surface reference frame unavailable")]
    ReferenceFrameUnavailable,

    #[error("shared surface reload detected")]
    ReloadDetected,

    #[error("table limit of {0} reached")]
    CapacityExceeded(usize),

    #[error("table {0} already registered")]
    AlreadyRegistered(TableId),

    #[error("invalid rule format: {0}")]
    InvalidRuleFormat(String),

    #[error("table {0} not registered")]
    UnknownTable(TableId),

    #[error("click failed at ({x}, {y}): {reason}")]
    ClickFailure { x: i32, y: i32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
