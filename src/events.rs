//! Outbound events: per-tick table status, alerts, and completed rounds.
//!
//! The core is an event producer only. Everything here is fire-and-forget
//! over bounded channels: a slow or absent consumer can never stall a tick,
//! and a lost status event never affects table state. Completed rounds ride
//! their own channel so the persistence consumer sees them at most once per
//! round, in round order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{RoundRecord, Side, TableId, TableStatistics, TableStatus};

/// Per-table status snapshot, emitted once per processed tick
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub table_id: TableId,
    pub status: TableStatus,
    pub timer: Option<u8>,
    pub round_history: Option<String>,
    pub pattern_matched: Option<String>,
    pub decision: Option<Side>,
    pub statistics: TableStatistics,
    pub timestamp: DateTime<Utc>,
}

/// Alert-worthy failure scoped to one table
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub table_id: TableId,
    pub category: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Events for the observability/UI consumer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Status(StatusEvent),
    Error(ErrorEvent),
}

/// A completed round bound for the persistence consumer
#[derive(Debug, Clone, Serialize)]
pub struct RoundEvent {
    pub table_id: TableId,
    pub record: RoundRecord,
}

/// Sending half of both outbound channels
#[derive(Clone)]
pub struct EventSender {
    monitor_tx: mpsc::Sender<MonitorEvent>,
    round_tx: mpsc::Sender<RoundEvent>,
}

impl EventSender {
    /// Build the sender plus both receiving halves
    pub fn channel(
        capacity: usize,
    ) -> (
        EventSender,
        mpsc::Receiver<MonitorEvent>,
        mpsc::Receiver<RoundEvent>,
    ) {
        let (monitor_tx, monitor_rx) = mpsc::channel(capacity);
        let (round_tx, round_rx) = mpsc::channel(capacity);
        (
            EventSender {
                monitor_tx,
                round_tx,
            },
            monitor_rx,
            round_rx,
        )
    }

    pub fn status(&self, event: StatusEvent) {
        if self.monitor_tx.try_send(MonitorEvent::Status(event)).is_err() {
            trace!("status event dropped (consumer behind)");
        }
    }

    pub fn error(&self, table_id: TableId, category: &str, message: impl Into<String>) {
        let event = ErrorEvent {
            table_id,
            category: category.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        };
        if self.monitor_tx.try_send(MonitorEvent::Error(event)).is_err() {
            trace!("error event dropped (consumer behind)");
        }
    }

    pub fn round(&self, table_id: TableId, record: RoundRecord) {
        if self
            .round_tx
            .try_send(RoundEvent { table_id, record })
            .is_err()
        {
            trace!("round event dropped (consumer behind)");
        }
    }
}
