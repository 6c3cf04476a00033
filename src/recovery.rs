//! Per-table failure counters and the retry → fallback → stuck escalation.
//!
//! Every table keeps independent counters per failure category; one table
//! exhausting its retries never touches a sibling's counters or state.
//! Retry pacing is deadline-based: a failure arms a `retry_after` instant
//! and the table is simply skipped until it passes, so a backing-off table
//! never stretches the shared tick for the others.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::types::TableId;

/// Which stage of the capture→extract pipeline failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Capture,
    Extraction,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Capture => "capture",
            FailureCategory::Extraction => "extraction",
        }
    }
}

/// What the owning orchestrator should do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Try again once the backoff delay has passed
    Retry { delay: Duration, attempt: u32 },
    /// Switch extraction to the secondary recognition path
    Fallback,
    /// Out of options: mark the table stuck and alert
    Escalate,
}

/// Consecutive-failure state for one table
#[derive(Debug, Default)]
pub struct ErrorCounters {
    capture_failures: u32,
    extraction_failures: u32,
    fallback_failures: u32,
    total_errors: u32,
    last_error: Option<String>,
    retry_after: Option<Instant>,
}

impl ErrorCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the backoff deadline (if any) has passed
    pub fn ready(&self, now: Instant) -> bool {
        match self.retry_after {
            Some(deadline) => now >= deadline,
            None => true,
        }
    }

    /// Whether extraction should use the secondary recognition path
    pub fn use_extraction_fallback(&self, threshold: u32) -> bool {
        self.extraction_failures >= threshold
    }

    pub fn capture_failures(&self) -> u32 {
        self.capture_failures
    }

    pub fn extraction_failures(&self) -> u32 {
        self.extraction_failures
    }

    pub fn fallback_failures(&self) -> u32 {
        self.fallback_failures
    }

    pub fn total_errors(&self) -> u32 {
        self.total_errors
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Wipe everything, e.g. on manual resume of a stuck table
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Escalation policy shared by all tables (the counters are per table)
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    retry_delays: Vec<Duration>,
    stuck_threshold: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            stuck_threshold: 3,
        }
    }
}

impl RecoveryPolicy {
    pub fn new(retry_delays: Vec<Duration>, stuck_threshold: u32) -> Self {
        let retry_delays = if retry_delays.is_empty() {
            vec![Duration::from_secs(1)]
        } else {
            retry_delays
        };
        Self {
            retry_delays,
            stuck_threshold: stuck_threshold.max(1),
        }
    }

    pub fn stuck_threshold(&self) -> u32 {
        self.stuck_threshold
    }

    fn delay_for(&self, consecutive: u32) -> Duration {
        let idx = (consecutive.saturating_sub(1) as usize).min(self.retry_delays.len() - 1);
        self.retry_delays[idx]
    }

    /// Register a failure and decide what happens next.
    ///
    /// Capture has no fallback: the threshold escalates straight to stuck.
    /// Extraction escalates to the secondary path first and only sticks once
    /// that path has failed the same number of consecutive times.
    pub fn on_failure(
        &self,
        table_id: TableId,
        counters: &mut ErrorCounters,
        category: FailureCategory,
        message: impl Into<String>,
    ) -> RecoveryAction {
        let message = message.into();
        counters.total_errors += 1;
        counters.last_error = Some(message.clone());

        let action = match category {
            FailureCategory::Capture => {
                counters.capture_failures += 1;
                if counters.capture_failures >= self.stuck_threshold {
                    RecoveryAction::Escalate
                } else {
                    RecoveryAction::Retry {
                        delay: self.delay_for(counters.capture_failures),
                        attempt: counters.capture_failures,
                    }
                }
            }
            FailureCategory::Extraction => {
                if counters.extraction_failures < self.stuck_threshold {
                    counters.extraction_failures += 1;
                    if counters.extraction_failures >= self.stuck_threshold {
                        RecoveryAction::Fallback
                    } else {
                        RecoveryAction::Retry {
                            delay: self.delay_for(counters.extraction_failures),
                            attempt: counters.extraction_failures,
                        }
                    }
                } else {
                    counters.fallback_failures += 1;
                    if counters.fallback_failures >= self.stuck_threshold {
                        RecoveryAction::Escalate
                    } else {
                        RecoveryAction::Retry {
                            delay: self.delay_for(counters.fallback_failures),
                            attempt: counters.fallback_failures,
                        }
                    }
                }
            }
        };

        match action {
            RecoveryAction::Retry { delay, attempt } => {
                counters.retry_after = Some(Instant::now() + delay);
                warn!(
                    "table {}: {} failure {}/{} ({}), retrying in {:?}",
                    table_id,
                    category.as_str(),
                    attempt,
                    self.stuck_threshold,
                    message,
                    delay
                );
            }
            RecoveryAction::Fallback => {
                counters.retry_after = None;
                warn!(
                    "table {}: {} failures exhausted, switching to fallback path",
                    table_id,
                    category.as_str()
                );
            }
            RecoveryAction::Escalate => {
                counters.retry_after = None;
                warn!(
                    "table {}: {} consecutive {} failures, escalating to stuck",
                    table_id,
                    self.stuck_threshold,
                    category.as_str()
                );
            }
        }

        action
    }

    /// Any success resets the category back to zero
    pub fn on_success(&self, counters: &mut ErrorCounters, category: FailureCategory) {
        match category {
            FailureCategory::Capture => counters.capture_failures = 0,
            FailureCategory::Extraction => {
                counters.extraction_failures = 0;
                counters.fallback_failures = 0;
            }
        }
        counters.retry_after = None;
    }
}
