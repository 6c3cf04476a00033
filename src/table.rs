//! Per-table state: round history, learning phase, and the round/timer
//! state machine.
//!
//! A table watches snapshots of its timer and scores. A round is complete
//! when either score strictly increases; the side that increased is the
//! winner. A new round start shows up as the timer jumping from the
//! non-interactive tail back up to one of the two starting durations.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::rules::RuleSet;
use crate::types::{
    DecisionResult, RoundRecord, Side, TableId, TableStatistics, TableStatus,
    INTERACTIVE_THRESHOLD, LEARNING_ROUNDS,
};

/// The two known round-start durations
pub const ROUND_START_SHORT: u8 = 15;
pub const ROUND_START_LONG: u8 = 25;

/// A timer above this value right after the non-interactive tail means the
/// round was reset
const NEW_ROUND_TIMER_FLOOR: u8 = 10;

/// Complete state for a single table
#[derive(Debug)]
pub struct TableState {
    pub table_id: TableId,
    status: TableStatus,
    learning_phase: bool,
    rounds_observed: u32,
    round_history: VecDeque<Side>,

    last_timer: Option<u8>,
    last_blue_score: u32,
    last_red_score: u32,

    rules: RuleSet,

    round_number: u32,
    last_decision: Option<Side>,
    decision_pending: bool,

    total_decisions: u32,
    correct_decisions: u32,
}

impl TableState {
    pub fn new(table_id: TableId, rules: RuleSet) -> Self {
        Self {
            table_id,
            status: TableStatus::Learning,
            learning_phase: true,
            rounds_observed: 0,
            round_history: VecDeque::with_capacity(4),
            last_timer: None,
            last_blue_score: 0,
            last_red_score: 0,
            rules,
            round_number: 0,
            last_decision: None,
            decision_pending: false,
            total_decisions: 0,
            correct_decisions: 0,
        }
    }

    pub fn status(&self) -> TableStatus {
        self.status
    }

    pub fn learning_phase(&self) -> bool {
        self.learning_phase
    }

    pub fn rounds_observed(&self) -> u32 {
        self.rounds_observed
    }

    pub fn last_timer(&self) -> Option<u8> {
        self.last_timer
    }

    pub fn scores(&self) -> (u32, u32) {
        (self.last_blue_score, self.last_red_score)
    }

    pub fn decision_pending(&self) -> bool {
        self.decision_pending
    }

    /// Swap in a new validated rule list. Atomic: the previous list stays in
    /// force until this call, and the new one applies from the next decision.
    pub fn set_rules(&mut self, rules: RuleSet) {
        info!(
            "table {}: rules updated to '{}'",
            self.table_id,
            rules.as_str()
        );
        self.rules = rules;
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// The last three outcomes oldest-first, only once three exist
    pub fn history(&self) -> Option<[Side; 3]> {
        if self.round_history.len() < 3 {
            return None;
        }
        let mut out = [Side::Blue; 3];
        for (slot, side) in out.iter_mut().zip(self.round_history.iter()) {
            *slot = *side;
        }
        Some(out)
    }

    /// History as a symbol string like `BPB`
    pub fn history_string(&self) -> Option<String> {
        self.history()
            .map(|h| h.iter().map(|s| s.symbol()).collect())
    }

    /// Record the freshly extracted timer value
    pub fn update_timer(&mut self, timer: u8) {
        self.last_timer = Some(timer);
    }

    /// Whether the timer jumped from the non-interactive tail back to a
    /// round-start value since the previous snapshot
    pub fn detect_new_round(&self, current_timer: u8) -> bool {
        match self.last_timer {
            Some(prev) => {
                prev <= INTERACTIVE_THRESHOLD && current_timer > NEW_ROUND_TIMER_FLOOR
            }
            None => false,
        }
    }

    /// Compare fresh scores against the previous snapshot and store them.
    ///
    /// Returns the winner when either score strictly increased; ties and
    /// unchanged scores yield nothing. Score increase is the round-completion
    /// signal, so this fires at most once per round.
    pub fn apply_scores(&mut self, blue_score: u32, red_score: u32) -> Option<Side> {
        let winner = if blue_score > self.last_blue_score {
            Some(Side::Blue)
        } else if red_score > self.last_red_score {
            Some(Side::Red)
        } else {
            None
        };

        if let Some(side) = winner {
            debug!(
                "table {}: scores {}→{} / {}→{}, winner {}",
                self.table_id,
                self.last_blue_score,
                blue_score,
                self.last_red_score,
                red_score,
                side.as_str()
            );
        }

        self.last_blue_score = blue_score;
        self.last_red_score = red_score;
        winner
    }

    /// Record a completed round: push the outcome into history (dropping the
    /// oldest beyond 3), advance counters, finish the learning phase at the
    /// third round, and score any outstanding decision.
    pub fn record_round(&mut self, winner: Side, timer_start: u8) -> RoundRecord {
        self.round_number += 1;
        self.rounds_observed += 1;

        self.round_history.push_back(winner);
        while self.round_history.len() > 3 {
            self.round_history.pop_front();
        }

        if self.learning_phase && self.rounds_observed >= LEARNING_ROUNDS {
            self.learning_phase = false;
            if self.status == TableStatus::Learning {
                self.status = TableStatus::Active;
            }
            info!("table {}: learning phase complete", self.table_id);
        }

        let result = match self.last_decision {
            Some(decision) => {
                self.total_decisions += 1;
                if decision == winner {
                    self.correct_decisions += 1;
                    DecisionResult::Correct
                } else {
                    DecisionResult::Incorrect
                }
            }
            None => DecisionResult::None,
        };

        let record = RoundRecord {
            round_number: self.round_number,
            timestamp: chrono::Utc::now(),
            timer_start,
            blue_score: self.last_blue_score,
            red_score: self.last_red_score,
            winner,
            decision_made: self.last_decision,
            pattern_matched: self
                .last_decision
                .map(|_| self.rules.as_str().to_string()),
            result,
        };

        info!(
            "table {}: round {} complete, winner {}, decision {:?}, result {:?}",
            self.table_id,
            record.round_number,
            winner.as_str(),
            record.decision_made.map(|d| d.as_str()),
            record.result
        );

        self.last_decision = None;
        self.decision_pending = false;

        record
    }

    /// Whether this table should evaluate its rules right now
    pub fn should_decide(&self) -> bool {
        if self.learning_phase || self.decision_pending {
            return false;
        }
        if self.round_history.len() < 3 {
            return false;
        }
        match self.last_timer {
            Some(timer) => timer > INTERACTIVE_THRESHOLD,
            None => false,
        }
    }

    /// Evaluate the rules against the current history and mark the decision
    /// pending until the round completes. Returns the side to act on.
    pub fn decide(&mut self) -> Option<Side> {
        if !self.should_decide() {
            return None;
        }
        let history = self.history()?;
        let rule = self.rules.decide(&history)?;
        let side = rule.consequent;

        self.last_decision = Some(side);
        self.decision_pending = true;
        info!(
            "table {}: decision {} (history {}, rule {})",
            self.table_id,
            side.as_str(),
            self.history_string().unwrap_or_default(),
            rule.to_rule_string()
        );
        Some(side)
    }

    /// Pause capture for this table; only meaningful while schedulable
    pub fn pause(&mut self) -> bool {
        if !self.status.is_schedulable() {
            return false;
        }
        self.status = TableStatus::Paused;
        info!("table {}: paused", self.table_id);
        true
    }

    /// Resume from `Paused` or `Stuck`, returning to `Learning` or `Active`
    /// depending on how far observation got
    pub fn resume(&mut self) -> bool {
        if !matches!(self.status, TableStatus::Paused | TableStatus::Stuck) {
            return false;
        }
        self.status = if self.learning_phase {
            TableStatus::Learning
        } else {
            TableStatus::Active
        };
        info!(
            "table {}: resumed as {}",
            self.table_id,
            self.status.as_str()
        );
        true
    }

    /// Escalate out of rotation after exhausted retries
    pub fn mark_stuck(&mut self) {
        if self.status != TableStatus::Stuck {
            self.status = TableStatus::Stuck;
        }
    }

    /// End this table for the session
    pub fn stop(&mut self) {
        self.status = TableStatus::Stopped;
        info!("table {}: stopped", self.table_id);
    }

    pub fn statistics(&self) -> TableStatistics {
        let accuracy = if self.total_decisions > 0 {
            (self.correct_decisions as f64 / self.total_decisions as f64) * 100.0
        } else {
            0.0
        };
        TableStatistics {
            table_id: self.table_id,
            status: self.status,
            rounds_observed: self.rounds_observed,
            total_decisions: self.total_decisions,
            correct_decisions: self.correct_decisions,
            accuracy_percent: (accuracy * 100.0).round() / 100.0,
            learning_phase: self.learning_phase,
            current_timer: self.last_timer,
            blue_score: self.last_blue_score,
            red_score: self.last_red_score,
            last_rounds: self.history_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side::{Blue, Red};

    fn table_with_rules(rules: &str) -> TableState {
        TableState::new(1, RuleSet::parse(rules).unwrap())
    }

    fn observe_rounds(table: &mut TableState, winners: &[Side]) {
        for (i, &winner) in winners.iter().enumerate() {
            let blue = winners[..=i].iter().filter(|w| **w == Blue).count() as u32;
            let red = winners[..=i].iter().filter(|w| **w == Red).count() as u32;
            table.apply_scores(blue, red);
            table.record_round(winner, ROUND_START_SHORT);
        }
    }

    #[test]
    fn test_starts_learning() {
        let table = TableState::new(3, RuleSet::empty());
        assert_eq!(table.status(), TableStatus::Learning);
        assert!(table.learning_phase());
        assert_eq!(table.rounds_observed(), 0);
        assert!(table.history().is_none());
    }

    #[test]
    fn test_learning_phase_ends_exactly_at_third_round() {
        let mut table = table_with_rules("BBP-P");
        observe_rounds(&mut table, &[Red, Red]);
        assert!(table.learning_phase());
        assert_eq!(table.status(), TableStatus::Learning);

        observe_rounds(&mut table, &[Blue]);
        assert!(!table.learning_phase());
        assert_eq!(table.status(), TableStatus::Active);
        assert_eq!(table.rounds_observed(), 3);
    }

    #[test]
    fn test_history_holds_three_most_recent_in_order() {
        let mut table = table_with_rules("BBP-P");
        observe_rounds(&mut table, &[Blue, Red, Red, Blue, Red]);
        assert_eq!(table.history(), Some([Red, Blue, Red]));
        assert_eq!(table.history_string().unwrap(), "BPB");
        assert_eq!(table.rounds_observed(), 5);
    }

    #[test]
    fn test_winner_detection_by_score_increase() {
        let mut table = table_with_rules("BBP-P");
        assert_eq!(table.apply_scores(1, 0), Some(Blue));
        assert_eq!(table.apply_scores(1, 1), Some(Red));
        // Unchanged scores complete nothing.
        assert_eq!(table.apply_scores(1, 1), None);
    }

    #[test]
    fn test_round_completion_example() {
        // Snapshots (timer=0, 3:2) then (timer=15, 3:3): winner Red, one record.
        let mut table = table_with_rules("BBP-P");
        table.apply_scores(3, 2);
        table.update_timer(0);

        assert!(table.detect_new_round(15));
        let winner = table.apply_scores(3, 3);
        assert_eq!(winner, Some(Red));
        let record = table.record_round(Red, 15);
        table.update_timer(15);

        assert_eq!(record.winner, Red);
        assert_eq!(record.timer_start, 15);
        assert_eq!(table.rounds_observed(), 1);
        assert_eq!(table.history_string(), None); // only one round so far
    }

    #[test]
    fn test_new_round_detection_boundaries() {
        let mut table = table_with_rules("BBP-P");
        assert!(!table.detect_new_round(15)); // no previous timer yet

        table.update_timer(6);
        assert!(table.detect_new_round(15));
        assert!(table.detect_new_round(25));
        assert!(!table.detect_new_round(10));

        table.update_timer(7);
        assert!(!table.detect_new_round(25)); // previous timer above the tail
    }

    #[test]
    fn test_should_decide_requires_timer_above_threshold() {
        let mut table = table_with_rules("BBP-P");
        observe_rounds(&mut table, &[Red, Red, Blue]);

        for timer in 0..=INTERACTIVE_THRESHOLD {
            table.update_timer(timer);
            assert!(!table.should_decide(), "timer {timer} must not decide");
        }
        table.update_timer(INTERACTIVE_THRESHOLD + 1);
        assert!(table.should_decide());
    }

    #[test]
    fn test_no_decision_during_learning() {
        let mut table = table_with_rules("BBP-P");
        observe_rounds(&mut table, &[Red, Red]);
        table.update_timer(15);
        assert!(!table.should_decide());
        assert!(table.decide().is_none());
    }

    #[test]
    fn test_decision_marks_pending_until_round_completes() {
        let mut table = table_with_rules("BBP-P");
        observe_rounds(&mut table, &[Red, Red, Blue]);
        table.update_timer(15);

        assert_eq!(table.decide(), Some(Blue));
        assert!(table.decision_pending());
        // A second evaluation in the same round is suppressed.
        assert!(table.decide().is_none());

        let record = table.record_round(Blue, 15);
        assert_eq!(record.decision_made, Some(Blue));
        assert_eq!(record.result, DecisionResult::Correct);
        assert!(!table.decision_pending());
    }

    #[test]
    fn test_incorrect_decision_scored() {
        let mut table = table_with_rules("BBP-P");
        observe_rounds(&mut table, &[Red, Red, Blue]);
        table.update_timer(15);
        table.decide();

        let record = table.record_round(Red, 15);
        assert_eq!(record.result, DecisionResult::Incorrect);

        let stats = table.statistics();
        assert_eq!(stats.total_decisions, 1);
        assert_eq!(stats.correct_decisions, 0);
        assert_eq!(stats.accuracy_percent, 0.0);
    }

    #[test]
    fn test_round_without_decision_scores_none() {
        let mut table = table_with_rules("PPP-B");
        observe_rounds(&mut table, &[Red, Red, Blue]);
        let record = table.record_round(Red, 15);
        assert_eq!(record.result, DecisionResult::None);
        assert!(record.decision_made.is_none());
        assert!(record.pattern_matched.is_none());
    }

    #[test]
    fn test_pause_resume_round_trip() {
        let mut table = table_with_rules("BBP-P");
        assert!(table.pause());
        assert_eq!(table.status(), TableStatus::Paused);
        assert!(!table.pause()); // already paused

        assert!(table.resume());
        assert_eq!(table.status(), TableStatus::Learning);

        observe_rounds(&mut table, &[Red, Red, Blue]);
        table.pause();
        table.resume();
        assert_eq!(table.status(), TableStatus::Active);
    }

    #[test]
    fn test_stuck_recovers_to_pre_stuck_phase() {
        let mut table = table_with_rules("BBP-P");
        table.mark_stuck();
        assert_eq!(table.status(), TableStatus::Stuck);
        assert!(table.resume());
        assert_eq!(table.status(), TableStatus::Learning);
    }

    #[test]
    fn test_stopped_is_terminal_for_scheduling() {
        let mut table = table_with_rules("BBP-P");
        table.stop();
        assert_eq!(table.status(), TableStatus::Stopped);
        assert!(!table.status().is_schedulable());
        assert!(!table.resume());
    }

    #[test]
    fn test_rules_swap_is_atomic() {
        let mut table = table_with_rules("BBP-P");
        observe_rounds(&mut table, &[Red, Red, Blue]);
        table.update_timer(15);

        table.set_rules(RuleSet::parse("BBP-B").unwrap());
        assert_eq!(table.decide(), Some(Red));
    }
}
