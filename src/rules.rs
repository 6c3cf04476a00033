//! Rule grammar validation and priority-ordered pattern matching.
//!
//! Rules are written as `BBP-P;BPB-B`: a 3-symbol round history, a dash, the
//! side to choose, with rules separated by semicolons. `B` is the red side,
//! `P` the blue side. The first rule whose antecedent equals the history
//! wins; list order is priority, not specificity.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::types::{AutomationError, Side};

lazy_static! {
    /// Grammar for a full rule string: `[BP]{3}-[BP]` entries joined by `;`
    static ref RULE_FORMAT: Regex =
        Regex::new(r"^[BP]{3}-[BP](;[BP]{3}-[BP])*$").unwrap();
}

/// A single history→decision rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub antecedent: [Side; 3],
    pub consequent: Side,
}

impl Rule {
    pub fn to_rule_string(&self) -> String {
        let mut s = String::with_capacity(5);
        for side in &self.antecedent {
            s.push(side.symbol());
        }
        s.push('-');
        s.push(self.consequent.symbol());
        s
    }
}

/// An ordered, validated rule list for one table.
///
/// Construction is the validation point: anything that parses is safe to
/// match against. Rule lists are swapped atomically by the owning table so a
/// table is never evaluated against a half-updated list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
    source: String,
}

impl RuleSet {
    /// An empty rule set; matches nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse and validate a rule string like `BBP-P;BPB-B`.
    ///
    /// Whitespace is trimmed and symbols are case-insensitive. Fails with
    /// `InvalidRuleFormat` without touching any existing rule list.
    pub fn parse(input: &str) -> Result<Self, AutomationError> {
        let normalized = input.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(AutomationError::InvalidRuleFormat(
                "rule string is empty".into(),
            ));
        }
        if !RULE_FORMAT.is_match(&normalized) {
            return Err(AutomationError::InvalidRuleFormat(format!(
                "'{input}' does not match BBP-P;BPB-B form"
            )));
        }

        let mut rules = Vec::new();
        for entry in normalized.split(';') {
            let (history, decision) = entry
                .split_once('-')
                .ok_or_else(|| AutomationError::InvalidRuleFormat(entry.to_string()))?;
            let mut antecedent = [Side::Blue; 3];
            for (slot, c) in antecedent.iter_mut().zip(history.chars()) {
                *slot = Side::from_symbol(c)
                    .ok_or_else(|| AutomationError::InvalidRuleFormat(entry.to_string()))?;
            }
            let consequent = decision
                .chars()
                .next()
                .and_then(Side::from_symbol)
                .ok_or_else(|| AutomationError::InvalidRuleFormat(entry.to_string()))?;
            rules.push(Rule {
                antecedent,
                consequent,
            });
        }

        debug!("loaded {} rules from '{}'", rules.len(), normalized);
        Ok(Self {
            rules,
            source: normalized,
        })
    }

    /// Match a 3-round history against the rules, first match wins.
    ///
    /// Returns `None` when the history is shorter than 3 rounds or nothing
    /// matches. Deterministic and side-effect free.
    pub fn decide(&self, history: &[Side]) -> Option<&Rule> {
        if history.len() != 3 {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| rule.antecedent.as_slice() == history)
    }

    /// The normalized rule string this set was parsed from
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
