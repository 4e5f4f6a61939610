//! Selectivity profiling over the rule corpus.
//!
//! Produces a per-predicate weight in (0, 1]: the estimated fraction of
//! events satisfying it. Equality predicates are weighted by observed
//! value frequency among the enabled rules referring to the same field -
//! a value mentioned rarely is assumed rare in traffic, so it sorts earlier
//! in the per-field evaluation order. Range and string predicates use fixed
//! heuristics. These are hints; correctness never depends on them.

use std::collections::HashMap;

use crate::rules::{ConditionSpec, ScalarKey, ScalarOperand, ValidRule};

/// Weight for range-shaped predicates (GREATER_THAN, LESS_THAN, BETWEEN).
pub(crate) const RANGE_SELECTIVITY: f64 = 0.3;

/// Weight for string-scan predicates (CONTAINS, REGEX).
pub(crate) const STRING_SELECTIVITY: f64 = 0.1;

/// Floor keeping every weight inside (0, 1].
const MIN_SELECTIVITY: f64 = 0.001;

/// Value-frequency profiler for equality-shaped conditions.
#[derive(Debug, Default)]
pub(crate) struct SelectivityProfiler {
    field_totals: HashMap<String, u32>,
    value_counts: HashMap<(String, ScalarKey), u32>,
}

impl SelectivityProfiler {
    pub(crate) fn new() -> Self {
        SelectivityProfiler::default()
    }

    /// Record every equality-shaped occurrence in `rule`. IS_ANY_OF members
    /// each count once: a 100-value list mentions each value once.
    pub(crate) fn record(&mut self, rule: &ValidRule) {
        for spec in &rule.specs {
            match spec {
                ConditionSpec::Equal { field, value } => self.bump(field, value),
                ConditionSpec::AnyOf { field, values } => {
                    for value in values {
                        self.bump(field, value);
                    }
                }
                _ => {}
            }
        }
    }

    fn bump(&mut self, field: &str, value: &ScalarOperand) {
        *self.field_totals.entry(field.to_string()).or_insert(0) += 1;
        *self
            .value_counts
            .entry((field.to_string(), value.key()))
            .or_insert(0) += 1;
    }

    /// Weight of an equality predicate on `field` with operand `value`.
    pub(crate) fn equality_weight(&self, field: &str, value: &ScalarOperand) -> f64 {
        let total = self
            .field_totals
            .get(field)
            .copied()
            .unwrap_or(1)
            .max(1) as f64;
        let count = self
            .value_counts
            .get(&(field.to_string(), value.key()))
            .copied()
            .unwrap_or(1) as f64;
        (count / total).clamp(MIN_SELECTIVITY, 1.0)
    }
}
