//! Combination expansion and cross-rule deduplication.
//!
//! Each enabled rule is the Cartesian product of its multi-valued IS_ANY_OF
//! groups crossed with its static predicate set. Every product tuple is
//! canonicalized (sorted, deduplicated predicate ids) and that sequence is
//! the identity of a combination: two logical rules projecting to the same
//! sequence share one combination id. Expansion is iterative (an odometer
//! over the groups), so a rule expanding into hundreds of thousands of
//! combinations costs exactly one pass per combination.

use std::collections::HashMap;

use crate::predicate::PredicateId;

/// A combination under construction: its canonical predicate-id sequence and
/// every logical rule that projected onto it.
#[derive(Debug, Clone)]
pub(crate) struct CombinationDraft {
    pub predicate_ids: Vec<PredicateId>,
    /// Indices into the compiler's valid-rule table, in first-seen order
    pub rule_indices: Vec<usize>,
}

/// Accumulates combinations across all rules, deduplicating by canonical
/// predicate-id sequence.
#[derive(Debug, Default)]
pub(crate) struct CombinationAccumulator {
    index: HashMap<Box<[PredicateId]>, u32>,
    pub combos: Vec<CombinationDraft>,
    /// Pre-dedup expansion count across all rules
    pub total_expanded: u64,
}

impl CombinationAccumulator {
    pub(crate) fn new() -> Self {
        CombinationAccumulator::default()
    }

    /// Number of product tuples `groups` yields (1 when empty).
    pub(crate) fn expansion_size(groups: &[Vec<PredicateId>]) -> u128 {
        groups.iter().map(|g| g.len() as u128).product()
    }

    /// Expand one rule. `static_ids` is crossed with every tuple of the
    /// product of `groups`. The caller has already checked the expansion
    /// ceiling.
    pub(crate) fn expand_rule(
        &mut self,
        rule_index: usize,
        static_ids: &[PredicateId],
        groups: &[Vec<PredicateId>],
    ) {
        let mut combo = Vec::with_capacity(static_ids.len() + groups.len());
        if groups.is_empty() {
            combo.extend_from_slice(static_ids);
            self.register(rule_index, &mut combo);
            return;
        }

        // Odometer over group indices
        let mut cursor = vec![0usize; groups.len()];
        loop {
            combo.clear();
            combo.extend_from_slice(static_ids);
            for (gi, &vi) in cursor.iter().enumerate() {
                combo.push(groups[gi][vi]);
            }
            self.register(rule_index, &mut combo);

            let mut pos = groups.len();
            loop {
                if pos == 0 {
                    return;
                }
                pos -= 1;
                cursor[pos] += 1;
                if cursor[pos] < groups[pos].len() {
                    break;
                }
                cursor[pos] = 0;
            }
        }
    }

    /// Canonicalize `combo` and register it, merging the rule association if
    /// the sequence already exists.
    fn register(&mut self, rule_index: usize, combo: &mut Vec<PredicateId>) {
        self.total_expanded += 1;
        combo.sort_unstable();
        combo.dedup();

        if let Some(&id) = self.index.get(combo.as_slice()) {
            let rules = &mut self.combos[id as usize].rule_indices;
            // One rule is expanded contiguously, so a repeat can only be the
            // most recent association (overlapping IS_ANY_OF tuples that
            // canonicalize identically)
            if rules.last() != Some(&rule_index) {
                rules.push(rule_index);
            }
            return;
        }

        let id = self.combos.len() as u32;
        self.index.insert(combo.clone().into_boxed_slice(), id);
        self.combos.push(CombinationDraft {
            predicate_ids: combo.clone(),
            rule_indices: vec![rule_index],
        });
    }

    /// Number of distinct combinations registered.
    pub(crate) fn len(&self) -> usize {
        self.combos.len()
    }
}
