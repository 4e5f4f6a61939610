//! The compiled, immutable evaluation artifact.
//!
//! Structure-of-arrays layout indexed by combination id, a predicate-to-
//! combination inverted index of compressed bitmaps, both dictionaries, the
//! predicate registry, per-field predicate lists sorted by selectivity, and
//! the derived base-condition sets. Everything is frozen when `compile`
//! returns; readers on any number of threads need no locks.
//!
//! The only interior mutability is the bounded eligible-predicate-set cache,
//! a sharded concurrent map from candidate bitmap to the union of predicate
//! ids its combinations reference.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use roaring::RoaringBitmap;
use serde::Serialize;

use crate::base_condition::BaseConditionSet;
use crate::dictionary::Dictionary;
use crate::predicate::{FieldId, PredicateId, PredicateRegistry};
use crate::selection::SelectionStrategy;

/// Monotonic model version counter; versions survive across reloads so cache
/// keys from retired models can never alias a live one.
static MODEL_VERSION: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_model_version() -> u64 {
    MODEL_VERSION.fetch_add(1, Ordering::SeqCst)
}

/// `(rule_code, priority, description)` of one logical rule, shared by every
/// combination it expanded to.
#[derive(Debug, Clone, Serialize)]
pub struct RuleInfo {
    pub rule_code: String,
    pub priority: i32,
    pub description: String,
}

/// Summary counters from one compilation.
#[derive(Debug, Clone, Serialize)]
pub struct CompileStats {
    pub total_rules: usize,
    pub enabled_rules: usize,
    /// Pre-dedup Cartesian expansion count
    pub total_expanded: u64,
    pub unique_combinations: usize,
    /// `1 - unique/expanded`; the memory saved by cross-rule dedup
    pub dedup_rate: f64,
    pub predicates: usize,
    pub fields: usize,
    pub values: usize,
    pub base_condition_sets: usize,
    pub compile_time_nanos: u64,
}

/// The immutable engine model. Created exclusively by the compiler, shared
/// by reference with any number of evaluators, replaced only by publishing a
/// new instance through the model manager.
pub struct EngineModel {
    pub(crate) version: u64,
    pub(crate) field_dictionary: Dictionary,
    pub(crate) value_dictionary: Dictionary,
    pub(crate) registry: PredicateRegistry,

    /// predicate id -> bitmap of combination ids referencing it
    pub(crate) inverted_index: Vec<RoaringBitmap>,

    // SoA arrays indexed by combination id
    pub(crate) required_count: Vec<u16>,
    pub(crate) predicate_lists: Vec<Box<[PredicateId]>>,
    pub(crate) rule_bindings: Vec<Box<[Arc<RuleInfo>]>>,

    /// field id -> predicates on that field, ascending by weight
    pub(crate) field_predicates: Vec<Box<[PredicateId]>>,
    /// field id -> weight of its rarest predicate (f64::INFINITY if none)
    pub(crate) field_min_weight: Vec<f64>,

    pub(crate) base_sets: Vec<BaseConditionSet>,
    /// Sorted union of the fields the base sets touch
    pub(crate) base_touched_fields: Vec<FieldId>,

    /// Bitmap of every combination id, the pre-filter's starting point
    pub(crate) all_combinations: RoaringBitmap,

    pub(crate) strategy: SelectionStrategy,

    eligible_cache: DashMap<Vec<u8>, Arc<RoaringBitmap>>,
    eligible_cache_capacity: usize,

    pub(crate) stats: CompileStats,
}

impl EngineModel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        field_dictionary: Dictionary,
        value_dictionary: Dictionary,
        registry: PredicateRegistry,
        inverted_index: Vec<RoaringBitmap>,
        required_count: Vec<u16>,
        predicate_lists: Vec<Box<[PredicateId]>>,
        rule_bindings: Vec<Box<[Arc<RuleInfo>]>>,
        field_predicates: Vec<Box<[PredicateId]>>,
        field_min_weight: Vec<f64>,
        base_sets: Vec<BaseConditionSet>,
        strategy: SelectionStrategy,
        eligible_cache_capacity: usize,
        stats: CompileStats,
    ) -> Self {
        let mut all_combinations = RoaringBitmap::new();
        if !required_count.is_empty() {
            all_combinations.insert_range(0..required_count.len() as u32);
        }
        let mut base_touched_fields: Vec<FieldId> = base_sets
            .iter()
            .flat_map(|set| {
                set.predicate_ids
                    .iter()
                    .map(|&p| registry.get(p).field_id)
                    .collect::<Vec<_>>()
            })
            .collect();
        base_touched_fields.sort_unstable();
        base_touched_fields.dedup();

        EngineModel {
            version: next_model_version(),
            field_dictionary,
            value_dictionary,
            registry,
            inverted_index,
            required_count,
            predicate_lists,
            rule_bindings,
            field_predicates,
            field_min_weight,
            base_sets,
            base_touched_fields,
            all_combinations,
            strategy,
            eligible_cache: DashMap::new(),
            eligible_cache_capacity,
            stats,
        }
    }

    /// Monotonic identity of this compiled model.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of runtime combinations.
    pub fn num_combinations(&self) -> usize {
        self.required_count.len()
    }

    /// Number of distinct predicates.
    pub fn num_predicates(&self) -> usize {
        self.registry.len()
    }

    /// The selection strategy the model was compiled with.
    pub fn selection_strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Compilation summary.
    pub fn stats(&self) -> &CompileStats {
        &self.stats
    }

    /// Sorted, deduplicated codes of every logical rule in the model.
    pub fn rule_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self
            .rule_bindings
            .iter()
            .flat_map(|bindings| bindings.iter().map(|info| info.rule_code.as_str()))
            .collect();
        codes.sort_unstable();
        codes.dedup();
        codes
    }

    /// Logical rules associated with one combination id.
    pub fn combination_rules(&self, combination_id: u32) -> Option<&[Arc<RuleInfo>]> {
        self.rule_bindings
            .get(combination_id as usize)
            .map(|b| b.as_ref())
    }

    /// Human-readable one-model summary.
    pub fn describe(&self) -> String {
        format!(
            "EngineModel v{}: {} combinations, {} predicates, {} fields, {} values, \
             {} base-condition sets, dedup rate {:.1}%",
            self.version,
            self.num_combinations(),
            self.num_predicates(),
            self.field_dictionary.len(),
            self.value_dictionary.len(),
            self.base_sets.len(),
            self.stats.dedup_rate * 100.0,
        )
    }

    /// Union of predicate ids referenced by the combinations in `candidate`,
    /// memoized per distinct bitmap. Predicates outside this set cannot
    /// contribute to any surviving combination and are skipped by the
    /// evaluator.
    pub(crate) fn eligible_predicates(&self, candidate: &RoaringBitmap) -> Arc<RoaringBitmap> {
        let mut key = Vec::with_capacity(candidate.serialized_size());
        let cacheable = candidate.serialize_into(&mut key).is_ok();
        if cacheable {
            if let Some(found) = self.eligible_cache.get(&key) {
                return Arc::clone(&found);
            }
        }

        let mut eligible = RoaringBitmap::new();
        for c in candidate.iter() {
            for &p in self.predicate_lists[c as usize].iter() {
                eligible.insert(p);
            }
        }
        let eligible = Arc::new(eligible);
        if cacheable && self.eligible_cache.len() < self.eligible_cache_capacity {
            self.eligible_cache
                .insert(key, Arc::clone(&eligible));
        }
        eligible
    }
}

impl std::fmt::Debug for EngineModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineModel")
            .field("version", &self.version)
            .field("combinations", &self.num_combinations())
            .field("predicates", &self.num_predicates())
            .field("base_sets", &self.base_sets.len())
            .finish()
    }
}
