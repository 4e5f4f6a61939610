//! Base-condition pre-filter and cache.
//!
//! At model-build time, each combination's "static" predicates - equality
//! predicates on non-volatile fields - are extracted and combinations are
//! grouped by the exact static set they share. At evaluate time each group
//! is checked once against the event; a failing group removes every
//! combination it covers from the starting all-eligible bitmap. The result
//! is the candidate bitmap driving the counter-matching stage.
//!
//! Pre-filter outputs are cached in a bounded concurrent map keyed by the
//! event's values for exactly the fields the static predicates touch.
//! Reads are lock-free; concurrent misses on one key may each compute and
//! write (last writer wins - the computation is pure). Capacity adapts to
//! the observed hit rate every tuning interval.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use serde::Serialize;
use tracing::debug;

use crate::config::BaseConditionConfig;
use crate::event::{EncodedEvent, EncodedValue};
use crate::model::EngineModel;
use crate::predicate::{FieldId, Operator, PredicateId, PredicateRegistry};

/// One group of combinations sharing an identical static predicate set.
#[derive(Debug, Clone)]
pub struct BaseConditionSet {
    /// Sorted static predicate ids shared by the whole group
    pub predicate_ids: Box<[PredicateId]>,
    /// Combinations covered by (removed on failure of) this set
    pub covered: RoaringBitmap,
    /// Mean selectivity of the member predicates
    pub avg_selectivity: f64,
}

/// Group combinations by shared static predicate sets. A predicate is static
/// when it is an equality (IS_ANY_OF is already strength-reduced by the
/// expander) on a field outside the volatile list. Combinations with no
/// static predicates belong to no set and are always candidates.
pub(crate) fn build_base_sets(
    registry: &PredicateRegistry,
    predicate_lists: &[Box<[PredicateId]>],
    volatile_fields: &std::collections::HashSet<FieldId>,
) -> Vec<BaseConditionSet> {
    let mut groups: std::collections::HashMap<Vec<PredicateId>, RoaringBitmap> =
        std::collections::HashMap::new();

    for (combination_id, preds) in predicate_lists.iter().enumerate() {
        let static_ids: Vec<PredicateId> = preds
            .iter()
            .copied()
            .filter(|&p| {
                let pred = registry.get(p);
                pred.operator == Operator::EqualTo && !volatile_fields.contains(&pred.field_id)
            })
            .collect();
        if static_ids.is_empty() {
            continue;
        }
        groups
            .entry(static_ids)
            .or_default()
            .insert(combination_id as u32);
    }

    let mut sets: Vec<BaseConditionSet> = groups
        .into_iter()
        .map(|(predicate_ids, covered)| {
            let avg_selectivity = predicate_ids
                .iter()
                .map(|&p| registry.get(p).weight)
                .sum::<f64>()
                / predicate_ids.len() as f64;
            BaseConditionSet {
                predicate_ids: predicate_ids.into_boxed_slice(),
                covered,
                avg_selectivity,
            }
        })
        .collect();
    // Deterministic set order across compiles of the same input
    sets.sort_by(|a, b| a.predicate_ids.cmp(&b.predicate_ids));
    sets
}

/// Evaluate every base set against `encoded` and return the candidate
/// bitmap: all combinations minus those covered by a failing set.
pub(crate) fn compute_candidates(model: &EngineModel, encoded: &EncodedEvent) -> RoaringBitmap {
    let mut eligible = model.all_combinations.clone();
    for set in &model.base_sets {
        let failed = set.predicate_ids.iter().any(|&p| {
            let pred = model.registry.get(p);
            match encoded.get(pred.field_id) {
                Some(value) => !pred.evaluate(value),
                None => true,
            }
        });
        if failed {
            eligible -= &set.covered;
        }
    }
    eligible
}

/// Semantic fingerprint of one event value as seen by static equality
/// predicates. Distinct strings absent from the value dictionary are
/// interchangeable: every interned-value equality fails on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ValueFingerprint {
    Id(u32),
    Bits(u64),
    Flag(bool),
    ForeignText,
    Missing,
}

/// Cache key: the model identity plus the event's fingerprints for exactly
/// the fields the base sets touch. Values of unrelated fields do not
/// participate, so semantically equivalent queries share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    model_version: u64,
    values: Box<[(FieldId, ValueFingerprint)]>,
}

pub(crate) fn cache_key(model: &EngineModel, encoded: &EncodedEvent) -> CacheKey {
    let values = model
        .base_touched_fields
        .iter()
        .map(|&field_id| {
            let fp = match encoded.get(field_id) {
                Some(EncodedValue::Text {
                    value_id: Some(id), ..
                }) => ValueFingerprint::Id(*id),
                Some(EncodedValue::Text { value_id: None, .. }) => ValueFingerprint::ForeignText,
                Some(EncodedValue::Number(n)) => ValueFingerprint::Bits(n.to_bits()),
                Some(EncodedValue::Flag(b)) => ValueFingerprint::Flag(*b),
                None => ValueFingerprint::Missing,
            };
            (field_id, fp)
        })
        .collect();
    CacheKey {
        model_version: model.version(),
        values,
    }
}

struct CacheEntry {
    bitmap: Arc<RoaringBitmap>,
    created: Instant,
}

/// Bounded, TTL'd, adaptively-sized concurrent cache of pre-filter outputs.
pub struct BaseConditionCache {
    entries: DashMap<CacheKey, CacheEntry>,
    capacity: AtomicUsize,
    min_capacity: usize,
    max_capacity: usize,
    ttl: Duration,
    low_watermark: f64,
    high_watermark: f64,
    tuning_interval: Duration,
    last_tuned: Mutex<Instant>,
    ops: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    window_hits: AtomicU64,
    window_misses: AtomicU64,
}

impl BaseConditionCache {
    pub fn new(config: &BaseConditionConfig) -> Self {
        let capacity = config
            .cache_capacity
            .clamp(config.cache_min_capacity.max(1), config.cache_max_capacity);
        BaseConditionCache {
            entries: DashMap::new(),
            capacity: AtomicUsize::new(capacity),
            min_capacity: config.cache_min_capacity.max(1),
            max_capacity: config.cache_max_capacity.max(1),
            ttl: config.ttl(),
            low_watermark: config.low_watermark,
            high_watermark: config.high_watermark,
            tuning_interval: config.tuning_interval(),
            last_tuned: Mutex::new(Instant::now()),
            ops: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            window_hits: AtomicU64::new(0),
            window_misses: AtomicU64::new(0),
        }
    }

    /// Lock-free read; expired entries count as misses and are dropped.
    pub(crate) fn get(&self, key: &CacheKey) -> Option<Arc<RoaringBitmap>> {
        self.maybe_tune();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.created.elapsed() <= self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.window_hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.bitmap));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.window_misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert, evicting if over capacity. Last writer wins on a racing key.
    pub(crate) fn put(&self, key: CacheKey, bitmap: Arc<RoaringBitmap>) {
        let capacity = self.capacity.load(Ordering::Relaxed);
        if self.entries.len() >= capacity {
            self.evict_to(capacity);
        }
        self.entries.insert(
            key,
            CacheEntry {
                bitmap,
                created: Instant::now(),
            },
        );
    }

    /// Drop every entry (called on model replacement).
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// Current adaptive capacity.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BaseCacheStats {
        BaseCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
            capacity: self.capacity(),
        }
    }

    fn evict_to(&self, capacity: usize) {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.created.elapsed() <= ttl);
        let mut len = self.entries.len();
        self.evictions
            .fetch_add((before - len) as u64, Ordering::Relaxed);

        // Still full after TTL sweep: shed arbitrary entries. Base-set
        // evaluation is cheap, so approximate eviction beats bookkeeping an
        // exact LRU on the hot path.
        if len >= capacity {
            let excess = len + 1 - capacity;
            let victims: Vec<CacheKey> = self
                .entries
                .iter()
                .take(excess)
                .map(|entry| entry.key().clone())
                .collect();
            for victim in victims {
                if self.entries.remove(&victim).is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    len -= 1;
                }
            }
        }
    }

    /// Every tuning interval, grow when the windowed hit rate is below the
    /// low watermark and shrink when it is above the high watermark with the
    /// map running at under half capacity (the memory-headroom proxy).
    fn maybe_tune(&self) {
        if self.ops.fetch_add(1, Ordering::Relaxed) & 0x3ff != 0 {
            return;
        }
        let Some(mut last_tuned) = self.last_tuned.try_lock() else {
            return;
        };
        if last_tuned.elapsed() < self.tuning_interval {
            return;
        }
        *last_tuned = Instant::now();

        let hits = self.window_hits.swap(0, Ordering::Relaxed);
        let misses = self.window_misses.swap(0, Ordering::Relaxed);
        let total = hits + misses;
        if total < 100 {
            return;
        }
        let rate = hits as f64 / total as f64;
        let capacity = self.capacity.load(Ordering::Relaxed);
        if rate < self.low_watermark && capacity < self.max_capacity {
            let next = (capacity * 2).min(self.max_capacity);
            self.capacity.store(next, Ordering::Relaxed);
            debug!(hit_rate = rate, capacity = next, "base-condition cache grown");
        } else if rate > self.high_watermark
            && capacity > self.min_capacity
            && self.entries.len() <= capacity / 2
        {
            let next = (capacity / 2).max(self.min_capacity);
            self.capacity.store(next, Ordering::Relaxed);
            debug!(hit_rate = rate, capacity = next, "base-condition cache shrunk");
        }
    }
}

impl std::fmt::Debug for BaseConditionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseConditionCache")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Snapshot of base-condition cache counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BaseCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::config::{EngineConfig, NormalizationConfig};
    use crate::event::{encode_into, Event};
    use crate::interning::NormalizationCache;
    use crate::rules::RuleDefinition;

    fn shared_status_model() -> EngineModel {
        let rules = vec![
            RuleDefinition::new("A")
                .with_condition("status", "EQUAL_TO", "ACTIVE")
                .with_condition("amount", "GREATER_THAN", 100),
            RuleDefinition::new("B")
                .with_condition("status", "EQUAL_TO", "ACTIVE")
                .with_condition("amount", "GREATER_THAN", 500),
            RuleDefinition::new("C")
                .with_condition("status", "EQUAL_TO", "CLOSED")
                .with_condition("amount", "LESS_THAN", 10),
        ];
        compile(&rules, &EngineConfig::default()).unwrap()
    }

    fn encode(model: &EngineModel, event: &Event) -> EncodedEvent {
        let cache = NormalizationCache::new(&NormalizationConfig::default());
        let mut out = EncodedEvent::new();
        encode_into(
            event,
            &model.field_dictionary,
            &model.value_dictionary,
            &cache,
            &mut out,
        );
        out
    }

    #[test]
    fn test_combinations_group_by_shared_static_set() {
        let model = shared_status_model();
        // status=ACTIVE covers two combinations, status=CLOSED covers one
        assert_eq!(model.base_sets.len(), 2);
        let sizes: Vec<u64> = {
            let mut v: Vec<u64> = model.base_sets.iter().map(|s| s.covered.len()).collect();
            v.sort_unstable();
            v
        };
        assert_eq!(sizes, vec![1, 2]);
    }

    #[test]
    fn test_candidates_drop_failing_groups() {
        let model = shared_status_model();
        let event = Event::new("e")
            .with_attribute("status", "active")
            .with_attribute("amount", 600);
        let encoded = encode(&model, &event);
        let candidates = compute_candidates(&model, &encoded);
        // The CLOSED group fails, its single combination is excluded
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_missing_static_field_excludes_group() {
        let model = shared_status_model();
        let event = Event::new("e").with_attribute("amount", 600);
        let encoded = encode(&model, &event);
        let candidates = compute_candidates(&model, &encoded);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_cache_key_ignores_unrelated_fields() {
        let model = shared_status_model();
        let a = encode(
            &model,
            &Event::new("e1")
                .with_attribute("status", "active")
                .with_attribute("amount", 1),
        );
        let b = encode(
            &model,
            &Event::new("e2")
                .with_attribute("status", "active")
                .with_attribute("amount", 99999),
        );
        // amount is not a static field; only status participates
        assert_eq!(cache_key(&model, &a), cache_key(&model, &b));

        let c = encode(&model, &Event::new("e3").with_attribute("status", "closed"));
        assert_ne!(cache_key(&model, &a), cache_key(&model, &c));
    }

    #[test]
    fn test_unknown_strings_share_a_fingerprint() {
        let model = shared_status_model();
        let a = encode(&model, &Event::new("e1").with_attribute("status", "zzz"));
        let b = encode(&model, &Event::new("e2").with_attribute("status", "qqq"));
        assert_eq!(cache_key(&model, &a), cache_key(&model, &b));
    }

    fn test_cache(capacity: usize, ttl_ms: u64) -> BaseConditionCache {
        BaseConditionCache::new(&BaseConditionConfig {
            cache_capacity: capacity,
            cache_min_capacity: 1,
            cache_max_capacity: capacity * 4,
            cache_ttl_ms: ttl_ms,
            ..BaseConditionConfig::default()
        })
    }

    fn key_for(model: &EngineModel, status: &str) -> CacheKey {
        let encoded = encode(model, &Event::new("e").with_attribute("status", status));
        cache_key(model, &encoded)
    }

    #[test]
    fn test_cache_round_trip() {
        let model = shared_status_model();
        let cache = test_cache(16, 60_000);
        let key = key_for(&model, "active");
        assert!(cache.get(&key).is_none());

        let bitmap = Arc::new(RoaringBitmap::from_iter([1u32, 2]));
        cache.put(key.clone(), Arc::clone(&bitmap));
        let found = cache.get(&key).expect("cached");
        assert_eq!(&*found, &*bitmap);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_cache_ttl_expiry() {
        let model = shared_status_model();
        let cache = test_cache(16, 0);
        let key = key_for(&model, "active");
        cache.put(key.clone(), Arc::new(RoaringBitmap::new()));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
    }

    fn synthetic_key(i: u32) -> CacheKey {
        CacheKey {
            model_version: 0,
            values: Box::new([(0, ValueFingerprint::Id(i))]),
        }
    }

    #[test]
    fn test_cache_size_bound() {
        let cache = test_cache(4, 60_000);
        for i in 0..20 {
            cache.put(synthetic_key(i), Arc::new(RoaringBitmap::new()));
        }
        assert!(cache.stats().entries <= 4);
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn test_invalidate_all() {
        let model = shared_status_model();
        let cache = test_cache(16, 60_000);
        let key = key_for(&model, "active");
        cache.put(key.clone(), Arc::new(RoaringBitmap::new()));
        cache.invalidate_all();
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().entries, 0);
    }
}
