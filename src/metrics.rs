//! Evaluation metrics.
//!
//! Contention-tolerant counters updated with relaxed atomic adds; no lock is
//! taken anywhere. `snapshot` produces a serializable view with derived
//! averages for export by whatever telemetry layer the embedder runs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-stage timings of one evaluation, in nanoseconds.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StageNanos {
    pub encode: u64,
    pub prefilter: u64,
    pub predicates: u64,
    pub counters: u64,
    pub total: u64,
}

/// Shared evaluation counters.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    evaluations: AtomicU64,
    evaluation_nanos: AtomicU64,
    encode_nanos: AtomicU64,
    prefilter_nanos: AtomicU64,
    predicate_nanos: AtomicU64,
    counter_nanos: AtomicU64,
    predicates_evaluated: AtomicU64,
    combinations_touched: AtomicU64,
    matches_emitted: AtomicU64,
    prefilter_cache_hits: AtomicU64,
    prefilter_cache_misses: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        EngineMetrics::default()
    }

    pub(crate) fn record_evaluation(
        &self,
        stages: StageNanos,
        predicates_evaluated: u64,
        combinations_touched: u64,
        matches_emitted: u64,
    ) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        self.evaluation_nanos.fetch_add(stages.total, Ordering::Relaxed);
        self.encode_nanos.fetch_add(stages.encode, Ordering::Relaxed);
        self.prefilter_nanos
            .fetch_add(stages.prefilter, Ordering::Relaxed);
        self.predicate_nanos
            .fetch_add(stages.predicates, Ordering::Relaxed);
        self.counter_nanos
            .fetch_add(stages.counters, Ordering::Relaxed);
        self.predicates_evaluated
            .fetch_add(predicates_evaluated, Ordering::Relaxed);
        self.combinations_touched
            .fetch_add(combinations_touched, Ordering::Relaxed);
        self.matches_emitted
            .fetch_add(matches_emitted, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.prefilter_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.prefilter_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough view of all counters (individually atomic reads).
    pub fn snapshot(&self) -> MetricsSnapshot {
        let evaluations = self.evaluations.load(Ordering::Relaxed);
        let evaluation_nanos = self.evaluation_nanos.load(Ordering::Relaxed);
        let hits = self.prefilter_cache_hits.load(Ordering::Relaxed);
        let misses = self.prefilter_cache_misses.load(Ordering::Relaxed);
        MetricsSnapshot {
            evaluations,
            evaluation_nanos,
            encode_nanos: self.encode_nanos.load(Ordering::Relaxed),
            prefilter_nanos: self.prefilter_nanos.load(Ordering::Relaxed),
            predicate_nanos: self.predicate_nanos.load(Ordering::Relaxed),
            counter_nanos: self.counter_nanos.load(Ordering::Relaxed),
            predicates_evaluated: self.predicates_evaluated.load(Ordering::Relaxed),
            combinations_touched: self.combinations_touched.load(Ordering::Relaxed),
            matches_emitted: self.matches_emitted.load(Ordering::Relaxed),
            prefilter_cache_hits: hits,
            prefilter_cache_misses: misses,
            avg_evaluation_nanos: if evaluations == 0 {
                0.0
            } else {
                evaluation_nanos as f64 / evaluations as f64
            },
            prefilter_cache_hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.evaluations.store(0, Ordering::Relaxed);
        self.evaluation_nanos.store(0, Ordering::Relaxed);
        self.encode_nanos.store(0, Ordering::Relaxed);
        self.prefilter_nanos.store(0, Ordering::Relaxed);
        self.predicate_nanos.store(0, Ordering::Relaxed);
        self.counter_nanos.store(0, Ordering::Relaxed);
        self.predicates_evaluated.store(0, Ordering::Relaxed);
        self.combinations_touched.store(0, Ordering::Relaxed);
        self.matches_emitted.store(0, Ordering::Relaxed);
        self.prefilter_cache_hits.store(0, Ordering::Relaxed);
        self.prefilter_cache_misses.store(0, Ordering::Relaxed);
    }
}

/// Serializable counter snapshot with derived averages.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub evaluations: u64,
    pub evaluation_nanos: u64,
    pub encode_nanos: u64,
    pub prefilter_nanos: u64,
    pub predicate_nanos: u64,
    pub counter_nanos: u64,
    pub predicates_evaluated: u64,
    pub combinations_touched: u64,
    pub matches_emitted: u64,
    pub prefilter_cache_hits: u64,
    pub prefilter_cache_misses: u64,
    pub avg_evaluation_nanos: f64,
    pub prefilter_cache_hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = EngineMetrics::new();
        metrics.record_evaluation(
            StageNanos {
                encode: 10,
                prefilter: 20,
                predicates: 30,
                counters: 40,
                total: 100,
            },
            5,
            3,
            1,
        );
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        let snap = metrics.snapshot();
        assert_eq!(snap.evaluations, 1);
        assert_eq!(snap.evaluation_nanos, 100);
        assert_eq!(snap.predicates_evaluated, 5);
        assert_eq!(snap.combinations_touched, 3);
        assert_eq!(snap.matches_emitted, 1);
        assert_eq!(snap.avg_evaluation_nanos, 100.0);
        assert_eq!(snap.prefilter_cache_hit_rate, 0.5);
    }

    #[test]
    fn test_reset() {
        let metrics = EngineMetrics::new();
        metrics.record_evaluation(StageNanos::default(), 1, 1, 1);
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.evaluations, 0);
        assert_eq!(snap.avg_evaluation_nanos, 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = EngineMetrics::new();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"evaluations\":0"));
    }
}
